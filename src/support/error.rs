//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of mimestream.
//
// mimestream is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// mimestream is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// mimestream. If not, see <http://www.gnu.org/licenses/>.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parsing was cancelled")]
    Cancelled,
    #[error("Failed to parse headers at offset {offset}")]
    MissingHeaders { offset: u64 },
    #[error("Failed to find mbox From marker before offset {offset}")]
    MissingMboxMarker { offset: u64 },
    #[error("Parser is in a failed state and must be reset")]
    ParserFailed,
    #[error("Parsing aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error leaves the parser unusable until it is reset.
    ///
    /// I/O errors from the source are also fatal to the current parse since
    /// the parser cannot know how much of the failed read was lost.
    pub fn is_fatal(&self) -> bool {
        !matches!(*self, Error::Config(..))
    }
}
