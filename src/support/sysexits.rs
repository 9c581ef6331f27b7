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

//! Constants from `sysexits.h`
//!
//! The command-line tool follows the BSD conventions so that it composes with
//! mail filters and shell scripts that already understand them.
#![allow(dead_code)]

use super::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// Map a parser error onto the exit code a caller should see.
    pub fn for_error(e: &Error) -> Self {
        match *e {
            Error::Io(..) => EX_IOERR,
            Error::Config(..) => EX_CONFIG,
            Error::Cancelled => EX_TEMPFAIL,
            Error::MissingHeaders { .. } | Error::MissingMboxMarker { .. } => {
                EX_DATAERR
            }
            Error::ParserFailed | Error::Aborted(..) => EX_SOFTWARE,
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::*;

    #[test]
    fn error_mapping() {
        assert_eq!(
            EX_IOERR,
            Sysexit::for_error(&Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "boom"
            )))
        );
        assert_eq!(
            EX_DATAERR,
            Sysexit::for_error(&Error::MissingHeaders { offset: 0 })
        );
        assert_eq!(
            EX_DATAERR,
            Sysexit::for_error(&Error::MissingMboxMarker { offset: 12 })
        );
        assert_eq!(EX_TEMPFAIL, Sysexit::for_error(&Error::Cancelled));
    }
}
