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

//! A visitor which writes the input back out.
//!
//! Every byte of the input is reported exactly once, either as part of a
//! header or as section data, so writing all of it in order reproduces the
//! input exactly. This is mainly useful for checking the parser.

use std::io::Write;

use super::header::RawHeader;
use super::visitor::{Section, Visitor};
use crate::support::error::Error;

#[derive(Debug)]
pub struct Reassembler<W> {
    out: W,
    written: u64,
}

impl<W: Write> Reassembler<W> {
    pub fn new(out: W) -> Self {
        Reassembler { out, written: 0 }
    }

    /// The number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.out.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }
}

impl<W: Write> Visitor for Reassembler<W> {
    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        self.write(header.raw())
    }

    fn section_data(&mut self, _: Section, data: &[u8]) -> Result<(), Error> {
        self.write(data)
    }
}
