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

//! Tracking of stream offsets and line numbers.

use super::boundary::BoundaryType;

/// A point in the input stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    /// Absolute byte offset from the start of the input.
    pub offset: u64,
    /// 1-based line number.
    pub line_number: u64,
}

/// Tracks the offset, line number, and line starts as bytes are consumed.
///
/// The start of the previous line is retained so that line counts come out
/// right when content ends on the line ending just before a boundary.
#[derive(Clone, Debug)]
pub struct LineTracker {
    offset: u64,
    line_number: u64,
    line_begin: u64,
    prev_line_begin: u64,
}

impl LineTracker {
    pub fn new(offset: u64) -> Self {
        LineTracker {
            offset,
            line_number: 1,
            line_begin: offset,
            prev_line_begin: offset,
        }
    }

    /// Record that `consumed` has been read past.
    pub fn advance(&mut self, consumed: &[u8]) {
        for lf in memchr::memchr_iter(b'\n', consumed) {
            self.prev_line_begin = self.line_begin;
            self.line_begin = self.offset + lf as u64 + 1;
            self.line_number += 1;
        }

        self.offset += consumed.len() as u64;
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn position(&self) -> Position {
        Position {
            offset: self.offset,
            line_number: self.line_number,
        }
    }

    /// The number of lines in the span which began at `begin_offset` on line
    /// `begin_line_number` and ends at `end_offset`, the cursor being at the
    /// point where scanning stopped because of `boundary`.
    ///
    /// A partial final line counts as a line. When scanning stopped on a
    /// delimiter and the span ends exactly where the previous line began, that
    /// line consisted only of the line ending which belongs to the delimiter
    /// and is not counted.
    pub fn line_count(
        &self,
        begin_line_number: u64,
        begin_offset: u64,
        end_offset: u64,
        boundary: BoundaryType,
    ) -> u64 {
        let mut lines = self.line_number as i64 - begin_line_number as i64;

        if self.line_begin >= begin_offset && end_offset > self.line_begin {
            lines += 1;
        }

        if BoundaryType::Eos != boundary && end_offset == self.prev_line_begin
        {
            lines -= 1;
        }

        lines.max(0) as u64
    }
}
