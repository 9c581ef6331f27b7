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

//! The cursor the scanners consume from.
//!
//! This couples the read-ahead buffer with the line tracker so that every
//! byte consumed is accounted for in offsets and line numbers, and holds the
//! line ending of the most recent content line until it is known whether
//! that line ending belongs to the content or to a following delimiter.

use std::io;

use super::boundary::{BoundaryStack, BoundaryType};
use super::buffer::{ByteSource, ReadAhead};
use super::position::{LineTracker, Position};
use crate::support::cancel::CancelToken;
use crate::support::error::Error;

/// Growable scratch buffers grow in multiples of this.
const SCRATCH_BLOCK: usize = 256;

#[derive(Debug)]
pub struct Input<S> {
    buffer: ReadAhead<S>,
    tracker: LineTracker,
    /// The length of the line ending of the last content line, not yet
    /// attributed to either the content or the delimiter after it. The bytes
    /// themselves are the last ones consumed, and stay readable in the
    /// buffer's look-behind.
    pending: usize,
}

impl<S: ByteSource> Input<S> {
    pub fn new(source: S) -> io::Result<Self> {
        let buffer = ReadAhead::new(source)?;
        let tracker = LineTracker::new(buffer.offset());
        Ok(Input {
            buffer,
            tracker,
            pending: 0,
        })
    }

    /// Discard all buffered state and restart tracking at the source's
    /// current position, on line 1.
    pub fn reset(&mut self) -> io::Result<()> {
        self.buffer.reset()?;
        self.tracker = LineTracker::new(self.buffer.offset());
        self.pending = 0;
        Ok(())
    }

    pub fn set_cancel_token(&mut self, cancel: Option<CancelToken>) {
        self.buffer.set_cancel_token(cancel);
    }

    pub fn source_mut(&mut self) -> &mut S {
        self.buffer.source_mut()
    }

    pub fn into_source(self) -> S {
        self.buffer.into_source()
    }

    pub fn ensure(&mut self, atleast: usize) -> Result<usize, Error> {
        self.buffer.ensure(atleast)
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    pub fn is_eos(&self) -> bool {
        self.buffer.is_eos()
    }

    pub fn consume(&mut self, n: usize) {
        self.tracker.advance(&self.buffer.data()[..n]);
        self.buffer.consume(n);
        debug_assert_eq!(self.buffer.offset(), self.tracker.offset());
    }

    pub fn offset(&self) -> u64 {
        self.tracker.offset()
    }

    pub fn position(&self) -> Position {
        self.tracker.position()
    }

    pub fn line_count(
        &self,
        begin: Position,
        end_offset: u64,
        boundary: BoundaryType,
    ) -> u64 {
        self.tracker.line_count(
            begin.line_number,
            begin.offset,
            end_offset,
            boundary,
        )
    }

    pub fn pending(&self) -> &[u8] {
        self.buffer.look_behind(self.pending)
    }

    pub fn take_pending(&mut self) -> &[u8] {
        let len = std::mem::replace(&mut self.pending, 0);
        self.buffer.look_behind(len)
    }

    /// Mark the last `len` bytes consumed as a line ending whose owner is
    /// not yet known.
    pub fn set_pending(&mut self, len: usize) {
        debug_assert!(len <= 2);
        debug_assert!(self.buffer.look_behind(len).ends_with(b"\n"));
        self.pending = len;
    }

    /// The position at which the pending line ending started.
    pub fn pending_position(&self) -> Position {
        let mut pos = self.position();
        if 0 != self.pending {
            pos.offset -= self.pending as u64;
            pos.line_number -= 1;
        }
        pos
    }

    /// Make the current line available in `data()` as far as it is needed.
    ///
    /// On return, `data()` either contains a full line, or at least `limit`
    /// bytes of a line, or everything up to the end of the input. Returns the
    /// length of the line (including its line ending) or of the partial line
    /// that is available. 0 means the end of the input.
    pub fn peek_line(&mut self, limit: usize) -> Result<usize, Error> {
        let limit = limit.max(2);
        loop {
            let data = self.buffer.data();
            if let Some(lf) = memchr::memchr(b'\n', data) {
                return Ok(lf + 1);
            }

            if data.len() >= limit || self.buffer.is_eos() {
                return Ok(data.len());
            }

            let want = data.len() + 1;
            self.buffer.ensure(want)?;
        }
    }

    /// Consume one full line (or everything up to the end of the input),
    /// appending it to `dst`.
    ///
    /// Returns whether a line ending was found.
    pub fn read_line_into(&mut self, dst: &mut Vec<u8>) -> Result<bool, Error> {
        loop {
            if 0 == self.buffer.ensure(1)? {
                return Ok(false);
            }

            let data = self.buffer.data();
            let (len, complete) = match memchr::memchr(b'\n', data) {
                Some(lf) => (lf + 1, true),
                None => (data.len(), false),
            };

            append(dst, &data[..len]);
            self.consume(len);
            if complete {
                return Ok(true);
            }
        }
    }

    /// The number of bytes of an unterminated line to examine before assuming
    /// it is not a delimiter.
    pub fn scan_limit(boundaries: &BoundaryStack, configured: usize) -> usize {
        boundaries.max_length() + configured.max(2)
    }
}

/// Append `src` to `dst`, growing `dst` geometrically in whole blocks.
pub fn append(dst: &mut Vec<u8>, src: &[u8]) {
    let needed = dst.len() + src.len();
    if needed > dst.capacity() {
        let target = needed.max(dst.capacity() * 2);
        let target = (target + SCRATCH_BLOCK - 1) / SCRATCH_BLOCK * SCRATCH_BLOCK;
        dst.reserve_exact(target - dst.len());
    }
    dst.extend_from_slice(src);
}

/// Split `line` into its content and its line ending.
pub fn split_line_ending(line: &[u8]) -> (&[u8], &'static [u8]) {
    if line.ends_with(b"\r\n") {
        (&line[..line.len() - 2], b"\r\n")
    } else if line.ends_with(b"\n") {
        (&line[..line.len() - 1], b"\n")
    } else {
        (line, b"")
    }
}
