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

//! The read-ahead buffer the scanners operate on.
//!
//! Data is pulled from a `ByteSource` into a buffer with a reserved region at
//! the front for look-behind. Callers ask for a minimum number of bytes past
//! the cursor; the buffer only touches the source when that many are not
//! already present, compacting unread data to the front first so the buffer
//! does not grow unless a single request exceeds its capacity.

use std::io::{self, Read, Seek, SeekFrom};

use log::trace;

use crate::support::cancel::CancelToken;
use crate::support::error::Error;

/// Bytes kept before the cursor when the buffer is compacted.
pub const LOOK_BEHIND: usize = 128;

#[cfg(not(test))]
pub const BLOCK_SIZE: usize = 4096;
// Use a much smaller block in tests so refill and compaction paths actually
// get exercised by small inputs.
#[cfg(test)]
pub const BLOCK_SIZE: usize = 64;

/// Something the parser can pull bytes from.
pub trait ByteSource {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    /// The absolute position of the next byte to be read, if known.
    fn position(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    /// Called before every read with the position the parser believes the
    /// source to be at.
    ///
    /// Seekable sources use this to recover when something else has read from
    /// the same underlying stream between parser calls.
    fn resync(&mut self, _position: u64) -> io::Result<()> {
        Ok(())
    }
}

/// A plain forward-only source.
#[derive(Debug)]
pub struct Sequential<R>(pub R);

impl<R: Read> ByteSource for Sequential<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.0.read(dst) {
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                r => return r,
            }
        }
    }
}

/// A source which supports seeking, and which may be shared with code that
/// reads leaf content out-of-band between parser calls.
#[derive(Debug)]
pub struct Seekable<R>(pub R);

impl<R: Read + Seek> ByteSource for Seekable<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.0.read(dst) {
                Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
                r => return r,
            }
        }
    }

    fn position(&mut self) -> io::Result<Option<u64>> {
        self.0.seek(SeekFrom::Current(0)).map(Some)
    }

    fn resync(&mut self, position: u64) -> io::Result<()> {
        if self.0.seek(SeekFrom::Current(0))? != position {
            trace!("Reseeking source to {}", position);
            self.0.seek(SeekFrom::Start(position))?;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ReadAhead<S> {
    source: S,
    buf: Vec<u8>,
    /// Index of the next unread byte.
    start: usize,
    /// Index one past the last valid byte.
    end: usize,
    /// Stream position corresponding to `buf[end]`.
    position: u64,
    eos: bool,
    cancel: Option<CancelToken>,
}

impl<S: ByteSource> ReadAhead<S> {
    pub fn new(mut source: S) -> io::Result<Self> {
        let position = source.position()?.unwrap_or(0);
        Ok(ReadAhead {
            source,
            buf: vec![0u8; LOOK_BEHIND + BLOCK_SIZE],
            start: LOOK_BEHIND,
            end: LOOK_BEHIND,
            position,
            eos: false,
            cancel: None,
        })
    }

    pub fn set_cancel_token(&mut self, cancel: Option<CancelToken>) {
        self.cancel = cancel;
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Discard all buffered data and resume reading at the source's current
    /// position.
    pub fn reset(&mut self) -> io::Result<()> {
        if let Some(position) = self.source.position()? {
            self.position = position;
        }
        self.start = LOOK_BEHIND;
        self.end = LOOK_BEHIND;
        self.eos = false;
        Ok(())
    }

    /// The unread data currently buffered.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn available(&self) -> usize {
        self.end - self.start
    }

    /// Up to `n` already-consumed bytes immediately before the cursor.
    pub fn look_behind(&self, n: usize) -> &[u8] {
        &self.buf[self.start - n.min(self.start)..self.start]
    }

    /// Advance the cursor past `n` bytes of `data()`.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.start += n;
    }

    /// The stream offset of the cursor.
    pub fn offset(&self) -> u64 {
        self.position - self.available() as u64
    }

    /// Whether the source has been exhausted.
    ///
    /// There may still be buffered data when this is true.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Ensure at least `atleast` bytes are available past the cursor, or that
    /// the source is exhausted, preserving the usual look-behind.
    ///
    /// Returns the number of bytes available.
    pub fn ensure(&mut self, atleast: usize) -> Result<usize, Error> {
        self.fill(atleast, LOOK_BEHIND)
    }

    /// Like `ensure()`, but preserve exactly up to `save` bytes before the
    /// cursor when compacting.
    pub fn fill(&mut self, atleast: usize, save: usize) -> Result<usize, Error> {
        loop {
            let left = self.available();
            if left >= atleast || self.eos {
                return Ok(left);
            }

            self.refill(atleast, save)?;
        }
    }

    fn refill(&mut self, atleast: usize, save: usize) -> Result<(), Error> {
        let left = self.available();
        let save = save.min(self.start).min(LOOK_BEHIND);

        // Move the saved look-behind and all unread data so that the cursor
        // lands at the end of the look-behind region.
        let dst = LOOK_BEHIND - save;
        if self.start - save != dst {
            self.buf.copy_within(self.start - save..self.end, dst);
            self.start = dst + save;
            self.end = self.start + left;
        }

        let needed = self.start + atleast.max(left + 1);
        if needed > self.buf.len() {
            let new_len =
                (needed + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE;
            trace!(
                "Growing read-ahead buffer from {} to {}",
                self.buf.len(),
                new_len
            );
            self.buf.resize(new_len, 0);
        }

        if let Some(ref cancel) = self.cancel {
            cancel.check()?;
        }

        self.source.resync(self.position)?;
        let nread = self.source.read(&mut self.buf[self.end..])?;
        if 0 == nread {
            trace!("End of stream at {}", self.position);
            self.eos = true;
        } else {
            self.end += nread;
            self.position += nread as u64;
        }

        Ok(())
    }
}

/// A reader which returns at most `max` bytes per read, used to force the
/// scanners through every refill path.
#[cfg(test)]
#[derive(Debug)]
pub struct Trickle<'a> {
    pub data: &'a [u8],
    pub max: usize,
}

#[cfg(test)]
impl Read for Trickle<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.max.min(dst.len()).min(self.data.len());
        dst[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}
