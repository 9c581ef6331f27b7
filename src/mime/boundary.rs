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

//! The stack of active multipart delimiters.

use std::fmt;

/// The prefix of an mbox message separator line.
pub const MBOX_FROM: &[u8] = b"From ";

/// One delimiter on the boundary stack.
#[derive(Clone)]
pub struct Boundary {
    /// `--boundary--`, or just `From ` for the mbox pseudo-boundary.
    marker: Vec<u8>,
    /// Length of the marker without the trailing `--`.
    length: usize,
    /// Length of the marker with the trailing `--`.
    final_length: usize,
    /// The longest `final_length` of this boundary and all its ancestors.
    max_length: usize,
    is_mbox: bool,
}

impl Boundary {
    fn new(boundary: &[u8], parent_max_length: usize) -> Self {
        let mut marker = Vec::with_capacity(boundary.len() + 4);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary);
        marker.extend_from_slice(b"--");

        let final_length = marker.len();
        Boundary {
            marker,
            length: final_length - 2,
            final_length,
            max_length: parent_max_length.max(final_length),
            is_mbox: false,
        }
    }

    fn mbox() -> Self {
        Boundary {
            marker: MBOX_FROM.to_vec(),
            length: MBOX_FROM.len(),
            final_length: MBOX_FROM.len(),
            max_length: MBOX_FROM.len(),
            is_mbox: true,
        }
    }

    /// The delimiter line without the trailing `--`.
    pub fn marker(&self) -> &[u8] {
        &self.marker[..self.length]
    }

    /// The close-delimiter line.
    pub fn end_marker(&self) -> &[u8] {
        &self.marker[..self.final_length]
    }

    pub fn is_mbox(&self) -> bool {
        self.is_mbox
    }

    /// Whether `line` is `marker` followed by nothing but linear white space
    /// and the line ending.
    fn matches(line: &[u8], marker: &[u8]) -> bool {
        line.starts_with(marker)
            && line[marker.len()..]
                .iter()
                .all(|&b| b' ' == b || b'\t' == b || b'\r' == b || b'\n' == b)
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Boundary({:?})", String::from_utf8_lossy(self.end_marker()))
    }
}

/// The result of testing a line against the boundary stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryType {
    /// The line is not a delimiter.
    None,
    /// The source is exhausted.
    Eos,
    /// The delimiter of the innermost multipart.
    ImmediateBoundary,
    /// The close-delimiter of the innermost multipart.
    ImmediateEndBoundary,
    /// The delimiter of some enclosing multipart.
    ParentBoundary,
    /// The close-delimiter of some enclosing multipart, or an mbox separator.
    ParentEndBoundary,
}

impl BoundaryType {
    /// Whether scanning stopped on a delimiter line (as opposed to running
    /// out of input or not stopping at all).
    pub fn is_delimiter(self) -> bool {
        !matches!(self, BoundaryType::None | BoundaryType::Eos)
    }

    pub fn is_parent(self) -> bool {
        matches!(
            self,
            BoundaryType::ParentBoundary | BoundaryType::ParentEndBoundary
        )
    }
}

/// The active delimiters, innermost last.
#[derive(Debug, Default)]
pub struct BoundaryStack {
    stack: Vec<Boundary>,
    /// When Content-Length framing is active for an mbox message, the offset
    /// before which `From ` lines are not separators.
    content_end: Option<u64>,
}

impl BoundaryStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the delimiter for a new multipart level.
    ///
    /// `boundary` is the raw `boundary` parameter, without the leading `--`.
    pub fn push(&mut self, boundary: &[u8]) {
        let boundary = Boundary::new(boundary, self.max_length());
        self.stack.push(boundary);
    }

    /// Push the mbox pseudo-boundary which terminates a whole message.
    pub fn push_mbox(&mut self) {
        self.stack.push(Boundary::mbox());
    }

    pub fn pop(&mut self) -> Option<Boundary> {
        self.stack.pop()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.content_end = None;
    }

    pub fn has_mbox(&self) -> bool {
        self.stack.first().map_or(false, Boundary::is_mbox)
    }

    pub fn set_content_end(&mut self, content_end: Option<u64>) {
        self.content_end = content_end;
    }

    /// The length of the longest marker currently active.
    pub fn max_length(&self) -> usize {
        self.stack.last().map_or(0, |b| b.max_length)
    }

    /// Whether a line starting with `first` could possibly be a delimiter.
    ///
    /// Lines for which this is false never need to be buffered in full.
    pub fn could_start_delimiter(&self, first: u8) -> bool {
        !self.stack.is_empty()
            && (b'-' == first || (b'F' == first && self.has_mbox()))
    }

    /// Test `line` (which may include its line ending) against every active
    /// delimiter, innermost first.
    ///
    /// `offset` is the stream offset at which `line` starts; it is only used
    /// for Content-Length framing of mbox messages.
    pub fn check(&self, line: &[u8], offset: u64) -> BoundaryType {
        let dashes = line.starts_with(b"--");
        let from = self.has_mbox() && line.starts_with(MBOX_FROM);
        if !dashes && !from {
            return BoundaryType::None;
        }

        let innermost = self.stack.len().saturating_sub(1);
        for (ix, boundary) in self.stack.iter().enumerate().rev() {
            let immediate = ix == innermost;

            if boundary.is_mbox {
                if from && self.content_end.map_or(true, |end| offset >= end)
                {
                    return if immediate {
                        BoundaryType::ImmediateEndBoundary
                    } else {
                        BoundaryType::ParentEndBoundary
                    };
                }

                continue;
            }

            if !dashes {
                continue;
            }

            if line.len() >= boundary.final_length
                && Boundary::matches(line, boundary.end_marker())
            {
                return if immediate {
                    BoundaryType::ImmediateEndBoundary
                } else {
                    BoundaryType::ParentEndBoundary
                };
            }

            if line.len() >= boundary.length
                && Boundary::matches(line, boundary.marker())
            {
                return if immediate {
                    BoundaryType::ImmediateBoundary
                } else {
                    BoundaryType::ParentBoundary
                };
            }
        }

        BoundaryType::None
    }
}

/// Whether `line` looks like an mbox separator, possibly munged with leading
/// `>` characters.
pub fn is_mbox_marker(line: &[u8], allow_munged: bool) -> bool {
    let unmunged = if allow_munged {
        let skip = line.iter().take_while(|&&b| b'>' == b).count();
        &line[skip..]
    } else {
        line
    };

    unmunged.starts_with(MBOX_FROM)
}
