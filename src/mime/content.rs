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

//! Scanning of content up to the next delimiter.

use super::boundary::{BoundaryStack, BoundaryType};
use super::buffer::ByteSource;
use super::input::{split_line_ending, Input};
use super::position::Position;
use super::visitor::{Section, Visitor};
use crate::support::error::Error;

/// The line endings seen in some content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NewlineFormat {
    /// No line endings at all.
    None,
    /// Only bare LF.
    Unix,
    /// Only CRLF.
    Dos,
    /// Both kinds.
    Mixed,
}

impl Default for NewlineFormat {
    fn default() -> Self {
        NewlineFormat::None
    }
}

impl NewlineFormat {
    /// Account for one more line ending.
    pub fn add(self, dos: bool) -> Self {
        match (self, dos) {
            (NewlineFormat::None, false) | (NewlineFormat::Unix, false) => {
                NewlineFormat::Unix
            }
            (NewlineFormat::None, true) | (NewlineFormat::Dos, true) => {
                NewlineFormat::Dos
            }
            _ => NewlineFormat::Mixed,
        }
    }
}

/// The result of scanning one run of content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentScan {
    pub begin: Position,
    pub length: u64,
    pub line_count: u64,
    pub newline: NewlineFormat,
    /// What stopped the scan. If this is a delimiter, the delimiter line has
    /// not been consumed, and the line ending before it is pending on the
    /// input.
    pub boundary: BoundaryType,
}

impl ContentScan {
    pub fn end_offset(&self) -> u64 {
        self.begin.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        0 == self.length
    }
}

/// Consume content until a delimiter line or the end of the input.
///
/// The content is delivered to `visitor` as `section` data in however many
/// pieces it takes, unless `deliver` is false. The line ending immediately
/// before a delimiter is not part of the content; it is left pending on
/// `input` for whoever consumes the delimiter.
///
/// Lines which could be delimiters are only classified once they are
/// complete, or once `scan_limit` bytes of them have been seen, so the result
/// does not depend on how the input happened to be split across reads.
pub fn scan_content<S, V>(
    input: &mut Input<S>,
    boundaries: &BoundaryStack,
    visitor: &mut V,
    section: Section,
    deliver: bool,
    scan_limit: usize,
) -> Result<ContentScan, Error>
where
    S: ByteSource,
    V: Visitor + ?Sized,
{
    debug_assert!(input.pending().is_empty());

    let limit = Input::<S>::scan_limit(boundaries, scan_limit);
    let begin = input.position();
    let mut length = 0u64;
    let mut newline = NewlineFormat::None;
    // Whether the cursor is in the middle of a line, which therefore cannot
    // be a delimiter.
    let mut midline = false;

    let boundary = loop {
        let len = if midline {
            input.peek_line(2)?
        } else {
            input.peek_line(limit)?
        };
        if 0 == len {
            break BoundaryType::Eos;
        }

        if !midline {
            let line = &input.data()[..len];
            let whole = line.ends_with(b"\n") || input.is_eos();
            if whole
                && len <= limit
                && boundaries.could_start_delimiter(line[0])
            {
                let boundary = boundaries.check(line, input.offset());
                if boundary.is_delimiter() {
                    break boundary;
                }
            }
        }

        // The line is content, so the line ending before it is too
        let pending = input.take_pending();
        if !pending.is_empty() {
            if deliver {
                visitor.section_data(section, pending)?;
            }
            length += pending.len() as u64;
        }

        let line = &input.data()[..len];
        if line.ends_with(b"\n") {
            let (body, ending) = split_line_ending(line);
            if deliver && !body.is_empty() {
                visitor.section_data(section, body)?;
            }
            length += body.len() as u64;
            newline = newline.add(2 == ending.len());
            input.consume(len);
            input.set_pending(ending.len());
            midline = false;
        } else {
            // A trailing CR may be the start of a CRLF
            let n = if !input.is_eos() && line.ends_with(b"\r") {
                len - 1
            } else {
                len
            };
            if deliver && n > 0 {
                visitor.section_data(section, &line[..n])?;
            }
            length += n as u64;
            input.consume(n);
            midline = true;
        }
    };

    // Nothing follows, so the final line ending belongs to the content
    if BoundaryType::Eos == boundary {
        let pending = input.take_pending();
        if !pending.is_empty() {
            if deliver {
                visitor.section_data(section, pending)?;
            }
            length += pending.len() as u64;
        }
    }

    let end_offset = begin.offset + length;
    debug_assert_eq!(
        input.offset(),
        end_offset + input.pending().len() as u64
    );

    Ok(ContentScan {
        begin,
        length,
        line_count: input.line_count(begin, end_offset, boundary),
        newline,
        boundary,
    })
}
