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

//! Scanning of header blocks into raw header fields.
//!
//! Nothing here interprets header values; headers are captured as the exact
//! bytes that appeared in the input, folding and all, so that they can be
//! written back unchanged.

use std::borrow::Cow;
use std::fmt;

use log::warn;

use super::boundary::{is_mbox_marker, BoundaryStack, BoundaryType};
use super::buffer::ByteSource;
use super::content::NewlineFormat;
use super::input::Input;
use super::position::Position;
use super::visitor::{Section, Span, Visitor};
use crate::support::error::Error;

/// One header field exactly as it appeared in the input.
#[derive(Clone, PartialEq, Eq)]
pub struct RawHeader {
    offset: u64,
    line_number: u64,
    /// The full header, including continuation lines and the final line
    /// ending.
    raw: Vec<u8>,
    /// Index of the colon, or `None` if the first line was not a valid
    /// `name: value` line.
    colon: Option<usize>,
}

impl fmt::Debug for RawHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RawHeader@{}:{}{}({:?})",
            self.offset,
            self.line_number,
            if self.is_invalid() { "!" } else { "" },
            String::from_utf8_lossy(&self.raw)
        )
    }
}

impl RawHeader {
    pub fn parse(offset: u64, line_number: u64, raw: Vec<u8>) -> Self {
        let colon = field_name_end(&raw);
        RawHeader {
            offset,
            line_number,
            raw,
            colon,
        }
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

    /// The complete raw bytes of the header.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The bytes before the colon, or the whole header if it is invalid.
    pub fn raw_field(&self) -> &[u8] {
        match self.colon {
            Some(colon) => &self.raw[..colon],
            None => &self.raw,
        }
    }

    /// The bytes after the colon, including folding and the line ending.
    ///
    /// Empty for invalid headers.
    pub fn value(&self) -> &[u8] {
        match self.colon {
            Some(colon) => &self.raw[colon + 1..],
            None => &[],
        }
    }

    /// The field name with trailing whitespace removed.
    pub fn field(&self) -> Cow<'_, str> {
        match self.colon {
            Some(_) => {
                let field = self.raw_field();
                let len = field.len()
                    - field
                        .iter()
                        .rev()
                        .take_while(|&&b| b' ' == b || b'\t' == b)
                        .count();
                String::from_utf8_lossy(&field[..len])
            }
            None => Cow::Borrowed(""),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.colon.is_none()
    }

    /// Whether this is a valid header named `name`, ignoring case.
    pub fn is_named(&self, name: &str) -> bool {
        !self.is_invalid() && self.field().eq_ignore_ascii_case(name)
    }
}

/// If `line` starts with a valid field name followed by a colon, return the
/// index of the colon.
///
/// The name may not contain control characters, must not be empty, and may
/// only be followed by whitespace between its end and the colon.
pub fn field_name_end(line: &[u8]) -> Option<usize> {
    let mut seen_name = false;
    let mut seen_ws = false;

    for (ix, &b) in line.iter().enumerate() {
        match b {
            b':' => return if seen_name { Some(ix) } else { None },
            b' ' | b'\t' => seen_ws = true,
            b if b < b' ' || 0x7F == b => return None,
            _ if seen_ws => return None,
            _ => seen_name = true,
        }
    }

    None
}

/// How a header block ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadersEnd {
    /// The next line is the blank line separating the headers from the
    /// body. It has not been consumed.
    Blank,
    /// The next line is a delimiter (or mbox separator) of the given type.
    /// It has not been consumed.
    Delimiter(BoundaryType),
    /// The input ran out.
    Eos,
}

/// Options for one header block.
#[derive(Clone, Copy, Debug)]
pub struct HeaderContext {
    /// Whether this is the top-level header block of a parse call, where a
    /// block which does not start with a header is fatal.
    pub toplevel: bool,
    pub scan_limit: usize,
}

/// Reads header blocks, reusing its buffers from one block to the next.
#[derive(Debug, Default)]
pub struct HeaderScanner {
    headers: Vec<RawHeader>,
    scratch: Vec<u8>,
    /// Where the header in `scratch` started, if there is one.
    in_flight: Option<Position>,
}

impl HeaderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The headers of the most recently scanned block.
    pub fn headers(&self) -> &[RawHeader] {
        &self.headers
    }

    /// Scan one header block, starting at the start of a line.
    ///
    /// Each header is passed to `visitor` as soon as it is known to be
    /// complete. Stray data before the first header which looks like an mbox
    /// separator is delivered as a `PreHeader` section.
    pub fn scan<S, V>(
        &mut self,
        input: &mut Input<S>,
        boundaries: &BoundaryStack,
        visitor: &mut V,
        ctx: HeaderContext,
    ) -> Result<HeadersEnd, Error>
    where
        S: ByteSource,
        V: Visitor + ?Sized,
    {
        debug_assert!(input.pending().is_empty());

        self.headers.clear();
        self.scratch.clear();
        self.in_flight = None;

        let limit = Input::<S>::scan_limit(boundaries, ctx.scan_limit);
        let mut seen_pre_header = false;

        loop {
            if 0 == input.ensure(2)? {
                self.finish_header(visitor)?;
                return Ok(HeadersEnd::Eos);
            }

            let (first, second) = {
                let data = input.data();
                (data[0], data.get(1).copied())
            };

            // Only one byte available means this is the end of the input, so
            // a lone CR is a blank line too.
            if b'\n' == first
                || (b'\r' == first && second.map_or(true, |b| b'\n' == b))
            {
                self.finish_header(visitor)?;
                return Ok(HeadersEnd::Blank);
            }

            if (b' ' == first || b'\t' == first) && self.in_flight.is_some() {
                input.read_line_into(&mut self.scratch)?;
                continue;
            }

            self.finish_header(visitor)?;

            // Delimiters must be recognised before the line is consumed.
            // Message separators only count before the first header of a
            // top-level block; anywhere else they are just bad headers.
            let first_line =
                ctx.toplevel && self.headers.is_empty() && !seen_pre_header;
            if b'-' == first || (b'F' == first && first_line) {
                let len = input.peek_line(limit)?;
                let line = &input.data()[..len];
                if len <= limit && (line.ends_with(b"\n") || input.is_eos()) {
                    if field_name_end(line).is_none() {
                        let boundary = boundaries.check(line, input.offset());
                        if boundary.is_delimiter() {
                            return Ok(HeadersEnd::Delimiter(boundary));
                        }
                    }
                }
            }

            let pos = input.position();
            input.read_line_into(&mut self.scratch)?;
            if field_name_end(&self.scratch).is_some() {
                self.in_flight = Some(pos);
                continue;
            }

            if self.headers.is_empty()
                && !seen_pre_header
                && is_mbox_marker(&self.scratch, true)
            {
                seen_pre_header = true;
                self.pre_header(input, visitor, pos)?;
                continue;
            }

            if ctx.toplevel && self.headers.is_empty() {
                return Err(Error::MissingHeaders { offset: pos.offset });
            }

            warn!(
                "Invalid header line at offset {}: {:?}",
                pos.offset,
                String::from_utf8_lossy(
                    &self.scratch[..self.scratch.len().min(64)]
                )
            );
            self.in_flight = Some(pos);
        }
    }

    fn pre_header<S, V>(
        &mut self,
        input: &Input<S>,
        visitor: &mut V,
        pos: Position,
    ) -> Result<(), Error>
    where
        S: ByteSource,
        V: Visitor + ?Sized,
    {
        visitor.begin_section(Section::PreHeader, pos)?;
        visitor.section_data(Section::PreHeader, &self.scratch)?;
        visitor.end_section(
            Section::PreHeader,
            &Span {
                begin: pos,
                end_offset: input.offset(),
                line_count: 1,
                newline: NewlineFormat::None,
            },
        )?;
        self.scratch.clear();
        Ok(())
    }

    fn finish_header<V: Visitor + ?Sized>(
        &mut self,
        visitor: &mut V,
    ) -> Result<(), Error> {
        if let Some(pos) = self.in_flight.take() {
            let header = RawHeader::parse(
                pos.offset,
                pos.line_number,
                self.scratch.clone(),
            );
            self.scratch.clear();
            visitor.header(&header)?;
            self.headers.push(header);
        }

        Ok(())
    }
}
