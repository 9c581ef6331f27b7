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

//! A visitor which writes a line of text for every event.
//!
//! Consecutive pieces of section data are merged into one line, so the log
//! of a given input is the same no matter how the input was split up while
//! reading it.

use std::fmt;
use std::io::Write;

use super::content::NewlineFormat;
use super::content_type::{Classification, EntityKind};
use super::header::RawHeader;
use super::position::Position;
use super::visitor::{Section, Span, Visitor};
use crate::support::error::Error;

struct Pos(Position);

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.0.offset, self.0.line_number)
    }
}

struct SpanFmt<'a>(&'a Span);

impl fmt::Display for SpanFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}..{} lines={}",
            Pos(self.0.begin),
            self.0.end_offset,
            self.0.line_count
        )
    }
}

/// Section data not yet written.
#[derive(Debug)]
struct PendingData {
    section: Section,
    /// The bytes which will be shown, at most `max_data` of them.
    shown: Vec<u8>,
    /// The total number of bytes seen.
    len: u64,
}

impl PendingData {
    fn new(section: Section) -> Self {
        PendingData {
            section,
            shown: Vec::new(),
            len: 0,
        }
    }

    fn push(&mut self, data: &[u8], max_data: usize) {
        let keep = if 0 == max_data {
            data.len()
        } else {
            max_data.saturating_sub(self.shown.len()).min(data.len())
        };
        self.shown.extend_from_slice(&data[..keep]);
        self.len += data.len() as u64;
    }
}

#[derive(Debug)]
pub struct EventLog<W = Vec<u8>> {
    out: W,
    data: Option<PendingData>,
    /// If non-zero, data lines show at most this many bytes, and no more
    /// than that is held in memory.
    max_data: usize,
}

impl Default for EventLog<Vec<u8>> {
    fn default() -> Self {
        EventLog::new(Vec::new(), 0)
    }
}

impl EventLog<Vec<u8>> {
    /// Finish the log and return its lines.
    pub fn into_lines(mut self) -> Vec<String> {
        // Writing to a Vec cannot fail
        let _ = self.flush_data();
        String::from_utf8_lossy(&self.out)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(out: W, max_data: usize) -> Self {
        EventLog {
            out,
            data: None,
            max_data,
        }
    }

    /// Write out anything buffered and return the underlying writer.
    pub fn into_inner(mut self) -> Result<W, Error> {
        self.flush_data()?;
        Ok(self.out)
    }

    fn flush_data(&mut self) -> Result<(), Error> {
        if let Some(data) = self.data.take() {
            writeln!(
                self.out,
                "data {} {:?}{}",
                data.section,
                String::from_utf8_lossy(&data.shown),
                if (data.shown.len() as u64) < data.len {
                    "..."
                } else {
                    ""
                }
            )?;
        }

        Ok(())
    }

    fn line(&mut self, args: fmt::Arguments<'_>) -> Result<(), Error> {
        self.flush_data()?;
        self.out.write_fmt(args)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> Visitor for EventLog<W> {
    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        self.line(format_args!("begin-message {}", Pos(pos)))
    }

    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        self.line(format_args!("begin-part {}", Pos(pos)))
    }

    fn begin_headers(&mut self, pos: Position) -> Result<(), Error> {
        self.line(format_args!("begin-headers {}", Pos(pos)))
    }

    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        self.line(format_args!(
            "header{} {} {:?}",
            if header.is_invalid() { "!" } else { "" },
            Pos(header.position()),
            String::from_utf8_lossy(header.raw())
        ))
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        self.line(format_args!("end-headers {}", SpanFmt(span)))
    }

    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        pos: Position,
    ) -> Result<(), Error> {
        self.line(format_args!(
            "begin-body {} {} {}",
            kind,
            classification.content_type,
            Pos(pos)
        ))
    }

    fn begin_section(
        &mut self,
        section: Section,
        pos: Position,
    ) -> Result<(), Error> {
        self.line(format_args!("begin-section {} {}", section, Pos(pos)))
    }

    fn section_data(
        &mut self,
        section: Section,
        data: &[u8],
    ) -> Result<(), Error> {
        match self.data {
            Some(ref mut pending) if pending.section == section => {
                pending.push(data, self.max_data)
            }
            _ => {
                self.flush_data()?;
                let mut pending = PendingData::new(section);
                pending.push(data, self.max_data);
                self.data = Some(pending);
            }
        }
        Ok(())
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        let newline = match span.newline {
            NewlineFormat::None => "",
            NewlineFormat::Unix => " unix",
            NewlineFormat::Dos => " dos",
            NewlineFormat::Mixed => " mixed",
        };
        self.line(format_args!(
            "end-section {} {}{}",
            section,
            SpanFmt(span),
            newline
        ))
    }

    fn end_body(&mut self, kind: EntityKind, span: &Span) -> Result<(), Error> {
        self.line(format_args!("end-body {} {}", kind, SpanFmt(span)))
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        self.line(format_args!("end-part {}", SpanFmt(span)))
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        self.line(format_args!("end-message {}", SpanFmt(span)))
    }
}
