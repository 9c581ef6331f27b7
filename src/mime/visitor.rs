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

//! The event interface between the structural parser and its consumers.

use std::fmt;

use super::content::NewlineFormat;
use super::content_type::{Classification, EntityKind};
use super::header::RawHeader;
use super::position::Position;
use crate::support::error::Error;

/// The kinds of raw byte runs the parser delivers outside of headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    /// An mbox `From ` line, including the line ending of the previous
    /// message's final line if there was one.
    MboxMarker,
    /// Stray data before the first header of a message, such as a munged
    /// `>From ` line.
    PreHeader,
    /// The blank line ending a header block.
    BodySeparator,
    /// Content of a multipart before its first boundary.
    Preamble,
    /// A boundary line, including the line ending preceding it.
    Boundary,
    /// A close-delimiter line, including the line ending preceding it.
    EndBoundary,
    /// Content of a multipart after its close-delimiter.
    Epilogue,
    /// The content of a leaf entity.
    Content,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Section::MboxMarker => "mbox-marker",
            Section::PreHeader => "pre-header",
            Section::BodySeparator => "body-separator",
            Section::Preamble => "preamble",
            Section::Boundary => "boundary",
            Section::EndBoundary => "end-boundary",
            Section::Epilogue => "epilogue",
            Section::Content => "content",
        };
        f.write_str(s)
    }
}

/// The extent of something which has just ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub begin: Position,
    pub end_offset: u64,
    pub line_count: u64,
    /// The line endings seen within, if this is leaf content.
    pub newline: NewlineFormat,
}

impl Span {
    pub fn len(&self) -> u64 {
        self.end_offset - self.begin.offset
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset == self.begin.offset
    }
}

/// A visitor which receives events from the structural parser.
///
/// Every method has a no-op default, so visitors only implement what they
/// care about. Returning `Err` from any method stops parsing immediately and
/// the error is returned from the parser call that was running; use
/// `Error::Aborted` to stop for reasons of the visitor's own.
///
/// Events arrive in document order: a unit is begun before anything inside
/// it, and ended after everything inside it. Offsets never decrease from one
/// event to the next.
///
/// Methods are declared in the order they are usually called.
#[allow(unused_variables)]
pub trait Visitor {
    /// Whether the visitor wants leaf content delivered through
    /// `section_data()`.
    ///
    /// Visitors which read content out-of-band (by offset, from a seekable
    /// source) return false to save the copying. Boundaries, preambles,
    /// epilogues and the like are always delivered.
    fn wants_content(&self) -> bool {
        true
    }

    /// A top-level or embedded message is starting.
    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        Ok(())
    }

    /// A top-level entity, or a child of a multipart, is starting.
    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        Ok(())
    }

    fn begin_headers(&mut self, pos: Position) -> Result<(), Error> {
        Ok(())
    }

    /// A complete header, including any continuation lines and the final
    /// line ending.
    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        Ok(())
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        Ok(())
    }

    /// The body of the current unit is starting, and the headers have
    /// determined that it is of the given kind.
    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        pos: Position,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn begin_section(
        &mut self,
        section: Section,
        pos: Position,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Some bytes of the current section. A section may be delivered in any
    /// number of pieces.
    fn section_data(
        &mut self,
        section: Section,
        data: &[u8],
    ) -> Result<(), Error> {
        Ok(())
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn end_body(&mut self, kind: EntityKind, span: &Span) -> Result<(), Error> {
        Ok(())
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        Ok(())
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        Ok(())
    }
}

impl<V: Visitor + ?Sized> Visitor for &mut V {
    fn wants_content(&self) -> bool {
        (**self).wants_content()
    }

    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        (**self).begin_message(pos)
    }

    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        (**self).begin_part(pos)
    }

    fn begin_headers(&mut self, pos: Position) -> Result<(), Error> {
        (**self).begin_headers(pos)
    }

    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        (**self).header(header)
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        (**self).end_headers(span)
    }

    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        pos: Position,
    ) -> Result<(), Error> {
        (**self).begin_body(kind, classification, pos)
    }

    fn begin_section(
        &mut self,
        section: Section,
        pos: Position,
    ) -> Result<(), Error> {
        (**self).begin_section(section, pos)
    }

    fn section_data(
        &mut self,
        section: Section,
        data: &[u8],
    ) -> Result<(), Error> {
        (**self).section_data(section, data)
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        (**self).end_section(section, span)
    }

    fn end_body(&mut self, kind: EntityKind, span: &Span) -> Result<(), Error> {
        (**self).end_body(kind, span)
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        (**self).end_part(span)
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        (**self).end_message(span)
    }
}

/// A visitor which forwards every event to two others, in order.
#[derive(Debug)]
pub struct Tee<A, B>(pub A, pub B);

impl<A: Visitor, B: Visitor> Visitor for Tee<A, B> {
    fn wants_content(&self) -> bool {
        self.0.wants_content() || self.1.wants_content()
    }

    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        self.0.begin_message(pos)?;
        self.1.begin_message(pos)
    }

    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        self.0.begin_part(pos)?;
        self.1.begin_part(pos)
    }

    fn begin_headers(&mut self, pos: Position) -> Result<(), Error> {
        self.0.begin_headers(pos)?;
        self.1.begin_headers(pos)
    }

    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        self.0.header(header)?;
        self.1.header(header)
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        self.0.end_headers(span)?;
        self.1.end_headers(span)
    }

    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        pos: Position,
    ) -> Result<(), Error> {
        self.0.begin_body(kind, classification, pos)?;
        self.1.begin_body(kind, classification, pos)
    }

    fn begin_section(
        &mut self,
        section: Section,
        pos: Position,
    ) -> Result<(), Error> {
        self.0.begin_section(section, pos)?;
        self.1.begin_section(section, pos)
    }

    fn section_data(
        &mut self,
        section: Section,
        data: &[u8],
    ) -> Result<(), Error> {
        // Content may be requested by only one side
        if Section::Content != section || self.0.wants_content() {
            self.0.section_data(section, data)?;
        }
        if Section::Content != section || self.1.wants_content() {
            self.1.section_data(section, data)?;
        }
        Ok(())
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        self.0.end_section(section, span)?;
        self.1.end_section(section, span)
    }

    fn end_body(&mut self, kind: EntityKind, span: &Span) -> Result<(), Error> {
        self.0.end_body(kind, span)?;
        self.1.end_body(kind, span)
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        self.0.end_part(span)?;
        self.1.end_part(span)
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        self.0.end_message(span)?;
        self.1.end_message(span)
    }
}
