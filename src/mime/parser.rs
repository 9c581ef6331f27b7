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

//! The structural driver.
//!
//! `MimeParser` walks a byte source as a tree of messages and entities,
//! pulling header blocks and content through the scanners and reporting
//! everything it sees to a `Visitor`. Nothing is retained once it has been
//! reported, other than the headers of the entity currently being
//! classified, so memory use is bounded by the nesting depth and the size of
//! the largest header block rather than by the size of the input.

use log::{debug, trace, warn};

use super::boundary::{BoundaryStack, BoundaryType, MBOX_FROM};
use super::buffer::ByteSource;
use super::content::{scan_content, ContentScan, NewlineFormat};
use super::content_type::{
    classify, content_length, ContentType, DefaultClassifier,
    EntityClassifier, EntityKind,
};
use super::header::{HeaderContext, HeaderScanner, HeadersEnd};
use super::input::Input;
use super::position::Position;
use super::visitor::{Section, Span, Visitor};
use crate::support::cancel::CancelToken;
use crate::support::config::{Format, ParserConfig};
use crate::support::error::Error;

/// Where the parser is.
///
/// This is mostly informational; the only states that affect what the next
/// call does are `Eos`, which makes further parse calls report that there is
/// nothing left, and `Error`, which makes them fail until `reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Initialized,
    /// Looking for an mbox `From ` line.
    MboxMarker,
    /// Reading the headers of a top-level message.
    MessageHeaders,
    /// Reading the headers of anything else.
    Headers,
    Content,
    Boundary,
    /// One top-level unit has been parsed and there may be more input.
    Complete,
    Eos,
    Error,
}

pub struct MimeParser<S, V> {
    input: Input<S>,
    visitor: V,
    config: ParserConfig,
    classifier: Box<dyn EntityClassifier>,
    boundaries: BoundaryStack,
    headers: HeaderScanner,
    state: State,
    /// The number of multipart or message bodies enclosing the current
    /// point.
    depth: u32,
}

impl<S: ByteSource, V: Visitor> MimeParser<S, V> {
    pub fn new(
        source: S,
        visitor: V,
        config: ParserConfig,
    ) -> Result<Self, Error> {
        Ok(MimeParser {
            input: Input::new(source)?,
            visitor,
            config,
            classifier: Box::new(DefaultClassifier),
            boundaries: BoundaryStack::new(),
            headers: HeaderScanner::new(),
            state: State::Initialized,
            depth: 0,
        })
    }

    /// Use `classifier` to decide which Content-Types are multiparts or
    /// embedded messages.
    pub fn with_classifier(
        mut self,
        classifier: Box<dyn EntityClassifier>,
    ) -> Self {
        self.classifier = classifier;
        self
    }

    /// Have the parser fail with `Error::Cancelled` the next time it would
    /// read from the source after `cancel` is cancelled.
    pub fn set_cancel_token(&mut self, cancel: Option<CancelToken>) {
        self.input.set_cancel_token(cancel);
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    /// Access the source, for example to read leaf content out-of-band
    /// between parse calls. Seekable sources are repositioned automatically
    /// before the parser next reads.
    pub fn source_mut(&mut self) -> &mut S {
        self.input.source_mut()
    }

    pub fn into_parts(self) -> (S, V) {
        (self.input.into_source(), self.visitor)
    }

    /// The offset of the next byte the parser will examine.
    pub fn offset(&self) -> u64 {
        self.input.offset()
    }

    /// Discard all state, including any buffered input, so that the parser
    /// can be used again after an error or cancellation.
    ///
    /// Parsing resumes at the source's current position (for seekable
    /// sources) or at the next unread byte, on line 1.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.input.reset()?;
        self.boundaries.clear();
        self.depth = 0;
        self.transition(State::Initialized);
        Ok(())
    }

    /// Parse one message.
    ///
    /// With mbox framing, this finds the next `From ` line and parses the
    /// message after it, returning `false` if the input ends first. With
    /// entity framing, the whole input is one message; the first call parses
    /// it and later calls return `false`.
    pub fn parse_message(&mut self) -> Result<bool, Error> {
        self.guard(|this| match this.config.format {
            Format::Mbox => this.mbox_message(),
            Format::Entity => this.entity_message(true),
        })
    }

    /// Parse every remaining message in an mbox, returning how many there
    /// were.
    pub fn parse_mbox(&mut self) -> Result<u64, Error> {
        let mut count = 0;
        while self.parse_message()? {
            count += 1;
        }
        Ok(count)
    }

    /// Parse the input as a single top-level entity, with no message
    /// wrapper and no mbox framing.
    pub fn parse_entity(&mut self) -> Result<(), Error> {
        self.guard(|this| this.entity_message(false).map(|_| ()))
    }

    fn guard<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if State::Error == self.state {
            return Err(Error::ParserFailed);
        }

        let result = f(self);
        if let Err(ref e) = result {
            if e.is_fatal() {
                debug!("Parser failed at offset {}: {}", self.offset(), e);
                self.transition(State::Error);
            }
        }
        result
    }

    fn transition(&mut self, state: State) {
        if state != self.state {
            trace!(
                "{:?} -> {:?} at offset {}",
                self.state,
                state,
                self.input.offset()
            );
            self.state = state;
        }
    }

    fn entity_message(&mut self, as_message: bool) -> Result<bool, Error> {
        if State::Eos == self.state || State::Complete == self.state {
            return Ok(false);
        }

        self.boundaries.clear();
        if 0 == self.input.ensure(1)? {
            self.transition(State::Eos);
            return Err(Error::MissingHeaders {
                offset: self.input.offset(),
            });
        }

        if as_message {
            self.message(true)?;
        } else {
            self.part(true, &ContentType::text_plain())?;
        }

        self.transition(State::Eos);
        Ok(true)
    }

    fn mbox_message(&mut self) -> Result<bool, Error> {
        if State::Eos == self.state {
            return Ok(false);
        }

        self.boundaries.clear();
        if !self.mbox_marker()? {
            self.transition(State::Eos);
            return Ok(false);
        }

        self.boundaries.push_mbox();
        self.message(true)?;
        self.boundaries.clear();
        self.transition(State::Complete);
        Ok(true)
    }

    /// Find and consume the next `From ` line.
    ///
    /// The line ending left pending by the previous message, and anything
    /// between it and the `From ` line, are delivered as part of the marker
    /// section. Returns false if there is no further marker and nothing
    /// before the end of the input.
    fn mbox_marker(&mut self) -> Result<bool, Error> {
        self.transition(State::MboxMarker);

        let limit = self.config.scan_limit.max(2) + MBOX_FROM.len();
        let begin = self.input.pending_position();
        let mut begun = false;
        let mut midline = false;
        let mut line_count = 0;

        loop {
            let len = self.input.peek_line(limit)?;
            if 0 == len {
                if begun || !self.input.pending().is_empty() {
                    return Err(Error::MissingMboxMarker {
                        offset: self.input.offset(),
                    });
                }

                return Ok(false);
            }

            if !begun {
                self.visitor.begin_section(Section::MboxMarker, begin)?;
                begun = true;
            }

            let pending = self.input.take_pending();
            if !pending.is_empty() {
                self.visitor.section_data(Section::MboxMarker, pending)?;
            }

            let line = &self.input.data()[..len];
            let complete = line.ends_with(b"\n");
            let found = !midline
                && len <= limit
                && (complete || self.input.is_eos())
                && line.starts_with(MBOX_FROM);
            if !found && 0 == line_count && !midline {
                warn!(
                    "Skipping data before mbox marker at offset {}",
                    self.input.offset()
                );
            }

            self.visitor.section_data(Section::MboxMarker, line)?;
            self.input.consume(len);
            midline = !complete;
            if complete || found {
                line_count += 1;
            }

            if found {
                self.visitor.end_section(
                    Section::MboxMarker,
                    &Span {
                        begin,
                        end_offset: self.input.offset(),
                        line_count,
                        newline: NewlineFormat::None,
                    },
                )?;
                return Ok(true);
            }
        }
    }

    /// Parse a message: a header block and a body.
    fn message(&mut self, toplevel: bool) -> Result<BoundaryType, Error> {
        let begin = self.input.position();
        self.visitor.begin_message(begin)?;
        let boundary = self.entity(toplevel, true, &ContentType::text_plain())?;
        let span = self.span_to_here(begin, boundary, NewlineFormat::None);
        self.visitor.end_message(&span)?;
        Ok(boundary)
    }

    /// Parse a top-level entity or the child of a multipart.
    fn part(
        &mut self,
        toplevel: bool,
        default_type: &ContentType,
    ) -> Result<BoundaryType, Error> {
        let begin = self.input.position();
        self.visitor.begin_part(begin)?;
        let boundary = self.entity(toplevel, false, default_type)?;
        let span = self.span_to_here(begin, boundary, NewlineFormat::None);
        self.visitor.end_part(&span)?;
        Ok(boundary)
    }

    /// The span from `begin` to the end of whatever was just parsed, which
    /// stopped because of `boundary`.
    fn span_to_here(
        &self,
        begin: Position,
        boundary: BoundaryType,
        newline: NewlineFormat,
    ) -> Span {
        let end_offset = self.input.pending_position().offset;
        Span {
            begin,
            end_offset,
            line_count: self.input.line_count(begin, end_offset, boundary),
            newline,
        }
    }

    fn entity(
        &mut self,
        toplevel: bool,
        is_message: bool,
        default_type: &ContentType,
    ) -> Result<BoundaryType, Error> {
        self.transition(if toplevel && is_message {
            State::MessageHeaders
        } else {
            State::Headers
        });

        let headers_begin = self.input.position();
        self.visitor.begin_headers(headers_begin)?;
        let headers_end = self.headers.scan(
            &mut self.input,
            &self.boundaries,
            &mut self.visitor,
            HeaderContext {
                toplevel,
                scan_limit: self.config.scan_limit,
            },
        )?;
        let span = self.span_to_here(
            headers_begin,
            BoundaryType::Eos,
            NewlineFormat::None,
        );
        self.visitor.end_headers(&span)?;

        let classification = classify(
            self.headers.headers(),
            default_type,
            &*self.classifier,
        );
        let content_length = if toplevel
            && Format::Mbox == self.config.format
            && self.config.respect_content_length
        {
            content_length(self.headers.headers())
        } else {
            None
        };

        let mut kind = classification.kind;
        if EntityKind::MimePart != kind && self.depth >= self.config.max_depth
        {
            debug!(
                "Nesting limit {} reached at offset {}; treating {} as opaque",
                self.config.max_depth,
                self.input.offset(),
                classification.content_type
            );
            kind = EntityKind::MimePart;
        }

        let boundary = match headers_end {
            HeadersEnd::Blank => {
                self.body_separator()?;
                None
            }
            HeadersEnd::Delimiter(boundary) => Some(boundary),
            HeadersEnd::Eos => Some(BoundaryType::Eos),
        };

        let body_begin = self.input.position();
        self.visitor.begin_body(kind, &classification, body_begin)?;

        // No blank line means no body at all
        if let Some(boundary) = boundary {
            let span = Span {
                begin: body_begin,
                end_offset: body_begin.offset,
                line_count: 0,
                newline: NewlineFormat::None,
            };
            self.visitor.end_body(kind, &span)?;
            return Ok(boundary);
        }

        if let Some(length) = content_length {
            match body_begin.offset.checked_add(length) {
                Some(end) => {
                    debug!(
                        "Content-Length {} bounds message body at offset {}",
                        length, body_begin.offset
                    );
                    self.boundaries.set_content_end(Some(end));
                }
                None => warn!(
                    "Ignoring Content-Length {} at offset {}: out of range",
                    length, body_begin.offset
                ),
            }
        }

        let (boundary, newline) = match kind {
            EntityKind::MimePart => {
                let scan = self.leaf()?;
                (scan.boundary, scan.newline)
            }
            EntityKind::MessagePart => {
                self.depth += 1;
                let result = self.message(false);
                self.depth -= 1;
                (result?, NewlineFormat::None)
            }
            EntityKind::Multipart => {
                self.depth += 1;
                let result = self.multipart(&classification.content_type);
                self.depth -= 1;
                (result?, NewlineFormat::None)
            }
        };

        let span = self.span_to_here(body_begin, boundary, newline);
        self.visitor.end_body(kind, &span)?;
        Ok(boundary)
    }

    /// Consume the blank line after a header block.
    fn body_separator(&mut self) -> Result<(), Error> {
        let begin = self.input.position();
        self.input.ensure(2)?;
        let data = self.input.data();
        let (len, newline) = if data.starts_with(b"\r\n") {
            (2, NewlineFormat::Dos)
        } else if data.starts_with(b"\n") {
            (1, NewlineFormat::Unix)
        } else {
            // A lone CR at the end of the input
            (1, NewlineFormat::None)
        };

        self.visitor.begin_section(Section::BodySeparator, begin)?;
        self.visitor
            .section_data(Section::BodySeparator, &self.input.data()[..len])?;
        self.input.consume(len);
        self.visitor.end_section(
            Section::BodySeparator,
            &Span {
                begin,
                end_offset: self.input.offset(),
                line_count: 1,
                newline,
            },
        )
    }

    /// Scan content as `section` through to the next delimiter.
    fn content_section(
        &mut self,
        section: Section,
        deliver: bool,
    ) -> Result<ContentScan, Error> {
        self.transition(State::Content);

        let begin = self.input.position();
        self.visitor.begin_section(section, begin)?;
        let scan = scan_content(
            &mut self.input,
            &self.boundaries,
            &mut self.visitor,
            section,
            deliver,
            self.config.scan_limit,
        )?;
        self.visitor.end_section(
            section,
            &Span {
                begin,
                end_offset: scan.end_offset(),
                line_count: scan.line_count,
                newline: scan.newline,
            },
        )?;
        Ok(scan)
    }

    fn leaf(&mut self) -> Result<ContentScan, Error> {
        let deliver = self.visitor.wants_content();
        self.content_section(Section::Content, deliver)
    }

    fn multipart(
        &mut self,
        content_type: &ContentType,
    ) -> Result<BoundaryType, Error> {
        let boundary = match content_type.boundary() {
            Some(boundary) => boundary.to_vec(),
            None => {
                warn!(
                    "{} at offset {} has no boundary",
                    content_type,
                    self.input.offset()
                );
                return Ok(self.content_section(Section::Preamble, true)?.boundary);
            }
        };

        let child_default = if content_type.is_subtype("digest") {
            ContentType::message_rfc822()
        } else {
            ContentType::text_plain()
        };

        self.boundaries.push(&boundary);
        let result = self.multipart_children(&child_default);
        self.boundaries.pop();

        match result? {
            BoundaryType::ImmediateEndBoundary => {
                Ok(self.content_section(Section::Epilogue, true)?.boundary)
            }
            boundary if boundary.is_parent() => {
                warn!(
                    "Multipart ended without its end boundary at offset {}",
                    self.input.offset()
                );
                self.recheck_delimiter()
            }
            _ => {
                warn!("Multipart truncated by end of input");
                Ok(BoundaryType::Eos)
            }
        }
    }

    /// Parse the preamble, children and end boundary of a multipart whose
    /// boundary is innermost on the stack.
    ///
    /// Returns `ImmediateEndBoundary` if the end boundary was found and
    /// consumed, or whatever else stopped the parse.
    fn multipart_children(
        &mut self,
        child_default: &ContentType,
    ) -> Result<BoundaryType, Error> {
        let mut boundary = self.content_section(Section::Preamble, true)?.boundary;

        loop {
            match boundary {
                BoundaryType::ImmediateBoundary => {
                    self.delimiter(Section::Boundary)?;
                    boundary = match self.peek_delimiter()? {
                        Some(next) => {
                            debug!(
                                "Skipping empty multipart child at offset {}",
                                self.input.offset()
                            );
                            next
                        }
                        None => self.part(false, child_default)?,
                    };
                }

                BoundaryType::ImmediateEndBoundary => {
                    self.delimiter(Section::EndBoundary)?;
                    return Ok(boundary);
                }

                _ => return Ok(boundary),
            }
        }
    }

    /// Consume the delimiter line at the cursor, along with the pending line
    /// ending before it.
    fn delimiter(&mut self, section: Section) -> Result<(), Error> {
        self.transition(State::Boundary);

        let begin = self.input.pending_position();
        self.visitor.begin_section(section, begin)?;
        let pending = self.input.take_pending();
        if !pending.is_empty() {
            self.visitor.section_data(section, pending)?;
        }

        let limit =
            Input::<S>::scan_limit(&self.boundaries, self.config.scan_limit);
        let len = self.input.peek_line(limit)?;
        self.visitor
            .section_data(section, &self.input.data()[..len])?;
        self.input.consume(len);

        self.visitor.end_section(
            section,
            &Span {
                begin,
                end_offset: self.input.offset(),
                line_count: 1,
                newline: NewlineFormat::None,
            },
        )
    }

    /// If the line at the cursor is a delimiter, or there is no more input,
    /// return what it is without consuming anything.
    fn peek_delimiter(&mut self) -> Result<Option<BoundaryType>, Error> {
        let limit =
            Input::<S>::scan_limit(&self.boundaries, self.config.scan_limit);
        let len = self.input.peek_line(limit)?;
        if 0 == len {
            return Ok(Some(BoundaryType::Eos));
        }

        let line = &self.input.data()[..len];
        if len <= limit && (line.ends_with(b"\n") || self.input.is_eos()) {
            let boundary = self.boundaries.check(line, self.input.offset());
            if boundary.is_delimiter() {
                return Ok(Some(boundary));
            }
        }

        Ok(None)
    }

    /// Classify the delimiter at the cursor again after the boundary stack
    /// has been popped.
    fn recheck_delimiter(&mut self) -> Result<BoundaryType, Error> {
        let boundary = self.peek_delimiter()?.unwrap_or(BoundaryType::Eos);
        debug_assert!(boundary.is_delimiter());
        Ok(boundary)
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::super::buffer::{Seekable, Sequential, Trickle};
    use super::super::content_type::Classification;
    use super::super::event_log::EventLog;
    use super::super::header::RawHeader;
    use super::*;

    /// Parse `data` read `max` bytes at a time, returning the event log with
    /// any error appended.
    fn parse_events(data: &[u8], config: ParserConfig, max: usize) -> Vec<String> {
        crate::init_test_log();
        let mut parser = MimeParser::new(
            Sequential(Trickle { data, max }),
            EventLog::default(),
            config,
        )
        .unwrap();
        let result = parser.parse_mbox();
        let (_, log) = parser.into_parts();
        let mut lines = log.into_lines();
        if let Err(e) = result {
            lines.push(format!("error {}", e));
        }
        lines
    }

    fn events(data: &[u8]) -> Vec<String> {
        parse_events(data, ParserConfig::default(), data.len().max(1))
    }

    /// Records the shape of the parse and all delivered bytes.
    #[derive(Debug, Default)]
    struct Shape {
        data: Vec<u8>,
        bodies: Vec<(EntityKind, Span)>,
        headers: Vec<RawHeader>,
        sections: Vec<(Section, Span)>,
        messages: Vec<Span>,
        parts: Vec<Span>,
        depth: u32,
        max_depth: u32,
        /// Messages begun but not yet ended.
        open_messages: u32,
        toplevel_messages: u32,
    }

    impl Visitor for Shape {
        fn begin_message(&mut self, _: Position) -> Result<(), Error> {
            if 0 == self.open_messages {
                self.toplevel_messages += 1;
            }
            self.open_messages += 1;
            Ok(())
        }

        fn begin_body(
            &mut self,
            _: EntityKind,
            _: &Classification,
            _: Position,
        ) -> Result<(), Error> {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
            Ok(())
        }

        fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
            self.data.extend_from_slice(header.raw());
            self.headers.push(header.clone());
            Ok(())
        }

        fn section_data(
            &mut self,
            _: Section,
            data: &[u8],
        ) -> Result<(), Error> {
            self.data.extend_from_slice(data);
            Ok(())
        }

        fn end_section(
            &mut self,
            section: Section,
            span: &Span,
        ) -> Result<(), Error> {
            self.sections.push((section, *span));
            Ok(())
        }

        fn end_body(
            &mut self,
            kind: EntityKind,
            span: &Span,
        ) -> Result<(), Error> {
            self.depth -= 1;
            self.bodies.push((kind, *span));
            Ok(())
        }

        fn end_part(&mut self, span: &Span) -> Result<(), Error> {
            self.parts.push(*span);
            Ok(())
        }

        fn end_message(&mut self, span: &Span) -> Result<(), Error> {
            self.open_messages -= 1;
            self.messages.push(*span);
            Ok(())
        }
    }

    fn shape(data: &[u8], config: ParserConfig) -> Shape {
        crate::init_test_log();
        let mut parser =
            MimeParser::new(Sequential(Trickle { data, max: 7 }), Shape::default(), config)
                .unwrap();
        parser.parse_mbox().unwrap();
        let (_, shape) = parser.into_parts();
        assert_eq!(
            String::from_utf8_lossy(data),
            String::from_utf8_lossy(&shape.data)
        );
        shape
    }

    fn content_sections(shape: &Shape) -> Vec<Span> {
        shape
            .sections
            .iter()
            .filter(|&&(s, _)| Section::Content == s)
            .map(|&(_, span)| span)
            .collect()
    }

    #[test]
    fn simple_message_line_counts() {
        let s = shape(b"A: 1\r\nB: 2\r\n\r\nhello\r\n", ParserConfig::default());
        let content = content_sections(&s);
        assert_eq!(1, content.len());
        assert_eq!(14, content[0].begin.offset);
        assert_eq!(4, content[0].begin.line_number);
        assert_eq!(7, content[0].len());
        assert_eq!(1, content[0].line_count);
        assert_eq!(NewlineFormat::Dos, content[0].newline);

        assert_eq!(1, s.messages.len());
        assert_eq!(0, s.messages[0].begin.offset);
        assert_eq!(21, s.messages[0].end_offset);
        assert_eq!(4, s.messages[0].line_count);
        assert_eq!(2, s.headers.len());
    }

    #[test]
    fn simple_message_events() {
        assert_eq!(
            vec![
                "begin-message 0:1",
                "begin-headers 0:1",
                "header 0:1 \"A: 1\\r\\n\"",
                "header 6:2 \"B: 2\\r\\n\"",
                "end-headers 0:1..12 lines=2",
                "begin-section body-separator 12:3",
                "data body-separator \"\\r\\n\"",
                "end-section body-separator 12:3..14 lines=1 dos",
                "begin-body mime-part text/plain 14:4",
                "begin-section content 14:4",
                "data content \"hello\\r\\n\"",
                "end-section content 14:4..21 lines=1 dos",
                "end-body mime-part 14:4..21 lines=1",
                "end-message 0:1..21 lines=4",
            ],
            events(b"A: 1\r\nB: 2\r\n\r\nhello\r\n")
        );
    }

    const MULTIPART: &[u8] = b"Content-Type: multipart/mixed; boundary=outer\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: text/plain\r\n\
\r\n\
first\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
\r\n\
alt one\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>alt two</p>\r\n\
--inner--\r\n\
inner epilogue\r\n\
--outer\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
Subject: embedded\r\n\
\r\n\
embedded body\r\n\
--outer--\r\n\
epilogue\r\n";

    #[test]
    fn nested_multipart_structure() {
        let s = shape(MULTIPART, ParserConfig::default());
        let kinds: Vec<EntityKind> = s.bodies.iter().map(|b| b.0).collect();
        // Bodies end innermost first
        assert_eq!(
            vec![
                EntityKind::MimePart,
                EntityKind::MimePart,
                EntityKind::MimePart,
                EntityKind::Multipart,
                EntityKind::MimePart,
                EntityKind::MessagePart,
                EntityKind::Multipart,
            ],
            kinds
        );
        assert_eq!(3, s.max_depth);
        // Three children of the outer, two of the inner
        assert_eq!(5, s.parts.len());
        assert_eq!(2, s.messages.len());

        let content = content_sections(&s);
        let texts: Vec<&[u8]> = content
            .iter()
            .map(|span| {
                &MULTIPART[span.begin.offset as usize..span.end_offset as usize]
            })
            .collect();
        assert_eq!(
            vec![
                &b"first"[..],
                &b"alt one"[..],
                &b"<p>alt two</p>"[..],
                &b"embedded body"[..],
            ],
            texts
        );

        let sections: Vec<Section> = s.sections.iter().map(|s| s.0).collect();
        assert_eq!(
            2,
            sections.iter().filter(|&&s| Section::Epilogue == s).count()
        );
        assert_eq!(
            2,
            sections.iter().filter(|&&s| Section::EndBoundary == s).count()
        );
        assert_eq!(
            5,
            sections.iter().filter(|&&s| Section::Boundary == s).count()
        );
    }

    #[test]
    fn inner_part_line_numbers() {
        let s = shape(MULTIPART, ParserConfig::default());
        let content = content_sections(&s);
        // "first" is on line 7
        assert_eq!(7, content[0].begin.line_number);
        assert_eq!(1, content[0].line_count);
        // The empty-header part of the alternative starts with its blank line
        assert_eq!(13, content[1].begin.line_number);
    }

    #[test]
    fn parent_boundary_closes_child() {
        let data = b"Content-Type: multipart/mixed; boundary=a\r\n\
\r\n\
--a\r\n\
Content-Type: multipart/mixed; boundary=b\r\n\
\r\n\
--b\r\n\
\r\n\
inner\r\n\
--a\r\n\
\r\n\
second\r\n\
--a--\r\n";
        let s = shape(data, ParserConfig::default());
        let content = content_sections(&s);
        assert_eq!(2, content.len());
        assert_eq!(
            b"inner",
            &data[content[0].begin.offset as usize
                ..content[0].end_offset as usize]
        );
        assert_eq!(
            b"second",
            &data[content[1].begin.offset as usize
                ..content[1].end_offset as usize]
        );
        // Inner multipart has no epilogue, outer does
        let epilogues = s
            .sections
            .iter()
            .filter(|&&(s, _)| Section::Epilogue == s)
            .count();
        assert_eq!(1, epilogues);
    }

    #[test]
    fn parent_end_boundary_closes_everything() {
        let data = b"Content-Type: multipart/mixed; boundary=a\r\n\
\r\n\
--a\r\n\
Content-Type: multipart/mixed; boundary=b\r\n\
\r\n\
--b\r\n\
\r\n\
inner\r\n\
--a--\r\n\
after\r\n";
        let s = shape(data, ParserConfig::default());
        let epilogue = s
            .sections
            .iter()
            .find(|&&(s, _)| Section::Epilogue == s)
            .unwrap()
            .1;
        assert_eq!(
            b"after\r\n",
            &data[epilogue.begin.offset as usize..]
        );
    }

    #[test]
    fn empty_multipart() {
        let data = b"Content-Type: multipart/mixed; boundary=x\r\n\
\r\n\
--x\r\n\
--x--\r\n";
        let s = shape(data, ParserConfig::default());
        assert!(s.parts.is_empty());
        assert_eq!(1, s.bodies.len());
        assert_eq!(EntityKind::Multipart, s.bodies[0].0);
        let sections: Vec<(Section, u64)> =
            s.sections.iter().map(|&(s, span)| (s, span.len())).collect();
        assert_eq!(
            vec![
                (Section::BodySeparator, 2),
                (Section::Preamble, 0),
                (Section::Boundary, 5),
                (Section::EndBoundary, 7),
                (Section::Epilogue, 0),
            ],
            sections
        );
    }

    #[test]
    fn multipart_without_boundary_is_all_preamble() {
        let data = b"Content-Type: multipart/mixed\r\n\r\n--x\r\nstuff\r\n";
        let s = shape(data, ParserConfig::default());
        assert!(s.parts.is_empty());
        let preamble = s.sections.last().unwrap();
        assert_eq!(Section::Preamble, preamble.0);
        assert_eq!(2, preamble.1.line_count);
        assert_eq!(data.len() as u64, preamble.1.end_offset);
    }

    #[test]
    fn missing_end_boundary() {
        let data = b"Content-Type: multipart/mixed; boundary=x\r\n\
\r\n\
--x\r\n\
\r\n\
body\r\n";
        let s = shape(data, ParserConfig::default());
        assert_eq!(1, s.parts.len());
        let content = content_sections(&s);
        assert_eq!(b"body\r\n".len() as u64, content[0].len());
        assert!(!s.sections.iter().any(|&(s, _)| Section::Epilogue == s));
    }

    #[test]
    fn digest_children_default_to_messages() {
        let data = b"Content-Type: multipart/digest; boundary=d\r\n\
\r\n\
--d\r\n\
\r\n\
Subject: one\r\n\
\r\n\
body\r\n\
--d--\r\n";
        let s = shape(data, ParserConfig::default());
        assert!(s
            .bodies
            .iter()
            .any(|&(kind, _)| EntityKind::MessagePart == kind));
    }

    #[test]
    fn encoded_message_is_opaque() {
        let data = b"Content-Type: multipart/mixed; boundary=x\r\n\
\r\n\
--x\r\n\
Content-Type: message/rfc822\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
U3ViamVjdDogeAoKeQo=\r\n\
--x--\r\n";
        let s = shape(data, ParserConfig::default());
        assert_eq!(1, s.messages.len());
        assert_eq!(EntityKind::MimePart, s.bodies[0].0);
    }

    fn nested(depth: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..depth {
            data.extend_from_slice(
                format!(
                    "Content-Type: multipart/mixed; boundary=b{}\r\n\r\n--b{}\r\n",
                    i, i
                )
                .as_bytes(),
            );
        }
        data.extend_from_slice(b"\r\nleaf\r\n");
        for i in (0..depth).rev() {
            data.extend_from_slice(format!("--b{}--\r\n", i).as_bytes());
        }
        data
    }

    #[test]
    fn depth_limit() {
        let data = nested(10);
        let s = shape(&data, ParserConfig::default());
        assert_eq!(11, s.max_depth);

        let config = ParserConfig {
            max_depth: 3,
            ..ParserConfig::default()
        };
        let s = shape(&data, config);
        assert_eq!(4, s.max_depth);
        // The fourth multipart is a leaf containing everything below it
        let opaque = s
            .bodies
            .iter()
            .filter(|&&(kind, _)| EntityKind::MimePart == kind)
            .count();
        assert_eq!(1, opaque);
    }

    #[test]
    fn adversarial_depth_is_bounded() {
        let data = nested(2000);
        let s = shape(&data, ParserConfig::default());
        assert_eq!(DEFAULT_DEPTH_PLUS_LEAF, s.max_depth);
    }

    const DEFAULT_DEPTH_PLUS_LEAF: u32 =
        crate::support::config::DEFAULT_MAX_DEPTH + 1;

    #[test]
    fn invalid_header_in_nested_part() {
        let data = b"Content-Type: multipart/mixed; boundary=x\r\n\
\r\n\
--x\r\n\
X Y: z\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n\
--x--\r\n";
        let s = shape(data, ParserConfig::default());
        let invalid: Vec<&RawHeader> =
            s.headers.iter().filter(|h| h.is_invalid()).collect();
        assert_eq!(1, invalid.len());
        assert_eq!(b"X Y: z\r\n", invalid[0].raw());
    }

    #[test]
    fn top_level_garbage_is_fatal() {
        let mut parser = MimeParser::new(
            Sequential(&b"this is not a message\r\n"[..]),
            EventLog::default(),
            ParserConfig::default(),
        )
        .unwrap();
        assert_matches!(
            Err(Error::MissingHeaders { offset: 0 }),
            parser.parse_message()
        );
        assert_eq!(State::Error, parser.state());
        assert_matches!(Err(Error::ParserFailed), parser.parse_message());
    }

    #[test]
    fn empty_input_is_fatal_for_entities() {
        let mut parser = MimeParser::new(
            Sequential(&b""[..]),
            EventLog::default(),
            ParserConfig::default(),
        )
        .unwrap();
        assert_matches!(
            Err(Error::MissingHeaders { offset: 0 }),
            parser.parse_entity()
        );
    }

    #[test]
    fn entity_parsed_once() {
        let mut parser = MimeParser::new(
            Sequential(&b"A: b\r\n\r\nc"[..]),
            EventLog::default(),
            ParserConfig::default(),
        )
        .unwrap();
        assert!(parser.parse_message().unwrap());
        assert_eq!(State::Eos, parser.state());
        assert!(!parser.parse_message().unwrap());
    }

    #[test]
    fn headers_without_body() {
        let s = shape(b"A: b\r\nC: d", ParserConfig::default());
        assert_eq!(2, s.headers.len());
        assert!(s.bodies[0].1.is_empty());
        assert_eq!(10, s.messages[0].end_offset);
        assert_eq!(2, s.messages[0].line_count);
    }

    const MBOX: &[u8] = b"From a@b 1 Jan\r\n\
Subject: one\r\n\
\r\n\
body1\r\n\
From c@d 2 Jan\r\n\
Subject: two\r\n\
\r\n\
body2\r\n";

    #[test]
    fn two_message_mbox() {
        let s = shape(MBOX, ParserConfig::mbox());
        assert_eq!(2, s.messages.len());
        let content = content_sections(&s);
        assert_eq!(2, content.len());
        assert_eq!(
            b"body1",
            &MBOX[content[0].begin.offset as usize
                ..content[0].end_offset as usize]
        );
        assert_eq!(1, content[0].line_count);
        assert_eq!(
            b"body2\r\n",
            &MBOX[content[1].begin.offset as usize..]
        );

        let markers: Vec<Span> = s
            .sections
            .iter()
            .filter(|&&(s, _)| Section::MboxMarker == s)
            .map(|&(_, span)| span)
            .collect();
        assert_eq!(2, markers.len());
        assert_eq!(0, markers[0].begin.offset);
        assert_eq!(
            b"\r\nFrom c@d 2 Jan\r\n",
            &MBOX[markers[1].begin.offset as usize
                ..markers[1].end_offset as usize]
        );
        assert_eq!(16, s.messages[0].begin.offset);
        assert_eq!(2, s.messages[0].begin.line_number);
    }

    #[test]
    fn mbox_count_and_eos() {
        crate::init_test_log();
        let mut parser = MimeParser::new(
            Sequential(MBOX),
            EventLog::default(),
            ParserConfig::mbox(),
        )
        .unwrap();
        assert!(parser.parse_message().unwrap());
        assert_eq!(State::Complete, parser.state());
        assert!(parser.parse_message().unwrap());
        assert!(!parser.parse_message().unwrap());
        assert_eq!(State::Eos, parser.state());
        assert!(!parser.parse_message().unwrap());
    }

    #[test]
    fn mbox_without_marker() {
        let mut parser = MimeParser::new(
            Sequential(&b"Subject: x\r\n\r\nbody\r\n"[..]),
            EventLog::default(),
            ParserConfig::mbox(),
        )
        .unwrap();
        assert_matches!(
            Err(Error::MissingMboxMarker { offset: 20 }),
            parser.parse_mbox()
        );

        let mut parser = MimeParser::new(
            Sequential(&b""[..]),
            EventLog::default(),
            ParserConfig::mbox(),
        )
        .unwrap();
        assert_eq!(0, parser.parse_mbox().unwrap());
    }

    #[test]
    fn mbox_junk_before_first_marker() {
        let data = b"junk\r\nFrom x\r\nA: b\r\n\r\nc\r\n";
        let s = shape(data, ParserConfig::mbox());
        assert_eq!(1, s.messages.len());
        assert_eq!(Section::MboxMarker, s.sections[0].0);
        assert_eq!(14, s.sections[0].1.end_offset);
        assert_eq!(2, s.sections[0].1.line_count);
    }

    #[test]
    fn mbox_separator_ends_multipart() {
        let data = b"From x\n\
Content-Type: multipart/mixed; boundary=q\n\
\n\
--q\n\
\n\
partial\n\
From y\n\
\n\
next\n";
        let s = shape(data, ParserConfig::mbox());
        assert_eq!(2, s.messages.len());
        let content = content_sections(&s);
        assert_eq!(
            b"partial",
            &data[content[0].begin.offset as usize
                ..content[0].end_offset as usize]
        );
    }

    #[test]
    fn munged_from_is_pre_header() {
        let data = b"From x\n>From y\nA: b\n\nbody\n";
        let s = shape(data, ParserConfig::mbox());
        assert_eq!(1, s.messages.len());
        assert_eq!(1, s.headers.len());
        assert!(s
            .sections
            .iter()
            .any(|&(s, span)| Section::PreHeader == s && 7 == span.begin.offset));
    }

    #[test]
    fn content_length_framing() {
        let data = b"From x\n\
Content-Length: 12\n\
\n\
From inside\n\
From y\n\
\n\
two\n";
        let config = ParserConfig {
            respect_content_length: true,
            ..ParserConfig::mbox()
        };
        let s = shape(data, config);
        assert_eq!(2, s.messages.len());
        let content = content_sections(&s);
        assert_eq!(b"From inside".len() as u64, content[0].len());

        let s = shape(data, ParserConfig::mbox());
        assert_eq!(3, s.messages.len());
    }

    #[test]
    fn huge_content_length_is_ignored() {
        let data = b"From x\n\
Content-Length: 18446744073709551615\n\
\n\
body\n\
From y\n\
\n\
two\n";
        let config = ParserConfig {
            respect_content_length: true,
            ..ParserConfig::mbox()
        };
        let s = shape(data, config);
        assert_eq!(2, s.messages.len());
        let content = content_sections(&s);
        assert_eq!(
            b"body",
            &data[content[0].begin.offset as usize
                ..content[0].end_offset as usize]
        );
    }

    #[test]
    fn repeated_from_line_is_empty_message() {
        let data = b"From a\nFrom b\nA: c\n\nbody\n";
        let s = shape(data, ParserConfig::mbox());
        assert_eq!(2, s.toplevel_messages);
        assert_eq!(1, s.headers.len());
        assert!(s.messages[0].is_empty());
        assert_eq!(7, s.messages[0].begin.offset);
        assert!(!s.sections.iter().any(|&(s, _)| Section::PreHeader == s));
    }

    #[test]
    fn lone_cr_separator_has_no_newline_format() {
        let log = events(b"A: b\r\n\r");
        assert!(log
            .iter()
            .any(|e| "end-section body-separator 6:2..7 lines=1" == e));

        let log = events(b"A: b\n\nc");
        assert!(log
            .iter()
            .any(|e| "end-section body-separator 5:2..6 lines=1 unix" == e));
    }

    #[test]
    fn embedded_message_counts_within_its_parent() {
        let data = b"Content-Type: multipart/mixed; boundary=a\r\n\
\r\n\
--a\r\n\
Content-Type: message/rfc822\r\n\
\r\n";
        let s = shape(data, ParserConfig::default());
        assert_eq!(1, s.toplevel_messages);
        assert_eq!(2, s.messages.len());
        assert_eq!(0, s.open_messages);
    }

    #[test]
    fn cancellation() {
        let data = nested(5);
        let mut parser = MimeParser::new(
            Sequential(Trickle {
                data: &data,
                max: 1,
            }),
            EventLog::default(),
            ParserConfig::default(),
        )
        .unwrap();
        let token = CancelToken::new();
        token.cancel();
        parser.set_cancel_token(Some(token));
        assert_matches!(Err(Error::Cancelled), parser.parse_message());
        assert_matches!(Err(Error::ParserFailed), parser.parse_message());
    }

    #[test]
    fn visitor_abort_stops_parse() {
        #[derive(Default)]
        struct Abort;
        impl Visitor for Abort {
            fn header(&mut self, _: &RawHeader) -> Result<(), Error> {
                Err(Error::Aborted("enough".to_owned()))
            }
        }

        let mut parser = MimeParser::new(
            Sequential(&b"A: b\r\n\r\n"[..]),
            Abort,
            ParserConfig::default(),
        )
        .unwrap();
        assert_matches!(Err(Error::Aborted(..)), parser.parse_message());
    }

    #[test]
    fn custom_classifier() {
        struct EverythingOpaque;
        impl EntityClassifier for EverythingOpaque {
            fn classify(&self, _: &ContentType) -> EntityKind {
                EntityKind::MimePart
            }
        }

        crate::init_test_log();
        let mut parser = MimeParser::new(
            Sequential(MULTIPART),
            Shape::default(),
            ParserConfig::default(),
        )
        .unwrap()
        .with_classifier(Box::new(EverythingOpaque));
        parser.parse_message().unwrap();
        let (_, s) = parser.into_parts();
        assert_eq!(1, s.bodies.len());
        assert_eq!(EntityKind::MimePart, s.bodies[0].0);
    }

    #[test]
    fn seekable_source_resyncs_between_messages() {
        crate::init_test_log();
        let mut parser = MimeParser::new(
            Seekable(Cursor::new(MBOX.to_vec())),
            Shape::default(),
            ParserConfig::mbox(),
        )
        .unwrap();
        assert!(parser.parse_message().unwrap());
        let content = content_sections(parser.visitor())[0];

        // Pull the first body out-of-band
        let mut body = vec![0u8; content.len() as usize];
        {
            use std::io::{Read, Seek, SeekFrom};
            let cursor = &mut parser.source_mut().0;
            cursor.seek(SeekFrom::Start(content.begin.offset)).unwrap();
            cursor.read_exact(&mut body).unwrap();
        }
        assert_eq!(b"body1", &body[..]);

        assert!(parser.parse_message().unwrap());
        assert!(!parser.parse_message().unwrap());
        assert_eq!(2, parser.visitor().messages.len());
    }

    #[test]
    fn reset_after_error() {
        let data = b"garbage\r\n";
        let mut parser = MimeParser::new(
            Seekable(Cursor::new(data.to_vec())),
            EventLog::default(),
            ParserConfig::default(),
        )
        .unwrap();
        assert!(parser.parse_message().is_err());
        parser.source_mut().0.set_position(0);
        parser.reset().unwrap();
        assert_eq!(State::Initialized, parser.state());
        assert_eq!(0, parser.offset());
        assert_matches!(
            Err(Error::MissingHeaders { offset: 0 }),
            parser.parse_message()
        );
    }

    fn message_strategy() -> impl Strategy<Value = Vec<u8>> {
        let line = prop_oneof![
            Just(&b"text"[..]),
            Just(&b"Header: value"[..]),
            Just(&b" folded"[..]),
            Just(&b"--a"[..]),
            Just(&b"--a--"[..]),
            Just(&b"--b"[..]),
            Just(&b"--b--"[..]),
            Just(&b"Content-Type: multipart/mixed; boundary=b"[..]),
            Just(&b"Content-Type: message/rfc822"[..]),
            Just(&b"From x"[..]),
            Just(&b""[..]),
        ];
        let ending =
            prop_oneof![Just(&b"\r\n"[..]), Just(&b"\n"[..]), Just(&b"\r"[..])];
        prop::collection::vec((line, ending), 0..40).prop_map(|lines| {
            let mut data = b"Content-Type: multipart/mixed; boundary=a\r\n\r\n"
                .to_vec();
            for (line, ending) in lines {
                data.extend_from_slice(line);
                data.extend_from_slice(ending);
            }
            data
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn one_byte_reads_match_whole_reads(data in message_strategy()) {
            let whole =
                parse_events(&data, ParserConfig::default(), data.len());
            let trickled = parse_events(&data, ParserConfig::default(), 1);
            prop_assert_eq!(whole, trickled);
        }

        #[test]
        fn mbox_chunking_does_not_matter(
            data in message_strategy(),
            max in 1usize..13,
        ) {
            let mut mbox = b"From first\r\n".to_vec();
            mbox.extend_from_slice(&data);
            let whole = parse_events(&mbox, ParserConfig::mbox(), mbox.len());
            let trickled = parse_events(&mbox, ParserConfig::mbox(), max);
            prop_assert_eq!(whole, trickled);
        }

        #[test]
        fn every_byte_delivered_once(data in message_strategy()) {
            let s = shape(&data, ParserConfig::default());
            prop_assert_eq!(&data[..], &s.data[..]);
            prop_assert_eq!(1, s.toplevel_messages);
            prop_assert_eq!(0, s.open_messages);
        }

        #[test]
        fn offsets_never_decrease(data in message_strategy()) {
            let s = shape(&data, ParserConfig::default());
            let mut last = 0;
            for &(_, span) in &s.sections {
                prop_assert!(span.begin.offset >= last);
                prop_assert!(span.end_offset >= span.begin.offset);
                last = span.end_offset;
            }
        }
    }
}
