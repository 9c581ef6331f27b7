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

//! Driving the parser from asynchronous code.
//!
//! The parser itself is synchronous. `EventStream` runs it on tokio's
//! blocking pool, feeding it from an `AsyncRead` through a bounded channel
//! and handing its events back through another, so an async consumer can
//! await events one at a time while memory stays bounded by the channel
//! depths.

use std::io;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::buffer::ByteSource;
use super::content_type::{Classification, EntityKind};
use super::header::RawHeader;
use super::parser::MimeParser;
use super::position::Position;
use super::visitor::{Section, Span, Visitor};
use crate::support::cancel::CancelToken;
use crate::support::config::ParserConfig;
use crate::support::error::Error;

const CHUNK_SIZE: usize = 8192;
const CHANNEL_DEPTH: usize = 64;

/// One visitor call, as a value.
#[derive(Clone, Debug)]
pub enum Event {
    BeginMessage(Position),
    BeginPart(Position),
    BeginHeaders(Position),
    Header(RawHeader),
    EndHeaders(Span),
    BeginBody(EntityKind, Classification, Position),
    BeginSection(Section, Position),
    SectionData(Section, Vec<u8>),
    EndSection(Section, Span),
    EndBody(EntityKind, Span),
    EndPart(Span),
    EndMessage(Span),
}

impl Event {
    /// Make the visitor call this event stands for.
    pub fn visit<V: Visitor>(&self, v: &mut V) -> Result<(), Error> {
        match *self {
            Event::BeginMessage(pos) => v.begin_message(pos),
            Event::BeginPart(pos) => v.begin_part(pos),
            Event::BeginHeaders(pos) => v.begin_headers(pos),
            Event::Header(ref header) => v.header(header),
            Event::EndHeaders(ref span) => v.end_headers(span),
            Event::BeginBody(kind, ref classification, pos) => {
                v.begin_body(kind, classification, pos)
            }
            Event::BeginSection(section, pos) => v.begin_section(section, pos),
            Event::SectionData(section, ref data) => {
                v.section_data(section, data)
            }
            Event::EndSection(section, ref span) => {
                v.end_section(section, span)
            }
            Event::EndBody(kind, ref span) => v.end_body(kind, span),
            Event::EndPart(ref span) => v.end_part(span),
            Event::EndMessage(ref span) => v.end_message(span),
        }
    }
}

/// Turns visitor calls into events on a channel.
struct EventSender {
    tx: mpsc::Sender<Event>,
    wants_content: bool,
}

impl EventSender {
    fn send(&mut self, event: Event) -> Result<(), Error> {
        self.tx
            .blocking_send(event)
            .map_err(|_| Error::Aborted("event stream dropped".to_owned()))
    }
}

impl Visitor for EventSender {
    fn wants_content(&self) -> bool {
        self.wants_content
    }

    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        self.send(Event::BeginMessage(pos))
    }

    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        self.send(Event::BeginPart(pos))
    }

    fn begin_headers(&mut self, pos: Position) -> Result<(), Error> {
        self.send(Event::BeginHeaders(pos))
    }

    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        self.send(Event::Header(header.clone()))
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        self.send(Event::EndHeaders(*span))
    }

    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        pos: Position,
    ) -> Result<(), Error> {
        self.send(Event::BeginBody(kind, classification.clone(), pos))
    }

    fn begin_section(
        &mut self,
        section: Section,
        pos: Position,
    ) -> Result<(), Error> {
        self.send(Event::BeginSection(section, pos))
    }

    fn section_data(
        &mut self,
        section: Section,
        data: &[u8],
    ) -> Result<(), Error> {
        self.send(Event::SectionData(section, data.to_vec()))
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        self.send(Event::EndSection(section, *span))
    }

    fn end_body(&mut self, kind: EntityKind, span: &Span) -> Result<(), Error> {
        self.send(Event::EndBody(kind, *span))
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        self.send(Event::EndPart(*span))
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        self.send(Event::EndMessage(*span))
    }
}

/// A byte source fed by the pump task.
///
/// A closed channel reads as end of input.
struct ChannelSource {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    used: usize,
}

impl ByteSource for ChannelSource {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        while self.used == self.chunk.len() {
            match self.rx.blocking_recv() {
                None => return Ok(0),
                Some(chunk) => {
                    self.chunk = chunk?;
                    self.used = 0;
                }
            }
        }

        let n = dst.len().min(self.chunk.len() - self.used);
        dst[..n].copy_from_slice(&self.chunk[self.used..self.used + n]);
        self.used += n;
        Ok(n)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    stop: Arc<Notify>,
) {
    loop {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let result = tokio::select! {
            r = reader.read(&mut buf) => r,
            _ = stop.notified() => return,
        };

        let item = match result {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => Err(e),
        };
        let failed = item.is_err();

        tokio::select! {
            r = tx.send(item) => {
                if r.is_err() {
                    return;
                }
            }
            _ = stop.notified() => return,
        }

        if failed {
            return;
        }
    }
}

fn run_parser(
    source: ChannelSource,
    sender: EventSender,
    config: ParserConfig,
    cancel: CancelToken,
) -> Result<u64, Error> {
    let mut parser = MimeParser::new(source, sender, config)?;
    parser.set_cancel_token(Some(cancel.clone()));
    match parser.parse_mbox() {
        // The pump closing the channel on cancellation looks like a clean
        // end of input to the parser.
        Ok(_) if cancel.is_cancelled() => Err(Error::Cancelled),
        r => r,
    }
}

/// A parse running in the background, observed as a sequence of events.
///
/// Dropping the stream cancels the parse.
pub struct EventStream {
    events: mpsc::Receiver<Event>,
    parser: Option<JoinHandle<Result<u64, Error>>>,
    cancel: CancelToken,
    stop: Arc<Notify>,
}

impl EventStream {
    /// Start parsing `reader` in the background.
    ///
    /// Every message in the input is parsed, as with
    /// `MimeParser::parse_mbox()`. If `wants_content` is false, leaf content
    /// is not delivered. Must be called within a tokio runtime.
    pub fn spawn<R: AsyncRead + Unpin + Send + 'static>(
        reader: R,
        config: ParserConfig,
        wants_content: bool,
    ) -> Self {
        let (data_tx, data_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (event_tx, events) = mpsc::channel(CHANNEL_DEPTH);
        let cancel = CancelToken::new();
        let stop = Arc::new(Notify::new());

        tokio::spawn(pump(reader, data_tx, Arc::clone(&stop)));

        let source = ChannelSource {
            rx: data_rx,
            chunk: Vec::new(),
            used: 0,
        };
        let sender = EventSender {
            tx: event_tx,
            wants_content,
        };
        let parser_cancel = cancel.clone();
        let parser = tokio::task::spawn_blocking(move || {
            run_parser(source, sender, config, parser_cancel)
        });

        EventStream {
            events,
            parser: Some(parser),
            cancel,
            stop,
        }
    }

    /// The next event, or `None` once the parser has stopped.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Stop the parse as soon as it next reads input.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.stop.notify_one();
    }

    /// Discard any remaining events and wait for the parser to stop,
    /// returning the number of messages parsed.
    pub async fn finish(mut self) -> Result<u64, Error> {
        while self.events.recv().await.is_some() {}

        let result = match self.parser.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Parser task failed: {}", e);
                    Err(Error::Aborted(e.to_string()))
                }
            },
            None => Err(Error::ParserFailed),
        };
        debug!("Background parse finished: {:?}", result);
        result
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.parser.is_some() {
            self.cancel();
        }
    }
}
