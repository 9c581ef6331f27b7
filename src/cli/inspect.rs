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

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::rc::Rc;

use super::main::{EventsSubcommand, InputOptions};
use crate::mime::buffer::{ByteSource, Seekable, Sequential};
use crate::mime::event_log::EventLog;
use crate::mime::parser::MimeParser;
use crate::mime::reassemble::Reassembler;
use crate::mime::structure::StructureBuilder;
use crate::mime::visitor::{Tee, Visitor};
use crate::support::config::ParserConfig;
use crate::support::error::Error;
use crate::support::sysexits::*;

pub(super) fn events(cmd: EventsSubcommand, config: ParserConfig) {
    let stdout = io::stdout();
    let log = EventLog::new(io::BufWriter::new(stdout.lock()), cmd.max_data);
    let (log, result) = parse(&cmd.input, config, log);

    let flushed = log.into_inner().and_then(|mut out| {
        out.flush()?;
        Ok(())
    });
    if let Err(e) = flushed {
        die("Error writing output", &e);
    }
    if let Err(e) = result {
        die("Parse failed", &e);
    }
}

pub(super) fn tree(cmd: InputOptions, config: ParserConfig) {
    let (builder, result) = parse(&cmd, config, StructureBuilder::new());

    // Whatever was completed is still worth showing if the parse failed
    let stdout = io::stdout();
    let mut stdout = io::BufWriter::new(stdout.lock());
    let written = builder
        .roots()
        .iter()
        .try_for_each(|root| root.write_tree(&mut stdout, 0))
        .and_then(|_| stdout.flush());
    if let Err(e) = written {
        die("Error writing output", &Error::Io(e));
    }
    if let Err(e) = result {
        die("Parse failed", &e);
    }
}

pub(super) fn check(cmd: InputOptions, config: ParserConfig) {
    let builder = StructureBuilder::new();
    let (Tee(reassembler, builder), result) = if is_stdin(&cmd.input) {
        let copy = Rc::new(RefCell::new(VecDeque::new()));
        let source = Recording {
            inner: io::stdin(),
            copy: Rc::clone(&copy),
        };
        let expected: Box<dyn Read> = Box::new(Replay(copy));
        drive(
            Sequential(source),
            config,
            Tee(Reassembler::new(Comparer::new(expected)), builder),
        )
    } else {
        let expected: Box<dyn Read> = Box::new(open_input(&cmd.input));
        drive(
            Seekable(open_input(&cmd.input)),
            config,
            Tee(Reassembler::new(Comparer::new(expected)), builder),
        )
    };
    if let Err(e) = result {
        die("Parse failed", &e);
    }

    let written = reassembler.written();
    match reassembler.into_inner().finish() {
        Err(e) => die("Error reading input", &Error::Io(e)),
        Ok(Some(offset)) => {
            eprintln!(
                "Reassembled output ({} bytes) differs from input \
                 starting at offset {}",
                written, offset
            );
            EX_DATAERR.exit();
        }
        Ok(None) => (),
    }

    let roots = builder.into_roots();
    println!(
        "ok: {} bytes, {} messages, {} nodes, depth {}",
        written,
        roots.len(),
        roots.iter().map(|r| r.count()).sum::<usize>(),
        roots.iter().map(|r| r.depth()).max().unwrap_or(0),
    );
}

/// A writer which compares everything written against what `expected`
/// yields, without holding on to either.
struct Comparer<R> {
    expected: R,
    offset: u64,
    /// The offset of the first difference.
    mismatch: Option<u64>,
    buf: Vec<u8>,
}

impl<R: Read> Comparer<R> {
    fn new(expected: R) -> Self {
        Comparer {
            expected,
            offset: 0,
            mismatch: None,
            buf: Vec::new(),
        }
    }

    /// Return the offset of the first difference, counting expected data
    /// which was never written as a difference.
    fn finish(mut self) -> io::Result<Option<u64>> {
        if self.mismatch.is_none() {
            let mut extra = [0u8; 1];
            if 0 != self.expected.read(&mut extra)? {
                self.mismatch = Some(self.offset);
            }
        }

        Ok(self.mismatch)
    }
}

impl<R: Read> Write for Comparer<R> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.mismatch.is_none() {
            self.buf.resize(data.len(), 0);
            let mut n = 0;
            while n < data.len() {
                match self.expected.read(&mut self.buf[n..])? {
                    0 => break,
                    k => n += k,
                }
            }

            let diverge = data[..n]
                .iter()
                .zip(&self.buf[..n])
                .position(|(a, b)| a != b)
                .or(if n < data.len() { Some(n) } else { None });
            self.mismatch = diverge.map(|ix| self.offset + ix as u64);
        }

        self.offset += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads from `inner`, keeping a copy of everything read until a `Replay`
/// takes it.
struct Recording<R> {
    inner: R,
    copy: Rc<RefCell<VecDeque<u8>>>,
}

impl<R: Read> Read for Recording<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(dst)?;
        self.copy.borrow_mut().extend(&dst[..n]);
        Ok(n)
    }
}

/// Yields the bytes a `Recording` has read.
///
/// The parser never reports a byte it has not read, so the copy is always
/// ahead of the reassembled output.
struct Replay(Rc<RefCell<VecDeque<u8>>>);

impl Read for Replay {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut copy = self.0.borrow_mut();
        let n = copy.len().min(dst.len());
        for (d, s) in dst.iter_mut().zip(copy.drain(..n)) {
            *d = s;
        }
        Ok(n)
    }
}

fn is_stdin(path: &Path) -> bool {
    Path::new("-") == path
}

fn open_input(path: &Path) -> fs::File {
    match fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path.display(), e);
            EX_NOINPUT.exit()
        }
    }
}

/// Parse the input named by `cmd` to exhaustion.
///
/// Files are read through a seekable source; stdin is read sequentially.
fn parse<V: Visitor>(
    cmd: &InputOptions,
    config: ParserConfig,
    visitor: V,
) -> (V, Result<u64, Error>) {
    if is_stdin(&cmd.input) {
        drive(Sequential(io::stdin()), config, visitor)
    } else {
        drive(Seekable(open_input(&cmd.input)), config, visitor)
    }
}

fn drive<S: ByteSource, V: Visitor>(
    source: S,
    config: ParserConfig,
    visitor: V,
) -> (V, Result<u64, Error>) {
    let mut parser = match MimeParser::new(source, visitor, config) {
        Ok(parser) => parser,
        Err(e) => die("Error opening input", &e),
    };

    let result = parser.parse_mbox();
    let (_, visitor) = parser.into_parts();
    (visitor, result)
}

fn die(what: &str, e: &Error) -> ! {
    eprintln!("{}: {}", what, e);
    Sysexit::for_error(e).exit()
}
