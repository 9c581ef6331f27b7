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

//! Eager parsing into a tree of offsets.
//!
//! The tree holds the raw headers and the extent of everything, but none of
//! the content; content can be read back from the original input by offset
//! if it is wanted.

use std::io::{self, Read, Write};

use super::buffer::Sequential;
use super::content_type::{Classification, EntityKind};
use super::header::RawHeader;
use super::parser::MimeParser;
use super::position::Position;
use super::visitor::{Section, Span, Visitor};
use crate::support::config::ParserConfig;
use crate::support::error::Error;

/// Whether a node is a message or a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    /// A top-level message, or one embedded in a message part.
    Message,
    /// A top-level entity, or a child of a multipart.
    Part,
}

/// One message or part.
#[derive(Clone, Debug)]
pub struct Node {
    pub unit: Unit,
    pub span: Span,
    pub headers: Vec<RawHeader>,
    pub header_span: Option<Span>,
    /// Whether stray data preceded the headers.
    pub pre_header: Option<Span>,
    pub classification: Option<Classification>,
    /// The kind the parser actually treated the body as, which may differ
    /// from the classification at the nesting limit.
    pub kind: Option<EntityKind>,
    pub body: Option<Span>,
    /// For leaves, the content.
    pub content: Option<Span>,
    /// For multiparts.
    pub preamble: Option<Span>,
    /// For multiparts whose end boundary was found.
    pub epilogue: Option<Span>,
    /// The parts of a multipart, or the single message of a message part.
    pub children: Vec<Node>,
}

impl Node {
    fn new(unit: Unit, begin: Position) -> Self {
        Node {
            unit,
            span: Span {
                begin,
                end_offset: begin.offset,
                line_count: 0,
                newline: Default::default(),
            },
            headers: vec![],
            header_span: None,
            pre_header: None,
            classification: None,
            kind: None,
            body: None,
            content: None,
            preamble: None,
            epilogue: None,
            children: vec![],
        }
    }

    /// The number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// The deepest nesting of nodes in this subtree, counting this one.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Node::depth).max().unwrap_or(0)
    }

    /// Write an indented outline of this subtree.
    pub fn write_tree(
        &self,
        out: &mut dyn Write,
        indent: usize,
    ) -> io::Result<()> {
        write!(
            out,
            "{:indent$}{} {}..{} lines={}",
            "",
            match self.unit {
                Unit::Message => "message",
                Unit::Part => "part",
            },
            self.span.begin.offset,
            self.span.end_offset,
            self.span.line_count,
            indent = indent
        )?;

        if let Some(kind) = self.kind {
            write!(out, " {}", kind)?;
        }
        if let Some(ref classification) = self.classification {
            write!(out, " {}", classification.content_type)?;
            if let Some(ref te) = classification.transfer_encoding {
                write!(out, " ({})", te)?;
            }
        }
        write!(out, " headers={}", self.headers.len())?;
        if self.headers.iter().any(RawHeader::is_invalid) {
            write!(out, " invalid-headers")?;
        }
        if let Some(content) = self.content {
            write!(
                out,
                " content={}..{} lines={}",
                content.begin.offset, content.end_offset, content.line_count
            )?;
        }
        writeln!(out)?;

        for child in &self.children {
            child.write_tree(out, indent + 2)?;
        }

        Ok(())
    }
}

/// A visitor which builds a `Node` tree for each top-level unit.
#[derive(Debug, Default)]
pub struct StructureBuilder {
    stack: Vec<Node>,
    roots: Vec<Node>,
}

impl StructureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trees completed so far.
    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    pub fn into_roots(self) -> Vec<Node> {
        self.roots
    }

    fn top(&mut self) -> Result<&mut Node, Error> {
        self.stack.last_mut().ok_or_else(|| {
            Error::Aborted("structure event outside of any node".to_owned())
        })
    }

    fn finish(&mut self, span: &Span) -> Result<(), Error> {
        let mut node = self.stack.pop().ok_or_else(|| {
            Error::Aborted("unbalanced end of node".to_owned())
        })?;
        node.span = *span;
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
        Ok(())
    }
}

impl Visitor for StructureBuilder {
    fn wants_content(&self) -> bool {
        false
    }

    fn begin_message(&mut self, pos: Position) -> Result<(), Error> {
        self.stack.push(Node::new(Unit::Message, pos));
        Ok(())
    }

    fn begin_part(&mut self, pos: Position) -> Result<(), Error> {
        self.stack.push(Node::new(Unit::Part, pos));
        Ok(())
    }

    fn header(&mut self, header: &RawHeader) -> Result<(), Error> {
        self.top()?.headers.push(header.clone());
        Ok(())
    }

    fn end_headers(&mut self, span: &Span) -> Result<(), Error> {
        self.top()?.header_span = Some(*span);
        Ok(())
    }

    fn begin_body(
        &mut self,
        kind: EntityKind,
        classification: &Classification,
        _: Position,
    ) -> Result<(), Error> {
        let top = self.top()?;
        top.kind = Some(kind);
        top.classification = Some(classification.clone());
        Ok(())
    }

    fn end_section(
        &mut self,
        section: Section,
        span: &Span,
    ) -> Result<(), Error> {
        // Mbox markers come before the message they introduce
        if self.stack.is_empty() {
            return Ok(());
        }

        let top = self.top()?;
        match section {
            Section::PreHeader => top.pre_header = Some(*span),
            Section::Content => top.content = Some(*span),
            Section::Preamble => top.preamble = Some(*span),
            Section::Epilogue => top.epilogue = Some(*span),
            _ => (),
        }
        Ok(())
    }

    fn end_body(&mut self, _: EntityKind, span: &Span) -> Result<(), Error> {
        self.top()?.body = Some(*span);
        Ok(())
    }

    fn end_part(&mut self, span: &Span) -> Result<(), Error> {
        self.finish(span)
    }

    fn end_message(&mut self, span: &Span) -> Result<(), Error> {
        self.finish(span)
    }
}

/// Parse everything in `reader` and return the tree of each top-level unit.
pub fn parse_structure(
    reader: impl Read,
    config: ParserConfig,
) -> Result<Vec<Node>, Error> {
    let mut parser =
        MimeParser::new(Sequential(reader), StructureBuilder::new(), config)?;
    parser.parse_mbox()?;
    let (_, builder) = parser.into_parts();
    Ok(builder.into_roots())
}

#[cfg(test)]
mod test {
    use super::*;

    const MESSAGE: &[u8] = b"Subject: test\r\n\
Content-Type: multipart/mixed; boundary=x\r\n\
\r\n\
--x\r\n\
Content-Type: text/plain\r\n\
\r\n\
one\r\n\
--x\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
Subject: inner\r\n\
\r\n\
two\r\n\
--x--\r\n";

    #[test]
    fn builds_tree() {
        let roots =
            parse_structure(MESSAGE, ParserConfig::default()).unwrap();
        assert_eq!(1, roots.len());

        let root = &roots[0];
        assert_eq!(Unit::Message, root.unit);
        assert_eq!(Some(EntityKind::Multipart), root.kind);
        assert_eq!(2, root.headers.len());
        assert_eq!(MESSAGE.len() as u64, root.span.end_offset);
        assert_eq!(2, root.children.len());
        assert_eq!(4, root.count());
        assert_eq!(3, root.depth());
        assert!(root.preamble.unwrap().is_empty());
        assert!(root.epilogue.unwrap().is_empty());

        let text = &root.children[0];
        assert_eq!(Unit::Part, text.unit);
        assert_eq!(Some(EntityKind::MimePart), text.kind);
        let content = text.content.unwrap();
        assert_eq!(
            b"one",
            &MESSAGE[content.begin.offset as usize..content.end_offset as usize]
        );

        let wrapper = &roots[0].children[1];
        assert_eq!(Some(EntityKind::MessagePart), wrapper.kind);
        assert_eq!(1, wrapper.children.len());
        let inner = &wrapper.children[0];
        assert_eq!(Unit::Message, inner.unit);
        assert!(inner.headers[0].is_named("subject"));
        assert_eq!(Some(EntityKind::MimePart), inner.kind);
        assert!(inner.children.is_empty());
    }

    #[test]
    fn mbox_yields_one_root_per_message() {
        let roots = parse_structure(
            &b"From a\nA: 1\n\nx\nFrom b\nB: 2\n\ny\n"[..],
            ParserConfig::mbox(),
        )
        .unwrap();
        assert_eq!(2, roots.len());
        assert!(roots[0].headers[0].is_named("a"));
        assert!(roots[1].headers[0].is_named("b"));
        assert_eq!(1, roots[0].content.unwrap().line_count);
    }

    #[test]
    fn tree_output() {
        let roots =
            parse_structure(MESSAGE, ParserConfig::default()).unwrap();
        let mut out = Vec::new();
        roots[0].write_tree(&mut out, 0).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(4, lines.len());
        assert!(lines[0].starts_with("message 0.."));
        assert!(lines[0].contains("multipart multipart/mixed"));
        assert!(lines[1].starts_with("  part "));
        assert!(lines[3].starts_with("    message "));
    }
}
