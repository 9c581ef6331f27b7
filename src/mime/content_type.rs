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

//! Content classification.
//!
//! The structural parser needs to know exactly three things about an entity
//! from its headers: whether it is multipart (and if so, its boundary),
//! whether it wraps an embedded message, and whether its content has been
//! transfer-encoded such that its structure cannot be seen. Everything else
//! about headers is left to whatever consumes the parser's events.

use std::borrow::Cow;
use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not},
    character::complete::char,
    combinator::{map, opt},
    bytes, multi, sequence, IResult,
};

use super::header::RawHeader;

/// A parsed Content-Type, reduced to what classification needs.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lower-cased media type, e.g. `multipart`.
    pub media_type: String,
    /// Lower-cased subtype, e.g. `mixed`.
    pub subtype: String,
    /// Parameters in order, names lower-cased, values unquoted.
    pub parms: Vec<(String, Vec<u8>)>,
}

impl fmt::Debug for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.subtype)?;
        for (name, value) in &self.parms {
            write!(f, "; {}={:?}", name, String::from_utf8_lossy(value))?;
        }
        Ok(())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.subtype)
    }
}

impl ContentType {
    pub fn new(media_type: &str, subtype: &str) -> Self {
        ContentType {
            media_type: media_type.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parms: vec![],
        }
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    pub fn message_rfc822() -> Self {
        Self::new("message", "rfc822")
    }

    pub fn is_type(&self, media_type: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(media_type)
    }

    pub fn is_subtype(&self, subtype: &str) -> bool {
        self.subtype.eq_ignore_ascii_case(subtype)
    }

    pub fn is(&self, media_type: &str, subtype: &str) -> bool {
        self.is_type(media_type) && self.is_subtype(subtype)
    }

    pub fn parm(&self, name: &str) -> Option<&[u8]> {
        self.parms
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    /// The multipart boundary, if any and non-empty.
    pub fn boundary(&self) -> Option<&[u8]> {
        self.parm("boundary").filter(|b| !b.is_empty())
    }
}

// RFC 2045 5.1 "token": any printable ASCII except SPACE and "tspecials"
fn is_token_byte(b: u8) -> bool {
    b > b' ' && b < 0x7F && !b"()<>@,;:\\\"/[]?=".contains(&b)
}

// RFC 2822 3.2.2 "quoted-pair", including the 8-bit clean obsolete syntax
fn quoted_pair(i: &[u8]) -> IResult<&[u8], &[u8]> {
    sequence::preceded(char('\\'), bytes::complete::take(1usize))(i)
}

// RFC 2822 3.2.3 "Folding white space". Unfolding has not happened yet, so
// the line endings are just more whitespace.
fn fws(i: &[u8]) -> IResult<&[u8], ()> {
    map(is_a(" \t\r\n"), |_| ())(i)
}

// RFC 2822 3.2.3 "Comment text"
fn ctext(i: &[u8]) -> IResult<&[u8], &[u8]> {
    is_not("()\\ \t\r\n")(i)
}

// RFC 2822 3.2.3 "Comment". Note it is recursive.
fn comment(i: &[u8]) -> IResult<&[u8], ()> {
    map(
        sequence::delimited(
            char('('),
            multi::many0_count(alt((
                map(ctext, |_| ()),
                map(quoted_pair, |_| ()),
                fws,
                comment,
            ))),
            char(')'),
        ),
        |_| (),
    )(i)
}

// RFC 2822 3.2.3 "Comment or folding white space", which may be empty
fn cfws(i: &[u8]) -> IResult<&[u8], ()> {
    map(multi::many0_count(alt((fws, comment))), |_| ())(i)
}

// RFC 2045 5.1 "token", with the surrounding CFWS RFC 822 allows
fn token(i: &[u8]) -> IResult<&[u8], &[u8]> {
    sequence::delimited(
        cfws,
        bytes::complete::take_while1(is_token_byte),
        cfws,
    )(i)
}

// RFC 2822 3.2.5 "Quoted [string] content". Whitespace is kept exactly,
// since boundaries are compared byte for byte, but folding line endings are
// removed.
fn qcontent(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((
        is_not(" \t\r\n\\\""),
        quoted_pair,
        is_a(" \t"),
        map(is_a("\r\n"), |_| &b""[..]),
    ))(i)
}

// Borrows the input for the common case of a single unescaped run.
fn append_qcontent<'a>(
    mut acc: Cow<'a, [u8]>,
    item: &'a [u8],
) -> Cow<'a, [u8]> {
    if acc.is_empty() {
        acc = Cow::Borrowed(item);
    } else {
        acc.to_mut().extend_from_slice(item);
    }
    acc
}

// RFC 2822 3.2.5 "Quoted string". An unterminated string runs to the end of
// the value.
fn quoted_string(i: &[u8]) -> IResult<&[u8], Cow<[u8]>> {
    sequence::delimited(
        sequence::pair(cfws, char('"')),
        multi::fold_many0(
            qcontent,
            Cow::Borrowed(&[] as &[u8]),
            append_qcontent,
        ),
        sequence::pair(opt(char('"')), cfws),
    )(i)
}

// RFC 2045 5.1 "value". Unquoted values are taken up to the next separator
// rather than strictly as tokens, since unquoted boundaries containing
// tspecials are common.
fn parm_value(i: &[u8]) -> IResult<&[u8], Cow<[u8]>> {
    sequence::preceded(
        cfws,
        alt((
            quoted_string,
            map(
                sequence::terminated(is_not("; \t\r\n"), cfws),
                Cow::Borrowed,
            ),
        )),
    )(i)
}

// RFC 2045 5.1 "parameter"
fn parameter(i: &[u8]) -> IResult<&[u8], (&[u8], Cow<[u8]>)> {
    sequence::separated_pair(token, char('='), parm_value)(i)
}

// Everything up to and including the next ';', so that a malformed parameter
// only loses itself.
fn next_parameter(i: &[u8]) -> IResult<&[u8], ()> {
    map(sequence::pair(opt(is_not(";")), char(';')), |_| ())(i)
}

/// Parse a raw Content-Type header value.
///
/// Returns `None` if the type and subtype cannot be found. Malformed
/// parameters are skipped rather than failing the whole header.
pub fn parse_content_type(value: &[u8]) -> Option<ContentType> {
    let (mut rest, (media_type, subtype)) =
        sequence::separated_pair(token, char('/'), token)(value).ok()?;

    let mut ct = ContentType::new(
        &String::from_utf8_lossy(media_type),
        &String::from_utf8_lossy(subtype),
    );

    while let Ok((after_semi, ())) = next_parameter(rest) {
        rest = match parameter(after_semi) {
            Ok((after, (name, value))) => {
                ct.parms.push((
                    String::from_utf8_lossy(name).to_ascii_lowercase(),
                    value.into_owned(),
                ));
                after
            }
            Err(_) => after_semi,
        };
    }

    Some(ct)
}

/// The three shapes an entity can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Opaque content.
    MimePart,
    /// Content which is itself a complete message.
    MessagePart,
    /// Content which is a sequence of child entities.
    Multipart,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            EntityKind::MimePart => "mime-part",
            EntityKind::MessagePart => "message-part",
            EntityKind::Multipart => "multipart",
        })
    }
}

/// Everything the parser decided about an entity from its headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: EntityKind,
    pub content_type: ContentType,
    /// Lower-cased Content-Transfer-Encoding, if present.
    pub transfer_encoding: Option<String>,
}

/// Decides which kind of entity a Content-Type denotes.
///
/// Install a custom implementation with `MimeParser::with_classifier()` to
/// treat additional media types as embedded messages, or to force some
/// multipart types to be opaque.
pub trait EntityClassifier {
    fn classify(&self, content_type: &ContentType) -> EntityKind;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultClassifier;

impl EntityClassifier for DefaultClassifier {
    fn classify(&self, ct: &ContentType) -> EntityKind {
        if ct.is_type("multipart") {
            EntityKind::Multipart
        } else if ct.is_type("message")
            && (ct.is_subtype("rfc822")
                || ct.is_subtype("news")
                || ct.is_subtype("global"))
        {
            EntityKind::MessagePart
        } else {
            EntityKind::MimePart
        }
    }
}

/// Whether the given transfer encoding hides the structure of the content.
///
/// Multiparts and embedded messages are only parsed structurally when their
/// content is in an identity encoding.
pub fn is_encoded(transfer_encoding: Option<&str>) -> bool {
    match transfer_encoding {
        None => false,
        Some(te) => !["7bit", "8bit", "binary"]
            .iter()
            .any(|id| te.eq_ignore_ascii_case(id)),
    }
}

/// Classify an entity from its header block.
///
/// The first parseable Content-Type header wins. If there is none,
/// `default_type` applies (normally `text/plain`, but `message/rfc822` for
/// children of `multipart/digest`).
pub fn classify(
    headers: &[RawHeader],
    default_type: &ContentType,
    classifier: &dyn EntityClassifier,
) -> Classification {
    let content_type = find_header(headers, "Content-Type")
        .and_then(|h| parse_content_type(h.value()))
        .unwrap_or_else(|| default_type.clone());

    let transfer_encoding = find_header(headers, "Content-Transfer-Encoding")
        .map(|h| {
            String::from_utf8_lossy(h.value()).trim().to_ascii_lowercase()
        })
        .filter(|te| !te.is_empty());

    let mut kind = classifier.classify(&content_type);
    if EntityKind::MimePart != kind
        && is_encoded(transfer_encoding.as_deref())
    {
        kind = EntityKind::MimePart;
    }

    Classification {
        kind,
        content_type,
        transfer_encoding,
    }
}

/// Find the first valid header named `name`.
pub fn find_header<'a>(
    headers: &'a [RawHeader],
    name: &str,
) -> Option<&'a RawHeader> {
    headers
        .iter()
        .find(|h| !h.is_invalid() && h.is_named(name))
}

/// Extract a `Content-Length` value, if present and well-formed.
pub fn content_length(headers: &[RawHeader]) -> Option<u64> {
    find_header(headers, "Content-Length").and_then(|h| {
        String::from_utf8_lossy(h.value()).trim().parse::<u64>().ok()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(line: &[u8]) -> RawHeader {
        RawHeader::parse(0, 1, line.to_vec())
    }

    #[test]
    fn parse_simple() {
        let ct = parse_content_type(b" Text/Plain\r\n").unwrap();
        assert!(ct.is("text", "plain"));
        assert_eq!("text", ct.media_type);
        assert!(ct.parms.is_empty());
    }

    #[test]
    fn parse_parameters() {
        let ct = parse_content_type(
            b" multipart/mixed; charset=us-ascii;\r\n\tboundary=\"=_a \\\"b\\\"\"\r\n",
        )
        .unwrap();
        assert!(ct.is("multipart", "mixed"));
        assert_eq!(Some(&b"us-ascii"[..]), ct.parm("charset"));
        assert_eq!(Some(&b"=_a \"b\""[..]), ct.boundary());
    }

    #[test]
    fn parse_with_comments_and_junk() {
        let ct = parse_content_type(
            b" (comment) multipart/alternative (more); ; junk; boundary=xyz",
        )
        .unwrap();
        assert!(ct.is("multipart", "alternative"));
        assert_eq!(Some(&b"xyz"[..]), ct.boundary());
    }

    #[test]
    fn quoted_boundary_keeps_inner_whitespace() {
        let ct = parse_content_type(
            b"multipart/mixed; boundary=\"a  b\r\n c\" (x); y=z",
        )
        .unwrap();
        assert_eq!(Some(&b"a  b c"[..]), ct.boundary());
        assert_eq!(Some(&b"z"[..]), ct.parm("y"));
    }

    #[test]
    fn unterminated_quote_runs_to_end() {
        let ct =
            parse_content_type(b"multipart/mixed; boundary=\"open").unwrap();
        assert_eq!(Some(&b"open"[..]), ct.boundary());
    }

    #[test]
    fn parse_failures() {
        assert!(parse_content_type(b"").is_none());
        assert!(parse_content_type(b"text").is_none());
        assert!(parse_content_type(b"/plain").is_none());
    }

    #[test]
    fn empty_boundary_is_no_boundary() {
        let ct = parse_content_type(b"multipart/mixed; boundary=\"\"").unwrap();
        assert_eq!(None, ct.boundary());
    }

    #[test]
    fn classification() {
        let plain = ContentType::text_plain();
        let c = classify(&[], &plain, &DefaultClassifier);
        assert_eq!(EntityKind::MimePart, c.kind);
        assert!(c.content_type.is("text", "plain"));

        let c = classify(&[], &ContentType::message_rfc822(), &DefaultClassifier);
        assert_eq!(EntityKind::MessagePart, c.kind);

        let headers = vec![
            raw(b"Content-Type: multipart/mixed; boundary=x\r\n"),
            raw(b"Content-Type: text/html\r\n"),
        ];
        let c = classify(&headers, &plain, &DefaultClassifier);
        assert_eq!(EntityKind::Multipart, c.kind);
        assert_eq!(Some(&b"x"[..]), c.content_type.boundary());
    }

    #[test]
    fn encoded_structures_are_opaque() {
        let headers = vec![
            raw(b"Content-Type: message/rfc822\r\n"),
            raw(b"Content-Transfer-Encoding: Base64 \r\n"),
        ];
        let c = classify(&headers, &ContentType::text_plain(), &DefaultClassifier);
        assert_eq!(EntityKind::MimePart, c.kind);
        assert_eq!(Some("base64"), c.transfer_encoding.as_deref());

        let headers = vec![
            raw(b"Content-Type: message/rfc822\r\n"),
            raw(b"Content-Transfer-Encoding: 8bit\r\n"),
        ];
        let c = classify(&headers, &ContentType::text_plain(), &DefaultClassifier);
        assert_eq!(EntityKind::MessagePart, c.kind);
    }

    #[test]
    fn custom_classifier() {
        struct Opaque;
        impl EntityClassifier for Opaque {
            fn classify(&self, _: &ContentType) -> EntityKind {
                EntityKind::MimePart
            }
        }

        let headers = vec![raw(b"Content-Type: multipart/mixed; boundary=x\n")];
        let c = classify(&headers, &ContentType::text_plain(), &Opaque);
        assert_eq!(EntityKind::MimePart, c.kind);
    }

    #[test]
    fn content_length_header() {
        let headers = vec![
            raw(b"Subject: x\r\n"),
            raw(b"Content-Length:  42 \r\n"),
        ];
        assert_eq!(Some(42), content_length(&headers));
        assert_eq!(None, content_length(&[raw(b"Content-Length: x\n")]));
    }
}
