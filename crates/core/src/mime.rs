//! MIME primitives needed to locate and re-encode the text parts of a message.
//!
//! Only what the tracking rewriter needs is implemented here: header
//! splitting (with unfolding), `Content-Type` parameters, multipart boundary
//! splitting and the `quoted-printable`/`base64` transfer encodings. Encoded
//! text is decoded by `mail_parser`, encoding back is done here since the
//! rewritten part has to keep its original transfer encoding. Nothing in
//! this module validates MIME structure, malformed input simply yields
//! `None` so that callers can leave the offending part untouched.

use std::{fmt::Display, ops::Range};

use base64::{engine::general_purpose, Engine as _};
use mail_parser::MessageParser as MimeParser;

/// Maximum length of an encoded line, as mandated by RFC 2045.
const MAX_LINE_LENGTH: usize = 76;

/// The two kinds of content the tracking rewriter knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Plain,
    Html,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Plain => write!(f, "text/plain"),
            ContentKind::Html => write!(f, "text/html"),
        }
    }
}

/// A parsed `Content-Type` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased `type/subtype`.
    pub mime_type: String,

    /// Parameters in header order, names lowercased and values unquoted.
    pub params: Vec<(String, String)>,
}

impl Default for ContentType {
    /// RFC 2045 section 5.2, a missing header means plain US-ASCII text.
    fn default() -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            params: Vec::new(),
        }
    }
}

impl ContentType {
    /// Parses a `Content-Type` header value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let content_type = mailtrack_core::ContentType::parse(
    ///     "multipart/alternative; boundary=\"b1\"; charset=UTF-8"
    /// );
    /// assert_eq!(content_type.mime_type, "multipart/alternative");
    /// assert_eq!(content_type.param("boundary"), Some("b1"));
    /// assert_eq!(content_type.param("Charset"), Some("UTF-8"));
    /// ```
    pub fn parse(value: &str) -> Self {
        let mut segments = split_params(value).into_iter();
        let mime_type = segments
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "text/plain".to_string());

        let params = segments
            .filter_map(|segment| {
                let (name, value) = segment.split_once('=')?;
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .map(|v| v.replace("\\\"", "\""))
                    .unwrap_or_else(|| value.to_string());
                Some((name.trim().to_ascii_lowercase(), value))
            })
            .collect();

        Self { mime_type, params }
    }

    /// Returns the value of the parameter `name` (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_multipart(&self) -> bool {
        self.mime_type.starts_with("multipart/")
    }

    /// Returns the rewritable content kind, if this is one of them.
    pub fn content_kind(&self) -> Option<ContentKind> {
        match self.mime_type.as_str() {
            "text/plain" => Some(ContentKind::Plain),
            "text/html" => Some(ContentKind::Html),
            _ => None,
        }
    }

    /// Returns whether the declared charset can be handled as UTF-8 text.
    ///
    /// A missing charset defaults to US-ASCII, which is a subset of UTF-8.
    pub fn is_utf8_compatible(&self) -> bool {
        match self.param("charset") {
            None => true,
            Some(charset) => {
                let charset = charset.trim();
                charset.eq_ignore_ascii_case("utf-8")
                    || charset.eq_ignore_ascii_case("utf8")
                    || charset.eq_ignore_ascii_case("us-ascii")
                    || charset.eq_ignore_ascii_case("ascii")
            }
        }
    }
}

/// Splits a header value on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (index, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                segments.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

/// The `Content-Transfer-Encoding` of a MIME entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, `8bit`, `binary` or no header at all.
    Identity,
    QuotedPrintable,
    Base64,
    Unknown(String),
}

impl TransferEncoding {
    pub fn parse(value: Option<&str>) -> Self {
        let value = match value {
            Some(value) => value.trim().to_ascii_lowercase(),
            None => return TransferEncoding::Identity,
        };
        match value.as_str() {
            "" | "7bit" | "8bit" | "binary" => TransferEncoding::Identity,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            "base64" => TransferEncoding::Base64,
            _ => TransferEncoding::Unknown(value),
        }
    }

    /// Returns the `Content-Transfer-Encoding` value naming this encoding.
    pub fn as_str(&self) -> &str {
        match self {
            TransferEncoding::Identity => "8bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
            TransferEncoding::Unknown(value) => value,
        }
    }

    /// Decodes the UTF-8 text of an encoded body of the given kind.
    ///
    /// Identity bodies are returned as is so that their bytes are kept
    /// exactly, unknown encodings yield `None`.
    ///
    /// ```
    /// use mailtrack_core::{ContentKind, TransferEncoding};
    ///
    /// let text = TransferEncoding::QuotedPrintable.decode_text("caf=C3=A9", ContentKind::Plain);
    /// assert_eq!(text.as_deref(), Some("café"));
    /// ```
    pub fn decode_text(&self, body: &str, kind: ContentKind) -> Option<String> {
        match self {
            TransferEncoding::Identity => return Some(body.to_string()),
            TransferEncoding::Unknown(_) => return None,
            TransferEncoding::QuotedPrintable | TransferEncoding::Base64 => {}
        }

        let entity = format!(
            "Content-Type: {kind}; charset=utf-8\r\nContent-Transfer-Encoding: {}\r\n\r\n{body}",
            self.as_str()
        );
        let message = MimeParser::default().parse(entity.as_bytes())?;
        let text = match kind {
            ContentKind::Plain => message.body_text(0),
            ContentKind::Html => message.body_html(0),
        }?;
        Some(text.into_owned())
    }

    /// Encodes text back into this transfer encoding.
    ///
    /// `template` is the previously encoded body, used to keep its line
    /// ending style and whether it ended with a line break. Unknown
    /// encodings pass the text through, they are rejected by
    /// [`decode_text`](Self::decode_text) before anything is rewritten.
    pub fn encode(&self, text: &str, template: &str) -> String {
        let line_ending = if template.contains("\r\n") || !template.contains('\n') {
            "\r\n"
        } else {
            "\n"
        };
        match self {
            TransferEncoding::Identity | TransferEncoding::Unknown(_) => text.to_string(),
            TransferEncoding::QuotedPrintable => qp_encode(text, line_ending),
            TransferEncoding::Base64 => {
                let encoded = general_purpose::STANDARD.encode(text.as_bytes());
                let mut output = wrap_lines(&encoded, line_ending);
                if template.ends_with('\n') {
                    output.push_str(line_ending);
                }
                output
            }
        }
    }
}

fn wrap_lines(encoded: &str, line_ending: &str) -> String {
    let mut output = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);
    for (index, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if index > 0 {
            output.push_str(line_ending);
        }
        // base64 output is pure ASCII
        output.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    output
}

/// Encodes text as quoted-printable, keeping hard line breaks and
/// inserting soft breaks so that no line exceeds 76 characters.
pub fn qp_encode(text: &str, line_ending: &str) -> String {
    let mut output = String::with_capacity(text.len() + text.len() / 8);
    for line in text.split_inclusive('\n') {
        let (content, ending) = if let Some(content) = line.strip_suffix("\r\n") {
            (content, "\r\n")
        } else if let Some(content) = line.strip_suffix('\n') {
            (content, "\n")
        } else {
            (line, "")
        };

        let bytes = content.as_bytes();
        let mut width = 0;
        for (index, &byte) in bytes.iter().enumerate() {
            let is_last = index + 1 == bytes.len();
            let token = match byte {
                b' ' | b'\t' if !is_last => (byte as char).to_string(),
                b'!'..=b'<' | b'>'..=b'~' => (byte as char).to_string(),
                _ => format!("={byte:02X}"),
            };
            // keep room for the trailing `=` of a soft break
            if width + token.len() > MAX_LINE_LENGTH - 1 {
                output.push('=');
                output.push_str(line_ending);
                width = 0;
            }
            width += token.len();
            output.push_str(&token);
        }
        output.push_str(ending);
    }
    output
}

/// Returns whether `name` is a syntactically valid header field name
/// (printable US-ASCII except colon, RFC 5322 section 2.2).
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (33..=126).contains(&b) && b != b':')
}

/// Parses headers from a raw entity, returning an ordered list of headers
/// and a reference to the content after the blank-line separator.
///
/// Headers are preserved in their original order with case-preserved keys
/// and trimmed values. Folded lines are unfolded into their header.
///
/// # Examples
///
/// ```rust
/// let (headers, content) = mailtrack_core::parse_raw_headers(
///     "From: alice@example.com\r\nSubject: Hello\r\n there\r\n\r\nHello!"
/// );
/// assert_eq!(headers.len(), 2);
/// assert_eq!(headers[0], ("From".to_string(), "alice@example.com".to_string()));
/// assert_eq!(headers[1].1, "Hello there");
/// assert_eq!(content, "Hello!");
/// ```
///
/// Text that does not start with a header is all content:
///
/// ```rust
/// let (headers, content) = mailtrack_core::parse_raw_headers("Hello world! http://example.com");
/// assert!(headers.is_empty());
/// assert_eq!(content, "Hello world! http://example.com");
/// ```
pub fn parse_raw_headers(raw: &str) -> (Vec<(String, String)>, &str) {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut pos = 0;

    for line in raw.split_inclusive('\n') {
        let consumed = pos + line.len();
        let content = line.trim_end_matches(['\r', '\n']);

        if content.trim().is_empty() {
            pos = consumed;
            break;
        }

        if content.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(content.trim());
                pos = consumed;
                continue;
            }
            break;
        }

        match content.split_once(':') {
            Some((key, value)) if is_field_name(key) => {
                headers.push((key.to_string(), value.trim().to_string()));
            }
            // Not a header line, treat as start of content
            _ => break,
        }

        pos = consumed;
    }

    (headers, &raw[pos..])
}

/// Returns the first header value matching `name` (case-insensitive).
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Splits a multipart body into the byte ranges of its body parts.
///
/// Each range covers a complete part (headers, blank line and content),
/// excluding the line break that belongs to the following delimiter, as
/// defined by RFC 2046 section 5.1.1. Preamble and epilogue are not part of
/// any range. Returns `None` when no delimiter line is found.
///
/// # Examples
///
/// ```rust
/// let body = "preamble\r\n--b1\r\nfirst\r\n--b1\r\nsecond\r\n--b1--\r\n";
/// let parts = mailtrack_core::split_multipart(body, "b1").unwrap();
/// assert_eq!(&body[parts[0].clone()], "first");
/// assert_eq!(&body[parts[1].clone()], "second");
/// ```
pub fn split_multipart(body: &str, boundary: &str) -> Option<Vec<Range<usize>>> {
    if boundary.is_empty() {
        return None;
    }

    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut found = false;
    let mut pos = 0;

    for line in body.split_inclusive('\n') {
        let line_start = pos;
        pos += line.len();

        let content = line.trim_end_matches(['\r', '\n']).trim_end_matches([' ', '\t']);
        let Some(rest) = content.strip_prefix(delimiter.as_str()) else {
            continue;
        };
        let closing = match rest {
            "" => false,
            "--" => true,
            _ => continue,
        };
        found = true;

        if let Some(start) = current.take() {
            let mut end = line_start;
            if body[..end].ends_with("\r\n") {
                end -= 2;
            } else if body[..end].ends_with('\n') {
                end -= 1;
            }
            parts.push(start..end.max(start));
        }

        if closing {
            return Some(parts);
        }
        current = Some(pos);
    }

    if !found {
        return None;
    }

    // Missing close delimiter, the last part runs to the end of the body
    if let Some(start) = current {
        parts.push(start..body.len());
    }
    Some(parts)
}
