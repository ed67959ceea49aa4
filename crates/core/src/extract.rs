//! Link extraction for plain-text and HTML bodies.
//!
//! Both extractors report byte spans into the scanned body so that the
//! rewriter can replace exactly those spans and leave everything else
//! untouched. HTML is lexed tag by tag (quotes, comments and raw text
//! elements respected), a regex is only used on plain text.

use std::ops::Range;

use regex::Regex;
use url::Url;

use crate::ContentKind;

/// Scheme marker that exempts a link from click tracking.
pub const NOTRACK_MARKER: &str = "+notrack";

/// Characters allowed in a plain-text URL, after the scheme.
const URL_PATTERN: &str =
    r"(?i)https?(?:\+notrack)?://[a-z0-9\-.:]+(?:/[a-z0-9./+?&\-_%=~:;()\[\]#@!$*,]*)?";

/// A link found in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    /// Link target, with HTML character references resolved.
    pub url: String,

    /// Byte span of the raw link text in the body. For HTML this is the
    /// `href` attribute value, without its quotes.
    pub span: Range<usize>,

    pub kind: ContentKind,
}

impl LinkOccurrence {
    /// Returns whether the link carries the `+notrack` scheme marker.
    pub fn is_notrack(&self) -> bool {
        scheme_end(&self.url).is_some_and(|end| {
            self.url[..end]
                .to_ascii_lowercase()
                .ends_with(NOTRACK_MARKER)
        })
    }

    /// Returns the lowercased host of the link target.
    pub fn host(&self) -> Option<String> {
        parse_target(&self.url)?
            .host_str()
            .map(|host| host.to_ascii_lowercase())
    }
}

/// Returns the byte index of the `:` ending the scheme of `url`.
fn scheme_end(url: &str) -> Option<usize> {
    url.find("://")
}

/// Removes the `+notrack` marker from the scheme of `url`, if present.
pub fn strip_notrack(url: &str) -> Option<String> {
    let end = scheme_end(url)?;
    let scheme = &url[..end];
    if !scheme.to_ascii_lowercase().ends_with(NOTRACK_MARKER) {
        return None;
    }
    let marker_start = end - NOTRACK_MARKER.len();
    Some(format!("{}{}", &url[..marker_start], &url[end..]))
}

/// Parses an absolute `http`/`https` link target, `+notrack` markers
/// stripped.
fn parse_target(url: &str) -> Option<Url> {
    let stripped = strip_notrack(url);
    let url = Url::parse(stripped.as_deref().unwrap_or(url)).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().filter(|host| !host.is_empty())?;
    Some(url)
}

/// Returns whether `url` starts with one of the trackable schemes.
fn has_http_scheme(url: &str) -> bool {
    let Some(end) = scheme_end(url) else {
        return false;
    };
    let scheme = url[..end].to_ascii_lowercase();
    matches!(
        scheme.as_str(),
        "http" | "https" | "http+notrack" | "https+notrack"
    )
}

/// Extracts link occurrences from message bodies.
///
/// Holds the compiled plain-text URL pattern, so a single instance should
/// be reused across messages.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    url_regex: Regex,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkExtractor {
    pub fn new() -> Self {
        Self {
            url_regex: Regex::new(URL_PATTERN).expect("URL pattern is valid"),
        }
    }

    /// Extracts every link of `body` in document order.
    pub fn extract(&self, body: &str, kind: ContentKind) -> Vec<LinkOccurrence> {
        match kind {
            ContentKind::Plain => self.extract_plain(body),
            ContentKind::Html => extract_html(body),
        }
    }

    fn extract_plain(&self, text: &str) -> Vec<LinkOccurrence> {
        let mut links = Vec::new();
        for found in self.url_regex.find_iter(text) {
            // Must not start in the middle of a word
            if let Some(previous) = text[..found.start()].chars().next_back() {
                if previous.is_alphanumeric() || "_/.-+=@&%~".contains(previous) {
                    continue;
                }
            }

            let url = trim_trailing_punctuation(found.as_str());
            if parse_target(url).is_none() {
                continue;
            }

            links.push(LinkOccurrence {
                url: url.to_string(),
                span: found.start()..found.start() + url.len(),
                kind: ContentKind::Plain,
            });
        }
        links
    }
}

/// Drops sentence punctuation following a plain-text URL. A closing
/// bracket is only dropped when the URL holds no matching opener, so
/// `wiki/Rust_(language)` keeps its parenthesis.
fn trim_trailing_punctuation(url: &str) -> &str {
    let mut end = url.len();
    while let Some(last) = url[..end].chars().next_back() {
        let trailing = match last {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' => true,
            ')' => is_unbalanced(&url[..end], '(', ')'),
            ']' => is_unbalanced(&url[..end], '[', ']'),
            _ => false,
        };
        if !trailing {
            break;
        }
        end -= last.len_utf8();
    }
    &url[..end]
}

fn is_unbalanced(text: &str, open: char, close: char) -> bool {
    text.matches(close).count() > text.matches(open).count()
}

/// Start tag as produced by the lexer.
struct Tag<'a> {
    name: &'a str,
    attributes: Vec<Attribute<'a>>,
    /// Byte index right after the closing `>`.
    end: usize,
    self_closing: bool,
}

struct Attribute<'a> {
    name: &'a str,
    value: Option<Range<usize>>,
}

fn extract_html(html: &str) -> Vec<LinkOccurrence> {
    let bytes = html.as_bytes();
    let mut links = Vec::new();
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let start = pos + offset;
        let rest = &html[start..];

        if rest.starts_with("<!--") {
            match html[start + 4..].find("-->") {
                Some(end) => pos = start + 4 + end + 3,
                None => break,
            }
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") || rest.starts_with("</") {
            match rest.find('>') {
                Some(end) => pos = start + end + 1,
                None => break,
            }
            continue;
        }

        if !bytes
            .get(start + 1)
            .is_some_and(|byte| byte.is_ascii_alphabetic())
        {
            pos = start + 1;
            continue;
        }

        // Unterminated tag, nothing after it can be trusted
        let Some(tag) = lex_start_tag(html, start) else {
            break;
        };
        pos = tag.end;

        if tag.name.eq_ignore_ascii_case("a") {
            if let Some(link) = anchor_link(html, &tag) {
                links.push(link);
            }
        } else if !tag.self_closing
            && (tag.name.eq_ignore_ascii_case("script") || tag.name.eq_ignore_ascii_case("style"))
        {
            match find_ascii_ci(html, pos, &format!("</{}", tag.name)) {
                Some(end) => pos = end,
                None => break,
            }
        }
    }

    links
}

fn anchor_link(html: &str, tag: &Tag<'_>) -> Option<LinkOccurrence> {
    let span = tag
        .attributes
        .iter()
        .find(|attribute| attribute.name.eq_ignore_ascii_case("href"))?
        .value
        .clone()?;

    let decoded = decode_entities(&html[span.clone()]);
    let url = decoded.trim();
    if !has_http_scheme(url) || parse_target(url).is_none() {
        return None;
    }

    Some(LinkOccurrence {
        url: url.to_string(),
        span,
        kind: ContentKind::Html,
    })
}

/// Lexes the start tag beginning at `start` (the `<`), returning `None`
/// when the input ends before the tag is closed.
fn lex_start_tag(html: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = html.as_bytes();
    let len = bytes.len();
    let is_space = |byte: u8| byte.is_ascii_whitespace();

    let mut pos = start + 1;
    while pos < len && !is_space(bytes[pos]) && bytes[pos] != b'>' && bytes[pos] != b'/' {
        pos += 1;
    }
    let name = &html[start + 1..pos];
    let mut attributes = Vec::new();

    loop {
        while pos < len && (is_space(bytes[pos]) || bytes[pos] == b'/') {
            pos += 1;
        }
        if pos >= len {
            return None;
        }
        if bytes[pos] == b'>' {
            return Some(Tag {
                name,
                attributes,
                end: pos + 1,
                self_closing: bytes[pos - 1] == b'/',
            });
        }

        let name_start = pos;
        while pos < len
            && (pos == name_start
                || (!is_space(bytes[pos])
                    && bytes[pos] != b'='
                    && bytes[pos] != b'>'
                    && bytes[pos] != b'/'))
        {
            pos += 1;
        }
        let attribute_name = &html[name_start..pos];

        let mut probe = pos;
        while probe < len && is_space(bytes[probe]) {
            probe += 1;
        }
        if probe >= len || bytes[probe] != b'=' {
            attributes.push(Attribute {
                name: attribute_name,
                value: None,
            });
            continue;
        }

        probe += 1;
        while probe < len && is_space(bytes[probe]) {
            probe += 1;
        }
        if probe >= len {
            return None;
        }

        let value = match bytes[probe] {
            quote @ (b'"' | b'\'') => {
                let value_start = probe + 1;
                let close = html[value_start..].find(quote as char)?;
                pos = value_start + close + 1;
                value_start..value_start + close
            }
            _ => {
                let value_start = probe;
                while probe < len && !is_space(bytes[probe]) && bytes[probe] != b'>' {
                    probe += 1;
                }
                pos = probe;
                value_start..probe
            }
        };
        attributes.push(Attribute {
            name: attribute_name,
            value: Some(value),
        });
    }
}

/// Resolves the character references commonly found in attribute values.
///
/// Unknown or malformed references are kept verbatim.
pub fn decode_entities(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(index) = rest.find('&') {
        output.push_str(&rest[..index]);
        rest = &rest[index..];

        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|ch| (ch, end)));

        match decoded {
            Some((ch, end)) => {
                output.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                output.push('&');
                rest = &rest[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let number = entity.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Escapes a value for use inside a quoted HTML attribute.
pub fn escape_attribute(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#39;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            _ => output.push(ch),
        }
    }
    output
}

/// Finds `needle` in `haystack` from byte index `from`, ignoring ASCII case.
pub(crate) fn find_ascii_ci(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack.as_bytes()[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|index| from + index)
}

/// Finds the last occurrence of `needle` in `haystack`, ignoring ASCII case.
pub(crate) fn rfind_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .rposition(|window| window.eq_ignore_ascii_case(needle))
}
