//! Click redirect URLs and link replacement.
//!
//! A tracked link becomes `https://click.<domain>/<server>/<token>/<target>`
//! where `<target>` is the original URL in unpadded base64url. The redirect
//! service recovers the original URL with [`decode_click_path`].

use std::{error::Error, fmt::Display, ops::Range};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tracing::debug;
use url::Url;

use crate::{escape_attribute, strip_notrack, ContentKind, LinkOccurrence, TrackDomain};

/// First path segment of open tracking URLs, reserved as a server token.
pub const OPEN_PATH_PREFIX: &str = "img";

/// Returns whether `token` can be embedded in a tracking URL path as is.
pub fn is_url_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn tracking_url(track_domain: &TrackDomain, segments: &[&str]) -> Option<Url> {
    let path = segments.join("/");
    Url::parse(&format!("https://{}/{path}", track_domain.click_host())).ok()
}

/// Builds the click redirect URL for `target`.
///
/// Returns `None` when a token is not URL-safe or the track domain is not a
/// valid host name.
pub fn click_url(
    track_domain: &TrackDomain,
    server: &str,
    token: &str,
    target: &str,
) -> Option<Url> {
    if !is_url_safe_token(server) || !is_url_safe_token(token) {
        return None;
    }
    let encoded = URL_SAFE_NO_PAD.encode(target.as_bytes());
    tracking_url(track_domain, &[server, token, &encoded])
}

/// Builds the open tracking (pixel) URL of a message.
pub fn open_url(track_domain: &TrackDomain, server: &str, token: &str) -> Option<Url> {
    if !is_url_safe_token(server) || !is_url_safe_token(token) {
        return None;
    }
    tracking_url(track_domain, &[OPEN_PATH_PREFIX, server, token])
}

/// A click redirect decoded from its URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickTarget {
    pub server: String,
    pub token: String,
    pub url: String,
}

/// An open tracking request decoded from its URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTarget {
    pub server: String,
    pub token: String,
}

/// Errors that can occur while decoding a tracking URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The path does not have the expected segments.
    InvalidPath(String),
    /// The embedded target is not valid base64url or UTF-8.
    InvalidEncoding(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidPath(path) => write!(f, "Invalid tracking path: {path}"),
            DecodeError::InvalidEncoding(msg) => write!(f, "Invalid target encoding: {msg}"),
        }
    }
}

impl Error for DecodeError {}

fn path_segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('/').split('/').collect()
}

/// Decodes the path of a click redirect URL.
///
/// # Examples
///
/// ```rust
/// let track_domain = mailtrack_core::TrackDomain::new("example.com");
/// let url = mailtrack_core::click_url(&track_domain, "srv1", "abc", "http://github.com").unwrap();
/// let target = mailtrack_core::decode_click_path(url.path()).unwrap();
/// assert_eq!(target.url, "http://github.com");
/// assert_eq!(target.server, "srv1");
/// ```
pub fn decode_click_path(path: &str) -> Result<ClickTarget, DecodeError> {
    let segments = path_segments(path);
    let [server, token, encoded] = segments[..] else {
        return Err(DecodeError::InvalidPath(path.to_string()));
    };
    if server == OPEN_PATH_PREFIX || !is_url_safe_token(server) || !is_url_safe_token(token) {
        return Err(DecodeError::InvalidPath(path.to_string()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
    let url = String::from_utf8(bytes).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

    Ok(ClickTarget {
        server: server.to_string(),
        token: token.to_string(),
        url,
    })
}

/// Decodes the path of an open tracking URL.
pub fn decode_open_path(path: &str) -> Result<OpenTarget, DecodeError> {
    let segments = path_segments(path);
    match segments[..] {
        [OPEN_PATH_PREFIX, server, token]
            if is_url_safe_token(server) && is_url_safe_token(token) =>
        {
            Ok(OpenTarget {
                server: server.to_string(),
                token: token.to_string(),
            })
        }
        _ => Err(DecodeError::InvalidPath(path.to_string())),
    }
}

/// Produces replacements for the links of one message.
///
/// Keeps count of the links turned into click redirects, links exempted
/// through `+notrack` or an excluded host are not counted.
#[derive(Debug)]
pub struct LinkRewriter<'a> {
    track_domain: &'a TrackDomain,
    server: &'a str,
    token: &'a str,
    tracked_links: usize,
}

impl<'a> LinkRewriter<'a> {
    pub fn new(track_domain: &'a TrackDomain, server: &'a str, token: &'a str) -> Self {
        Self {
            track_domain,
            server,
            token,
            tracked_links: 0,
        }
    }

    /// Returns the replacement text for `occurrence`, whose span indexes
    /// into `body`, or `None` when the link is left untouched.
    pub fn rewrite(&mut self, occurrence: &LinkOccurrence, body: &str) -> Option<String> {
        let raw = &body[occurrence.span.clone()];
        if occurrence.is_notrack() {
            let value = raw.trim_start();
            let leading = &raw[..raw.len() - value.len()];
            return strip_notrack(value).map(|stripped| format!("{leading}{stripped}"));
        }

        let host = occurrence.host()?;
        if self.track_domain.is_excluded(&host) {
            debug!(host = %host, "Link host excluded from click tracking");
            return None;
        }

        let url = click_url(self.track_domain, self.server, self.token, &occurrence.url)?;
        self.tracked_links += 1;
        Some(match occurrence.kind {
            ContentKind::Plain => url.to_string(),
            ContentKind::Html => escape_attribute(url.as_str()),
        })
    }

    /// Rewrites all `occurrences` of `body`, returning the new body.
    pub fn rewrite_all(&mut self, body: &str, occurrences: &[LinkOccurrence]) -> String {
        let replacements: Vec<(Range<usize>, String)> = occurrences
            .iter()
            .filter_map(|occurrence| {
                self.rewrite(occurrence, body)
                    .map(|replacement| (occurrence.span.clone(), replacement))
            })
            .collect();
        apply_replacements(body, &replacements)
    }

    pub fn tracked_links(&self) -> usize {
        self.tracked_links
    }
}

/// Replaces the given spans of `body`, which must be sorted and must not
/// overlap, copying everything in between verbatim.
pub fn apply_replacements(body: &str, replacements: &[(Range<usize>, String)]) -> String {
    let extra: usize = replacements.iter().map(|(_, text)| text.len()).sum();
    let mut output = String::with_capacity(body.len() + extra);
    let mut cursor = 0;
    for (span, text) in replacements {
        output.push_str(&body[cursor..span.start]);
        output.push_str(text);
        cursor = span.end;
    }
    output.push_str(&body[cursor..]);
    output
}
