//! Outbound email message model consumed by the tracking rewriter.
//!
//! [`EmailMessage`] keeps an ordered list of
//! [RFC 5322](https://www.rfc-editor.org/rfc/rfc5322) headers, the body after
//! the header section, a cached serialization and the owning server. The
//! parser only ever borrows it, transformers replace the body and call
//! [`rebuild`](EmailMessage::rebuild) once done.

use uuid::Uuid;

use crate::{find_header, parse_raw_headers, ContentType};

/// Represents an outbound email message.
///
/// Headers are stored as an ordered `Vec` (preserving RFC 5322 order and
/// supporting duplicate headers such as `Received`). A cached `raw` field
/// holds the full serialized form; call [`rebuild`](Self::rebuild) after
/// modifying headers or body so that [`raw`](Self::raw) reflects the changes.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Opaque per-message token, embedded in tracking URLs.
    pub token: String,

    /// Token of the mail server the message is sent through.
    pub server: String,

    /// Envelope sender address.
    pub from: String,

    /// Envelope recipient address.
    pub to: String,

    /// Ordered list of MIME headers (case-preserved keys, trimmed values).
    headers: Vec<(String, String)>,

    /// Raw header section, kept verbatim so that rebuilding never refolds.
    header_section: String,

    /// Message body after the blank-line separator (RFC 5322 body).
    body: String,

    /// Cached full serialization (headers + blank line + body).
    raw: String,

    /// Original raw message as received, never modified after construction.
    original_raw: String,
}

impl EmailMessage {
    /// Creates a message for `server`, generating a random token.
    pub fn new(server: String, from: String, to: String, raw: String) -> Self {
        let (headers, content) = parse_raw_headers(&raw);
        let header_section = raw[..raw.len() - content.len()].to_string();
        Self {
            token: Uuid::new_v4().simple().to_string(),
            server,
            from,
            to,
            headers,
            header_section,
            body: content.to_string(),
            raw: raw.clone(),
            original_raw: raw,
        }
    }

    /// Creates a message without an owning server, useful when the
    /// server is assigned later in the pipeline.
    pub fn from_raw(from: &str, to: &str, raw: &str) -> Self {
        Self::new(String::new(), from.to_string(), to.to_string(), raw.to_string())
    }

    /// Creates a message owned by `server`.
    pub fn with_server(server: &str, from: &str, to: &str, raw: &str) -> Self {
        Self::new(
            server.to_string(),
            from.to_string(),
            to.to_string(),
            raw.to_string(),
        )
    }

    /// Returns the first header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns a reference to the ordered header list.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the parsed `Content-Type`, defaulting to `text/plain`.
    pub fn content_type(&self) -> ContentType {
        self.header("Content-Type")
            .map(ContentType::parse)
            .unwrap_or_default()
    }

    /// Returns the lowercased domain part of the envelope sender.
    pub fn sender_domain(&self) -> Option<String> {
        let address = self.from.trim().trim_start_matches('<').trim_end_matches('>');
        let (_, domain) = address.rsplit_once('@')?;
        let domain = domain.trim();
        if domain.is_empty() {
            return None;
        }
        Some(domain.to_ascii_lowercase())
    }

    /// Returns the full serialized email (headers + blank line + content).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the original raw email as received, before any transformer
    /// modifications.
    pub fn original_raw(&self) -> &str {
        &self.original_raw
    }

    /// Returns the message body after the header section.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replaces the body, keeping the header section as is.
    ///
    /// The cached [`raw`](Self::raw) field is **not** updated automatically,
    /// call [`rebuild`](Self::rebuild) once all modifications are done.
    pub fn replace_body(&mut self, body: String) {
        self.body = body;
    }

    /// Rebuilds the cached [`raw`](Self::raw) field from the header section
    /// and [`body`](Self::body).
    pub fn rebuild(&mut self) {
        let mut raw = String::with_capacity(self.header_section.len() + self.body.len());
        raw.push_str(&self.header_section);
        raw.push_str(&self.body);
        self.raw = raw;
    }
}
