//! The message parser, entry point of the tracking rewriter.
//!
//! [`MessageParser::parse`] resolves the tracking policy of a message and,
//! when any tracking is active, rewrites the links of its text parts and
//! inserts the open tracking pixel into its first HTML part. Multipart
//! bodies are walked by boundary and only the content of the rewritten
//! parts changes, every other byte of the body is kept as is.

use std::{error::Error, fmt::Display, sync::Arc};

use tracing::{debug, warn};

use crate::{
    apply_replacements, find_header, parse_raw_headers, split_multipart, ContentKind,
    ContentType, EmailMessage, LinkExtractor, LinkRewriter, PixelInjector, TrackDomainLookup,
    TrackingDecision, TransferEncoding,
};

/// Nesting limit for multipart bodies, deeper parts are left untouched.
const MAX_MULTIPART_DEPTH: usize = 16;

/// Outcome of parsing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    /// Body to send, identical to the original when nothing was rewritten.
    pub body: String,

    /// Number of links turned into click redirects.
    pub tracked_links: usize,

    /// Number of open tracking pixels inserted, at most one.
    pub tracked_images: usize,

    /// Whether any tracking was applied.
    pub actioned: bool,
}

impl ParseResult {
    pub fn new(body: String, tracked_links: usize, tracked_images: usize) -> Self {
        Self {
            body,
            tracked_links,
            tracked_images,
            actioned: tracked_links > 0 || tracked_images > 0,
        }
    }

    /// A result leaving `body` untouched.
    pub fn untouched(body: &str) -> Self {
        Self::new(body.to_string(), 0, 0)
    }
}

/// Errors that can occur while parsing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The message is neither text nor multipart, so there is no way to
    /// rewrite it.
    UnsupportedContentKind(String),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnsupportedContentKind(mime_type) => {
                write!(f, "Unsupported content kind: {mime_type}")
            }
        }
    }
}

impl Error for ParseError {}

/// Injects click and open tracking into outbound messages.
///
/// Holds no per-message state, a single instance can be shared between
/// threads and used for any number of messages.
pub struct MessageParser {
    lookup: Arc<dyn TrackDomainLookup>,
    extractor: LinkExtractor,
}

impl std::fmt::Debug for MessageParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageParser").finish_non_exhaustive()
    }
}

impl MessageParser {
    /// Creates a parser resolving track domains through `lookup`.
    pub fn new(lookup: Arc<dyn TrackDomainLookup>) -> Self {
        Self {
            lookup,
            extractor: LinkExtractor::new(),
        }
    }

    /// Parses `message`, returning its tracked body and counters.
    ///
    /// Messages without an active tracking policy are returned untouched.
    /// Fails only when the message is neither text nor multipart, in which
    /// case no output is produced at all.
    pub fn parse(&self, message: &EmailMessage) -> Result<ParseResult, ParseError> {
        let decision = TrackingDecision::resolve(message, self.lookup.as_ref());
        let track_domain = match &decision.track_domain {
            Some(track_domain) if decision.is_active() => track_domain,
            _ => return Ok(ParseResult::untouched(message.body())),
        };

        let content_type = message.content_type();
        if !content_type.is_multipart() && content_type.content_kind().is_none() {
            return Err(ParseError::UnsupportedContentKind(content_type.mime_type));
        }

        let pixel = if decision.opens {
            let pixel = PixelInjector::new(track_domain, &message.server, &message.token);
            if pixel.is_none() {
                warn!(
                    server = %message.server,
                    token = %message.token,
                    "Unable to build open tracking URL, pixel skipped"
                );
            }
            pixel
        } else {
            None
        };

        let mut session = Session {
            extractor: &self.extractor,
            clicks: decision.clicks,
            rewriter: LinkRewriter::new(track_domain, &message.server, &message.token),
            pixel,
            tracked_images: 0,
        };
        let body = session
            .rewrite_entity(message.headers(), message.body(), 0)
            .unwrap_or_else(|| message.body().to_string());

        let result = ParseResult::new(
            body,
            session.rewriter.tracked_links(),
            session.tracked_images,
        );
        debug!(
            token = %message.token,
            domain = %track_domain.domain,
            links = result.tracked_links,
            images = result.tracked_images,
            "Message parsed"
        );
        Ok(result)
    }
}

/// Per-call state of a parse.
struct Session<'a> {
    extractor: &'a LinkExtractor,
    clicks: bool,
    rewriter: LinkRewriter<'a>,
    /// Taken by the first HTML part, so that a message gets one pixel.
    pixel: Option<PixelInjector>,
    tracked_images: usize,
}

impl Session<'_> {
    /// Rewrites the content of one entity, `None` when it is unchanged.
    fn rewrite_entity(
        &mut self,
        headers: &[(String, String)],
        body: &str,
        depth: usize,
    ) -> Option<String> {
        let content_type = find_header(headers, "Content-Type")
            .map(ContentType::parse)
            .unwrap_or_default();
        if content_type.is_multipart() {
            return self.rewrite_multipart(&content_type, body, depth);
        }

        let kind = content_type.content_kind()?;
        if find_header(headers, "Content-Disposition")
            .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("attachment"))
        {
            debug!(mime_type = %content_type.mime_type, "Attachment left untouched");
            return None;
        }
        if !content_type.is_utf8_compatible() {
            warn!(
                charset = content_type.param("charset").unwrap_or_default(),
                "Unsupported charset, part left untouched"
            );
            return None;
        }

        let encoding = TransferEncoding::parse(find_header(headers, "Content-Transfer-Encoding"));
        let Some(text) = encoding.decode_text(body, kind) else {
            warn!(
                encoding = %encoding.as_str(),
                "Undecodable transfer encoding, part left untouched"
            );
            return None;
        };

        let rewritten = self.rewrite_text(&text, kind)?;
        Some(encoding.encode(&rewritten, body))
    }

    fn rewrite_multipart(
        &mut self,
        content_type: &ContentType,
        body: &str,
        depth: usize,
    ) -> Option<String> {
        if depth >= MAX_MULTIPART_DEPTH {
            warn!(depth = depth, "Multipart nesting too deep, left untouched");
            return None;
        }
        let Some(boundary) = content_type.param("boundary") else {
            warn!(
                mime_type = %content_type.mime_type,
                "Multipart without boundary, left untouched"
            );
            return None;
        };
        let Some(parts) = split_multipart(body, boundary) else {
            warn!(boundary = %boundary, "No multipart delimiter found, left untouched");
            return None;
        };

        let mut replacements = Vec::new();
        for span in parts {
            let part = &body[span.clone()];
            let (headers, content) = parse_raw_headers(part);
            let content_start = span.start + (part.len() - content.len());
            if let Some(rewritten) = self.rewrite_entity(&headers, content, depth + 1) {
                replacements.push((content_start..span.end, rewritten));
            }
        }

        if replacements.is_empty() {
            return None;
        }
        Some(apply_replacements(body, &replacements))
    }

    /// Rewrites links and inserts the pixel into decoded text, `None` when
    /// nothing changed.
    fn rewrite_text(&mut self, text: &str, kind: ContentKind) -> Option<String> {
        let mut output = None;

        if self.clicks {
            let links = self.extractor.extract(text, kind);
            if !links.is_empty() {
                output = Some(self.rewriter.rewrite_all(text, &links));
            }
        }

        if kind == ContentKind::Html {
            if let Some(pixel) = self.pixel.take() {
                output = Some(pixel.inject(output.as_deref().unwrap_or(text)));
                self.tracked_images += 1;
            }
        }

        output.filter(|output| output != text)
    }
}
