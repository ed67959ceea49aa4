use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    EmailMessage, MessageParser, MessageTransformer, ParseError, TrackDomainLookup,
    TransformFuture, TransformReport,
};

/// Transformer that injects click and open tracking into outgoing emails.
///
/// The body is replaced whenever the parser returns a different one, which
/// also covers stripped `+notrack` markers. Parse errors are reported to
/// the pipeline with the body untouched.
pub struct TrackingTransformer {
    parser: MessageParser,
}

impl TrackingTransformer {
    /// Creates a new [`TrackingTransformer`] resolving track domains through `lookup`.
    pub fn new(lookup: Arc<dyn TrackDomainLookup>) -> Self {
        info!("Tracking transformer initialized");
        Self {
            parser: MessageParser::new(lookup),
        }
    }

    fn track(&self, message: &mut EmailMessage) -> Result<TransformReport, ParseError> {
        let result = self.parser.parse(message)?;
        let replaced = result.body != message.body();
        let report = TransformReport::from_parse(&result, replaced);
        if replaced {
            debug!(token = %message.token, "Replacing body with tracked version");
            message.replace_body(result.body);
        }
        Ok(report)
    }
}

impl MessageTransformer for TrackingTransformer {
    fn transform<'a>(&'a self, message: &'a mut EmailMessage) -> TransformFuture<'a> {
        Box::pin(async move { self.track(message) })
    }

    fn name(&self) -> &str {
        "tracking"
    }
}
