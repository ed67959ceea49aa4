//! Pipeline seam for rewriting accepted messages before transport.
//!
//! A [`TransformPipeline`] runs its transformers in order over an
//! [`EmailMessage`], adds up what each one tracked and rebuilds the raw
//! message once at the end. A transformer that fails leaves the message
//! as it found it and the pipeline moves on, so tracking never holds back
//! delivery.

use std::{future::Future, pin::Pin};

use tracing::{debug, warn};

use crate::{EmailMessage, ParseError, ParseResult};

/// Boxed future returned by [`MessageTransformer::transform`].
pub type TransformFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransformReport, ParseError>> + Send + 'a>>;

/// Counters reported by a transformer for a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub tracked_links: usize,
    pub tracked_images: usize,

    /// Whether the message body was replaced.
    pub body_replaced: bool,
}

impl TransformReport {
    /// Builds the report of a parse whose body was (or was not) applied.
    pub fn from_parse(result: &ParseResult, body_replaced: bool) -> Self {
        Self {
            tracked_links: result.tracked_links,
            tracked_images: result.tracked_images,
            body_replaced,
        }
    }

    /// Whether any link or image was tracked.
    pub fn actioned(&self) -> bool {
        self.tracked_links > 0 || self.tracked_images > 0
    }

    fn merge(&mut self, other: TransformReport) {
        self.tracked_links += other.tracked_links;
        self.tracked_images += other.tracked_images;
        self.body_replaced |= other.body_replaced;
    }
}

/// A step that rewrites an email message in place.
pub trait MessageTransformer: Send + Sync {
    /// Transforms `message`, returning what was tracked. On error the
    /// message must be left untouched.
    fn transform<'a>(&'a self, message: &'a mut EmailMessage) -> TransformFuture<'a>;

    fn name(&self) -> &str;
}

/// Outcome of running a [`TransformPipeline`] over a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Counters summed over the transformers that succeeded.
    pub report: TransformReport,

    /// Names of the transformers that failed.
    pub failed: Vec<String>,
}

/// Ordered list of transformers applied to every outgoing message.
#[derive(Default)]
pub struct TransformPipeline {
    transformers: Vec<Box<dyn MessageTransformer>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `transformer` to the end of the pipeline.
    pub fn with(mut self, transformer: impl MessageTransformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Runs every transformer over `message` and rebuilds its raw form.
    pub async fn run(&self, message: &mut EmailMessage) -> PipelineReport {
        let mut outcome = PipelineReport::default();
        for transformer in &self.transformers {
            match transformer.transform(message).await {
                Ok(report) => {
                    debug!(
                        transformer = transformer.name(),
                        token = %message.token,
                        links = report.tracked_links,
                        images = report.tracked_images,
                        replaced = report.body_replaced,
                        "Transformer applied"
                    );
                    outcome.report.merge(report);
                }
                Err(e) => {
                    warn!(
                        transformer = transformer.name(),
                        token = %message.token,
                        error = %e,
                        "Transformer failed, message left unchanged"
                    );
                    outcome.failed.push(transformer.name().to_string());
                }
            }
        }
        if outcome.report.body_replaced {
            message.rebuild();
        }
        outcome
    }
}

impl std::fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transformers.iter().map(|t| t.name()).collect();
        f.debug_struct("TransformPipeline")
            .field("transformers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl MessageTransformer for Failing {
        fn transform<'a>(&'a self, _message: &'a mut EmailMessage) -> TransformFuture<'a> {
            Box::pin(async move {
                let result: Result<TransformReport, ParseError> =
                    Err(ParseError::UnsupportedContentKind("image/png".into()));
                result
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct Fixed(TransformReport);

    impl MessageTransformer for Fixed {
        fn transform<'a>(&'a self, _message: &'a mut EmailMessage) -> TransformFuture<'a> {
            let result: Result<TransformReport, ParseError> = Ok(self.0);
            Box::pin(async move { result })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn message() -> EmailMessage {
        EmailMessage::with_server(
            "srv1",
            "test@example.com",
            "rcpt@example.org",
            "Subject: Hi\r\n\r\nbody",
        )
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = TransformPipeline::new();
        assert!(pipeline.is_empty());

        let mut message = message();
        let outcome = pipeline.run(&mut message).await;
        assert_eq!(outcome, PipelineReport::default());
        assert!(!outcome.report.actioned());
        assert_eq!(message.raw(), "Subject: Hi\r\n\r\nbody");
    }

    #[tokio::test]
    async fn test_reports_are_summed() {
        let pipeline = TransformPipeline::new()
            .with(Fixed(TransformReport {
                tracked_links: 2,
                tracked_images: 0,
                body_replaced: true,
            }))
            .with(Fixed(TransformReport {
                tracked_links: 1,
                tracked_images: 1,
                body_replaced: false,
            }));
        assert_eq!(pipeline.len(), 2);

        let outcome = pipeline.run(&mut message()).await;
        assert_eq!(
            outcome.report,
            TransformReport {
                tracked_links: 3,
                tracked_images: 1,
                body_replaced: true,
            }
        );
        assert!(outcome.report.actioned());
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_pipeline() {
        let pipeline = TransformPipeline::new()
            .with(Failing)
            .with(Fixed(TransformReport {
                tracked_links: 1,
                ..Default::default()
            }));

        let mut message = message();
        let outcome = pipeline.run(&mut message).await;
        assert_eq!(outcome.failed, vec!["failing".to_string()]);
        assert_eq!(outcome.report.tracked_links, 1);
        assert_eq!(message.raw(), "Subject: Hi\r\n\r\nbody");
    }

    #[test]
    fn test_pipeline_debug_lists_names() {
        let pipeline = TransformPipeline::new().with(Failing);
        assert_eq!(
            format!("{pipeline:?}"),
            "TransformPipeline { transformers: [\"failing\"] }"
        );
    }
}
