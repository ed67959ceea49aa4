//! Resolution of the per-message tracking policy.
//!
//! Click and open tracking are decided independently: each requires a
//! [`TrackDomain`] for the sender domain, the domain-level switch and the
//! absence of the matching opt-out header on the message.

use tracing::debug;

use crate::{EmailMessage, TrackDomain, TrackDomainLookup};

/// Header through which a message opts out of click tracking.
pub const TRACK_CLICKS_HEADER: &str = "x-track-clicks";

/// Header through which a message opts out of open tracking.
pub const TRACK_OPENS_HEADER: &str = "x-track-opens";

/// State of a single tracking feature as requested by a message header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingOption {
    #[default]
    Enabled,
    Disabled,
}

impl TrackingOption {
    /// Interprets an opt-out header value, only `no` disables tracking.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("no") => TrackingOption::Disabled,
            _ => TrackingOption::Enabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == TrackingOption::Enabled
    }
}

/// The tracking options requested by a message through its headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingOptions {
    pub clicks: TrackingOption,
    pub opens: TrackingOption,
}

impl TrackingOptions {
    pub fn from_message(message: &EmailMessage) -> Self {
        Self {
            clicks: TrackingOption::from_header(message.header(TRACK_CLICKS_HEADER)),
            opens: TrackingOption::from_header(message.header(TRACK_OPENS_HEADER)),
        }
    }
}

/// Outcome of the policy resolution for one message.
///
/// `clicks` and `opens` can only be `true` when `track_domain` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingDecision {
    pub track_domain: Option<TrackDomain>,
    pub clicks: bool,
    pub opens: bool,
}

impl TrackingDecision {
    /// A decision with every feature off.
    pub fn disabled() -> Self {
        Self {
            track_domain: None,
            clicks: false,
            opens: false,
        }
    }

    /// Resolves the decision for `message` using `lookup` to find the
    /// track domain of its sender domain.
    pub fn resolve(message: &EmailMessage, lookup: &dyn TrackDomainLookup) -> Self {
        let Some(domain) = message.sender_domain() else {
            debug!(from = %message.from, "No sender domain, tracking disabled");
            return Self::disabled();
        };

        let Some(track_domain) = lookup.find_track_domain(&message.server, &domain) else {
            debug!(
                server = %message.server,
                domain = %domain,
                "No track domain, tracking disabled"
            );
            return Self::disabled();
        };

        Self::from_parts(track_domain, TrackingOptions::from_message(message))
    }

    /// Combines a matched track domain with the message options.
    pub fn from_parts(track_domain: TrackDomain, options: TrackingOptions) -> Self {
        let clicks = track_domain.track_clicks && options.clicks.is_enabled();
        let opens = track_domain.track_opens && options.opens.is_enabled();
        debug!(
            domain = %track_domain.domain,
            clicks = clicks,
            opens = opens,
            "Tracking policy resolved"
        );
        Self {
            track_domain: Some(track_domain),
            clicks,
            opens,
        }
    }

    /// Returns whether any tracking feature is active.
    pub fn is_active(&self) -> bool {
        self.clicks || self.opens
    }
}
