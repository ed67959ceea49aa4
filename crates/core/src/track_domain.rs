use std::collections::HashMap;

use serde::Deserialize;
use tracing::info;

/// Subdomain of a track domain that serves redirects and pixels.
pub const CLICK_SUBDOMAIN: &str = "click";

/// A domain of a mail server for which tracking is enabled.
///
/// Presence of a [`TrackDomain`] for the sender domain of a message is a
/// prerequisite for any tracking action on that message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackDomain {
    /// Domain name, matched exactly (ASCII case-insensitive) against the
    /// sender domain of the message.
    pub domain: String,

    /// Domain-level switch for click tracking.
    #[serde(default = "default_true")]
    pub track_clicks: bool,

    /// Domain-level switch for open tracking.
    #[serde(default = "default_true")]
    pub track_opens: bool,

    /// Link hosts that are never rewritten.
    #[serde(default)]
    pub excluded_click_domains: Vec<String>,
}

impl TrackDomain {
    /// Creates a [`TrackDomain`] with both tracking switches on and no
    /// excluded click domains.
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            track_clicks: true,
            track_opens: true,
            excluded_click_domains: Vec::new(),
        }
    }

    /// Returns the host serving redirects and pixels for this domain.
    pub fn click_host(&self) -> String {
        format!("{CLICK_SUBDOMAIN}.{}", self.domain)
    }

    /// Returns whether links pointing at `host` must be left untouched.
    pub fn is_excluded(&self, host: &str) -> bool {
        self.excluded_click_domains
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(host))
    }
}

/// Capability answering "which track domain, if any, does server S have
/// for domain D?".
///
/// Supplied by the surrounding system (database, configuration file, ...)
/// and shared read-only between concurrent parses.
pub trait TrackDomainLookup: Send + Sync {
    /// Returns the track domain registered for `domain` on `server`.
    fn find_track_domain(&self, server: &str, domain: &str) -> Option<TrackDomain>;

    /// Returns whether `server` has a track domain for `domain`.
    fn has_track_domain(&self, server: &str, domain: &str) -> bool {
        self.find_track_domain(server, domain).is_some()
    }
}

/// In-memory [`TrackDomainLookup`], keyed by server token and lowercased
/// domain name.
#[derive(Debug, Default, Clone)]
pub struct TrackDomainRegistry {
    domains: HashMap<(String, String), TrackDomain>,
}

impl TrackDomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `track_domain` for `server`, replacing any previous entry
    /// for the same domain.
    pub fn insert(&mut self, server: &str, track_domain: TrackDomain) {
        let key = (server.to_string(), track_domain.domain.to_ascii_lowercase());
        self.domains.insert(key, track_domain);
    }

    /// Builder style variant of [`insert`](Self::insert).
    pub fn with(mut self, server: &str, track_domain: TrackDomain) -> Self {
        self.insert(server, track_domain);
        self
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Builds a registry from the `[[tracking.servers]]` configuration.
    pub fn from_config(config: &crate::TrackingConfig) -> Self {
        let mut registry = Self::new();
        for server in &config.servers {
            for track_domain in &server.track_domains {
                registry.insert(&server.token, track_domain.clone());
            }
        }
        info!(
            servers = config.servers.len(),
            domains = registry.len(),
            "Track domain registry initialized"
        );
        registry
    }
}

impl TrackDomainLookup for TrackDomainRegistry {
    fn find_track_domain(&self, server: &str, domain: &str) -> Option<TrackDomain> {
        self.domains
            .get(&(server.to_string(), domain.to_ascii_lowercase()))
            .cloned()
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_host() {
        let track_domain = TrackDomain::new("example.com");
        assert_eq!(track_domain.click_host(), "click.example.com");
    }

    #[test]
    fn test_is_excluded_case_insensitive() {
        let mut track_domain = TrackDomain::new("example.com");
        track_domain.excluded_click_domains = vec!["Unsubscribe.example.com".to_string()];
        assert!(track_domain.is_excluded("unsubscribe.example.com"));
        assert!(!track_domain.is_excluded("github.com"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TrackDomainRegistry::new().with("srv1", TrackDomain::new("Example.com"));

        assert!(registry.has_track_domain("srv1", "example.com"));
        assert!(registry.has_track_domain("srv1", "EXAMPLE.COM"));
        assert!(!registry.has_track_domain("srv2", "example.com"));
        assert!(!registry.has_track_domain("srv1", "sub.example.com"));
        assert_eq!(
            registry
                .find_track_domain("srv1", "example.com")
                .map(|d| d.domain),
            Some("Example.com".to_string())
        );
    }

    #[test]
    fn test_registry_insert_replaces() {
        let mut registry = TrackDomainRegistry::new();
        registry.insert("srv1", TrackDomain::new("example.com"));
        let mut updated = TrackDomain::new("example.com");
        updated.track_opens = false;
        registry.insert("srv1", updated);

        assert_eq!(registry.len(), 1);
        assert!(
            !registry
                .find_track_domain("srv1", "example.com")
                .unwrap()
                .track_opens
        );
    }

    #[test]
    fn test_registry_empty() {
        let registry = TrackDomainRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.find_track_domain("srv1", "example.com").is_none());
    }
}
