use std::{collections::HashSet, fs, path::Path, str::FromStr};

use serde::Deserialize;

use crate::{is_url_safe_token, TrackDomain, OPEN_PATH_PREFIX};

/// Top-level configuration for the tracking rewriter.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Tracking configuration, the track domains of every server.
#[derive(Debug, Default, Deserialize)]
pub struct TrackingConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// A mail server and its track domains.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Server token, embedded in every tracking URL of the server.
    pub token: String,

    #[serde(default)]
    pub track_domains: Vec<TrackDomain>,
}

impl Config {
    /// Checks the invariants serde cannot express: URL-safe server tokens,
    /// non-empty domains and no domain registered twice for a server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for server in &self.tracking.servers {
            if !is_url_safe_token(&server.token) {
                return Err(ConfigError::Invalid(format!(
                    "server token {:?} must be non-empty and only contain ASCII letters, digits, '-' or '_'",
                    server.token
                )));
            }
            if server.token == OPEN_PATH_PREFIX {
                return Err(ConfigError::Invalid(format!(
                    "server token {OPEN_PATH_PREFIX:?} is reserved"
                )));
            }

            for track_domain in &server.track_domains {
                let domain = track_domain.domain.trim();
                if domain.is_empty() || domain.contains(char::is_whitespace) {
                    return Err(ConfigError::Invalid(format!(
                        "invalid track domain {:?} for server {}",
                        track_domain.domain, server.token
                    )));
                }
                if !seen.insert((server.token.as_str(), domain.to_ascii_lowercase())) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate track domain {domain} for server {}",
                        server.token
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parses and validates configuration from TOML text.
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    content.parse()
}

/// Errors that can occur while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred reading the file.
    Io(std::io::Error),
    /// A parse error occurred deserializing TOML.
    Parse(toml::de::Error),
    /// The configuration parsed but is not usable.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "Config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
