//! Configuration for the relay bridge.
//!
//! The file lives at `~/.relaybridge/config.toml`; every section is optional:
//!
//! ```toml
//! [relay]
//! server_url = "https://syftbox.net/"
//! from = "guest@syft.local"
//!
//! [polling]
//! max_attempts = 20
//! interval_ms = 3000
//!
//! [dedup]
//! enabled = true
//! window_secs = 3600
//! strategy = "sha256"
//!
//! [sync]
//! refresh_interval_ms = 1000
//! auto_resume = true
//!
//! [store]
//! dir = "~/.relaybridge/store"
//! key = "relaybridge.requests"
//! ```
//!
//! [`RelayBridgeConfig`] mirrors the file. [`BridgeSettings::resolve`] fills in
//! defaults, applies environment overrides and validates the result.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relaybridge_types::{FingerprintStrategy, validate_address};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "https://syftbox.net/";
pub const ANONYMOUS_FROM: &str = "guest@syft.local";
pub const DEFAULT_STORE_KEY: &str = "relaybridge.requests";

pub const DEFAULT_POLL_ATTEMPTS: u32 = 20;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const SERVER_URL_ENV: &str = "RELAYBRIDGE_SERVER_URL";
pub const FROM_ENV: &str = "RELAYBRIDGE_FROM";

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayBridgeConfig {
    pub relay: Option<RelayConfig>,
    pub polling: Option<PollingConfig>,
    pub dedup: Option<DedupConfig>,
    pub sync: Option<SyncConfig>,
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } => None,
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Relay server and caller identity.
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfig {
    pub server_url: Option<String>,
    /// Originator address stamped on every call.
    pub from: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PollingConfig {
    pub max_attempts: Option<u32>,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub strategy: FingerprintStrategy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: None,
            strategy: FingerprintStrategy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    pub refresh_interval_ms: Option<u64>,
    /// Resume unfinished requests when a bridge opens.
    #[serde(default = "default_true")]
    pub auto_resume: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: None,
            auto_resume: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    pub dir: Option<String>,
    pub key: Option<String>,
}

/// Replaces `${VAR}` with the variable's value (empty when unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            Some(end) => {
                // "${}" stays literal.
                out.push_str(&rest[start..start + 2 + end + 1]);
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl RelayBridgeConfig {
    /// Loads `~/.relaybridge/config.toml`. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    relaybridge_dir().map(|dir| dir.join("config.toml"))
}

/// `~/.relaybridge`, home of the config file, logs and the default store.
#[must_use]
pub fn relaybridge_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".relaybridge"))
}

fn default_store_dir() -> PathBuf {
    relaybridge_dir()
        .unwrap_or_else(|| PathBuf::from(".relaybridge"))
        .join("store")
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(raw), |home| home.join(rest)),
        None => PathBuf::from(raw),
    }
}

/// Fully resolved settings the bridge runs with.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub server_url: Url,
    pub from: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub dedup_enabled: bool,
    pub dedup_window: Duration,
    pub fingerprint: FingerprintStrategy,
    pub refresh_interval: Duration,
    pub auto_resume: bool,
    pub store_dir: PathBuf,
    pub store_key: String,
}

impl BridgeSettings {
    /// Defaults for everything except the relay location.
    #[must_use]
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            from: ANONYMOUS_FROM.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dedup_enabled: true,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            fingerprint: FingerprintStrategy::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            auto_resume: true,
            store_dir: default_store_dir(),
            store_key: DEFAULT_STORE_KEY.to_string(),
        }
    }

    /// Resolves against the process environment.
    pub fn resolve(config: Option<&RelayBridgeConfig>) -> Result<Self, ConfigError> {
        Self::resolve_with_env(config, |name| env::var(name).ok())
    }

    pub fn resolve_with_env(
        config: Option<&RelayBridgeConfig>,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let relay = config.and_then(|c| c.relay.as_ref());
        let polling = config.and_then(|c| c.polling.as_ref());
        let dedup = config.and_then(|c| c.dedup.as_ref());
        let sync = config.and_then(|c| c.sync.as_ref());
        let store = config.and_then(|c| c.store.as_ref());

        let server_url = env_lookup(SERVER_URL_ENV)
            .or_else(|| relay.and_then(|r| r.server_url.as_deref()).map(expand_env_vars))
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server_url = parse_server_url(&server_url)?;

        let mut settings = Self::new(server_url);

        if let Some(from) = env_lookup(FROM_ENV)
            .or_else(|| relay.and_then(|r| r.from.as_deref()).map(expand_env_vars))
        {
            settings.from = from;
        }
        if let Some(relay) = relay {
            if let Some(secs) = relay.connect_timeout_secs {
                settings.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = relay.request_timeout_secs {
                settings.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(polling) = polling {
            if let Some(attempts) = polling.max_attempts {
                settings.poll_attempts = attempts;
            }
            if let Some(ms) = polling.interval_ms {
                settings.poll_interval = Duration::from_millis(ms);
            }
        }
        if let Some(dedup) = dedup {
            settings.dedup_enabled = dedup.enabled;
            settings.fingerprint = dedup.strategy;
            if let Some(secs) = dedup.window_secs {
                settings.dedup_window = Duration::from_secs(secs);
            }
        }
        if let Some(sync) = sync {
            settings.auto_resume = sync.auto_resume;
            if let Some(ms) = sync.refresh_interval_ms {
                settings.refresh_interval = Duration::from_millis(ms);
            }
        }
        if let Some(store) = store {
            if let Some(dir) = &store.dir {
                settings.store_dir = expand_home(&expand_env_vars(dir));
            }
            if let Some(key) = &store.key {
                settings.store_key.clone_from(key);
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.from)
            .map_err(|e| ConfigError::invalid("relay.from", e.to_string()))?;
        if self.poll_attempts == 0 {
            return Err(ConfigError::invalid(
                "polling.max_attempts",
                "must be at least 1",
            ));
        }
        if self.dedup_enabled && self.dedup_window.is_zero() {
            return Err(ConfigError::invalid(
                "dedup.window_secs",
                "must be positive when dedup is enabled",
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::invalid(
                "sync.refresh_interval_ms",
                "must be positive",
            ));
        }
        if self.store_key.trim().is_empty() {
            return Err(ConfigError::invalid("store.key", "cannot be empty"));
        }
        Ok(())
    }
}

pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::invalid("relay.server_url", format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "relay.server_url",
            format!("{raw}: scheme must be http or https"),
        ));
    }
    if url.cannot_be_a_base() {
        return Err(ConfigError::invalid(
            "relay.server_url",
            format!("{raw}: not a base url"),
        ));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_empty_config() {
        let config: RelayBridgeConfig = toml::from_str("").unwrap();
        assert!(config.relay.is_none());
        assert!(config.dedup.is_none());
    }

    #[test]
    fn resolve_defaults() {
        let settings = BridgeSettings::resolve_with_env(None, no_env).unwrap();
        assert_eq!(settings.server_url.as_str(), DEFAULT_SERVER_URL);
        assert_eq!(settings.from, ANONYMOUS_FROM);
        assert_eq!(settings.poll_attempts, 20);
        assert_eq!(settings.poll_interval, Duration::from_millis(3000));
        assert!(settings.dedup_enabled);
        assert_eq!(settings.dedup_window, Duration::from_secs(3600));
        assert_eq!(settings.fingerprint, FingerprintStrategy::Sha256);
        assert_eq!(settings.refresh_interval, Duration::from_secs(1));
        assert!(settings.auto_resume);
        assert_eq!(settings.store_key, DEFAULT_STORE_KEY);
    }

    #[test]
    fn resolve_full_config() {
        let toml_str = r#"
[relay]
server_url = "http://localhost:8080/"
from = "bob@openmined.org"
connect_timeout_secs = 5

[polling]
max_attempts = 3
interval_ms = 10

[dedup]
enabled = false
strategy = "rolling"

[sync]
refresh_interval_ms = 250
auto_resume = false

[store]
dir = "/tmp/relaybridge"
key = "custom.key"
"#;
        let config: RelayBridgeConfig = toml::from_str(toml_str).unwrap();
        let settings = BridgeSettings::resolve_with_env(Some(&config), no_env).unwrap();
        assert_eq!(settings.server_url.as_str(), "http://localhost:8080/");
        assert_eq!(settings.from, "bob@openmined.org");
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.poll_attempts, 3);
        assert_eq!(settings.poll_interval, Duration::from_millis(10));
        assert!(!settings.dedup_enabled);
        assert_eq!(settings.fingerprint, FingerprintStrategy::Rolling);
        assert_eq!(settings.refresh_interval, Duration::from_millis(250));
        assert!(!settings.auto_resume);
        assert_eq!(settings.store_dir, PathBuf::from("/tmp/relaybridge"));
        assert_eq!(settings.store_key, "custom.key");
    }

    #[test]
    fn dedup_section_defaults_to_enabled() {
        let config: RelayBridgeConfig = toml::from_str("[dedup]\nwindow_secs = 60\n").unwrap();
        let settings = BridgeSettings::resolve_with_env(Some(&config), no_env).unwrap();
        assert!(settings.dedup_enabled);
        assert_eq!(settings.dedup_window, Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_file() {
        let config: RelayBridgeConfig =
            toml::from_str("[relay]\nserver_url = \"https://file.example/\"\n").unwrap();
        let settings = BridgeSettings::resolve_with_env(Some(&config), |name| match name {
            SERVER_URL_ENV => Some("https://env.example/".to_string()),
            FROM_ENV => Some("carol@openmined.org".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.server_url.as_str(), "https://env.example/");
        assert_eq!(settings.from, "carol@openmined.org");
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("[relay]\nserver_url = \"ftp://x/\"\n", "relay.server_url"),
            ("[relay]\nserver_url = \"not a url\"\n", "relay.server_url"),
            ("[relay]\nfrom = \"nobody\"\n", "relay.from"),
            ("[polling]\nmax_attempts = 0\n", "polling.max_attempts"),
            ("[dedup]\nwindow_secs = 0\n", "dedup.window_secs"),
            ("[sync]\nrefresh_interval_ms = 0\n", "sync.refresh_interval_ms"),
            ("[store]\nkey = \" \"\n", "store.key"),
        ];
        for (toml_str, expected_field) in cases {
            let config: RelayBridgeConfig = toml::from_str(toml_str).unwrap();
            match BridgeSettings::resolve_with_env(Some(&config), no_env) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected invalid {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_window_is_fine_when_dedup_disabled() {
        let config: RelayBridgeConfig =
            toml::from_str("[dedup]\nenabled = false\nwindow_secs = 0\n").unwrap();
        assert!(BridgeSettings::resolve_with_env(Some(&config), no_env).is_ok());
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[relay\n").unwrap();
        let err = RelayBridgeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), Some(&path));
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RelayBridgeConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        assert_eq!(
            expand_env_vars("a${RELAYBRIDGE_TEST_SURELY_UNSET_VAR}b"),
            "ab"
        );
    }

    #[test]
    fn expand_env_vars_preserves_malformed_references() {
        assert_eq!(expand_env_vars("x${}y"), "x${}y");
        assert_eq!(expand_env_vars("x${OPEN"), "x${OPEN");
    }

    #[test]
    fn expand_home_handles_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/store"), home.join("store"));
        }
        assert_eq!(expand_home("/abs/store"), PathBuf::from("/abs/store"));
    }
}
