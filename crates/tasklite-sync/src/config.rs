//! Sync engine configuration, loadable from TOML.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tasklite_store::StoreConfig;

use crate::backoff::Backoff;

const DEFAULT_TOMBSTONE_RETENTION_MS: u64 = 10_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_CAP_MS: u64 = 8_000;
const DEFAULT_BACKOFF_MAX_ATTEMPTS: u32 = 5;

/// Top-level sync configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long delete tombstones are retained, in milliseconds. Sized
    /// to absorb the round trip of propagating a delete before a stale
    /// remote snapshot could resurrect it.
    pub tombstone_retention_ms: u64,
    /// Retry policy for transient remote failures.
    pub backoff: BackoffConfig,
}

/// Backoff policy block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds.
    pub base_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub cap_ms: u64,
    /// Retries before a mutation cycle is declared failed.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_BASE_MS,
            cap_ms: DEFAULT_BACKOFF_CAP_MS,
            max_attempts: DEFAULT_BACKOFF_MAX_ATTEMPTS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tombstone_retention_ms: DEFAULT_TOMBSTONE_RETENTION_MS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file. Missing keys fall back to
    /// the defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or parsed, or when
    /// the values fail validation.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backoff.max_attempts == 0 {
            bail!("backoff.max_attempts must be at least 1");
        }
        if self.backoff.cap_ms < self.backoff.base_ms {
            bail!("backoff.cap_ms must not be smaller than backoff.base_ms");
        }
        Ok(())
    }

    /// Tombstone retention as a [`Duration`].
    #[must_use]
    pub const fn tombstone_retention(&self) -> Duration {
        Duration::from_millis(self.tombstone_retention_ms)
    }

    /// Backoff schedule derived from this configuration.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.base_ms),
            Duration::from_millis(self.backoff.cap_ms),
            self.backoff.max_attempts,
        )
    }

    /// Store configuration matching this sync configuration.
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig {
            tombstone_retention: self.tombstone_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = SyncConfig::default();
        assert_eq!(config.tombstone_retention(), Duration::from_secs(10));
        assert_eq!(config.backoff.base_ms, 500);
        assert_eq!(config.backoff.cap_ms, 8_000);
        assert_eq!(config.backoff.max_attempts, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "tombstone_retention_ms = 2500").expect("write");
        writeln!(file, "[backoff]").expect("write");
        writeln!(file, "max_attempts = 2").expect("write");

        let config = SyncConfig::from_path(file.path()).expect("valid config");
        assert_eq!(config.tombstone_retention(), Duration::from_millis(2500));
        assert_eq!(config.backoff.max_attempts, 2);
        assert_eq!(config.backoff.base_ms, 500);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[backoff]").expect("write");
        writeln!(file, "max_attempts = 0").expect("write");

        assert!(SyncConfig::from_path(file.path()).is_err());
    }
}
