//! Configuration for civic-intake
//!
//! One TOML file carries bootstrap settings (root folder, logging) and the
//! intake policy. Every field has a built-in default, so an empty or missing
//! file yields a working configuration.
//!
//! ```toml
//! root_folder = "/var/lib/civic-intake"
//! municipalities_file = "/etc/civic-intake/municipalities.toml"
//!
//! [logging]
//! level = "info"
//!
//! [intake]
//! auto_approve_threshold = 0.90
//! identifier_salt = "change-me"
//!
//! [quotas]
//! uploads_per_ip = 5
//!
//! [services]
//! extraction_url = "http://127.0.0.1:8088/analyze"
//! ```

use civic_common::config::LoggingConfig;
use civic_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding `intake.identifier_salt`
pub const SALT_ENV_VAR: &str = "CIVIC_IDENTIFIER_SALT";

/// Environment variable overriding `services.extraction_url`
pub const EXTRACTION_URL_ENV_VAR: &str = "CIVIC_EXTRACTION_URL";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntakeConfig {
    /// Data folder holding the database and stored images
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// TOML file with municipality reference data
    #[serde(default)]
    pub municipalities_file: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub intake: IntakeSettings,

    #[serde(default)]
    pub quotas: QuotaSettings,

    #[serde(default)]
    pub services: ServiceSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

/// Intake decision policy
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeSettings {
    /// Structural size limit for uploaded images
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Minimum confidence for publication without human review
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f32,

    /// Two fingerprints are the same document iff distance < this
    #[serde(default = "default_hamming_threshold")]
    pub hamming_threshold: u32,

    /// Pending submissions older than this are expired by the maintenance job
    #[serde(default = "default_pending_retention_days")]
    pub pending_retention_days: i64,

    /// Salt mixed into submitter identifier hashes
    #[serde(default = "default_identifier_salt")]
    pub identifier_salt: String,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
            auto_approve_threshold: default_auto_approve_threshold(),
            hamming_threshold: default_hamming_threshold(),
            pending_retention_days: default_pending_retention_days(),
            identifier_salt: default_identifier_salt(),
        }
    }
}

/// Daily quotas per identifier axis
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSettings {
    #[serde(default = "default_uploads_per_ip")]
    pub uploads_per_ip: u32,

    #[serde(default = "default_uploads_per_device")]
    pub uploads_per_device: u32,

    /// Unset means the municipality axis is not enforced
    #[serde(default)]
    pub uploads_per_municipality: Option<u32>,

    #[serde(default = "default_quiz_completions_per_ip")]
    pub quiz_completions_per_ip: u32,

    /// Counter rows whose window started longer ago than this are purgeable
    #[serde(default = "default_counter_retention_days")]
    pub counter_retention_days: i64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            uploads_per_ip: default_uploads_per_ip(),
            uploads_per_device: default_uploads_per_device(),
            uploads_per_municipality: None,
            quiz_completions_per_ip: default_quiz_completions_per_ip(),
            counter_retention_days: default_counter_retention_days(),
        }
    }
}

/// External collaborator endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub extraction_url: Option<String>,

    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,

    #[serde(default = "default_extraction_requests_per_second")]
    pub extraction_requests_per_second: u32,

    /// Prefix for public image URLs returned by object storage
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            extraction_url: None,
            extraction_timeout_secs: default_extraction_timeout_secs(),
            extraction_requests_per_second: default_extraction_requests_per_second(),
            public_base_url: default_public_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Upper bound for lock-contention retries on write paths
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_auto_approve_threshold() -> f32 {
    0.90
}

fn default_hamming_threshold() -> u32 {
    5
}

fn default_pending_retention_days() -> i64 {
    30
}

fn default_identifier_salt() -> String {
    "civic-intake".to_string()
}

fn default_uploads_per_ip() -> u32 {
    5
}

fn default_uploads_per_device() -> u32 {
    3
}

fn default_quiz_completions_per_ip() -> u32 {
    50
}

fn default_counter_retention_days() -> i64 {
    7
}

fn default_extraction_timeout_secs() -> u64 {
    60
}

fn default_extraction_requests_per_second() -> u32 {
    2
}

fn default_public_base_url() -> String {
    "file://".to_string()
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

impl IntakeConfig {
    /// Load from TOML (missing file ⇒ defaults), apply env overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: IntakeConfig = civic_common::config::load_toml_or_default(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment beats TOML for secrets and endpoints
    pub fn apply_env_overrides(&mut self) {
        if let Ok(salt) = std::env::var(SALT_ENV_VAR) {
            if !salt.trim().is_empty() {
                self.intake.identifier_salt = salt;
            }
        }
        if let Ok(url) = std::env::var(EXTRACTION_URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.services.extraction_url = Some(url);
            }
        }
    }

    /// Reject values that would silently disable a safeguard
    pub fn validate(&self) -> Result<()> {
        let threshold = self.intake.auto_approve_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "intake.auto_approve_threshold must be within 0.0-1.0, got {}",
                threshold
            )));
        }
        if self.intake.max_image_bytes == 0 {
            return Err(Error::Config("intake.max_image_bytes must be positive".to_string()));
        }
        if self.intake.hamming_threshold > 64 {
            return Err(Error::Config(format!(
                "intake.hamming_threshold must be at most 64, got {}",
                self.intake.hamming_threshold
            )));
        }
        if self.intake.pending_retention_days <= 0 {
            return Err(Error::Config(
                "intake.pending_retention_days must be positive".to_string(),
            ));
        }
        if self.intake.identifier_salt.trim().is_empty() {
            return Err(Error::Config("intake.identifier_salt must not be empty".to_string()));
        }

        let q = &self.quotas;
        if q.uploads_per_ip == 0 || q.uploads_per_device == 0 || q.quiz_completions_per_ip == 0 {
            return Err(Error::Config("quota limits must be positive".to_string()));
        }
        if q.uploads_per_municipality == Some(0) {
            return Err(Error::Config(
                "quotas.uploads_per_municipality must be positive when set".to_string(),
            ));
        }
        if q.counter_retention_days <= 0 {
            return Err(Error::Config(
                "quotas.counter_retention_days must be positive".to_string(),
            ));
        }

        if self.services.extraction_requests_per_second == 0 {
            return Err(Error::Config(
                "services.extraction_requests_per_second must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
