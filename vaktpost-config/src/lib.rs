//! # Vaktpost Configuration System
//!
//! Hierarchical configuration for the policy reconciler and the flow
//! classification pipeline. Read once at startup, never on the hot path.
//!
//! ## Sources, lowest precedence first
//! - built-in defaults
//! - `config/vaktpost.yaml`
//! - `config/<VAKTPOST_ENV>.yaml`
//! - `VAKTPOST_*` environment variables (`__` separates nested keys)

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod error;
mod prevention;
mod telemetry;
mod transport;
pub mod validation;

pub use capture::CaptureConfig;
pub use error::ConfigError;
pub use prevention::{FirewallConfig, ReconcilerConfig};
pub use telemetry::TelemetryConfig;
pub use transport::{ClassifierConfig, StoreConfig, TransportConfig};

/// Base configuration file.
pub const BASE_CONFIG: &str = "config/vaktpost.yaml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "VAKTPOST_";

/// Top‑level configuration container for all Vaktpost components.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct VaktpostConfig {
    /// Live capture parameters.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Firewall backend and enforcement vocabulary.
    #[validate(nested)]
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Reconciliation loop timing and fan-out.
    #[validate(nested)]
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Streaming transport endpoints.
    #[validate(nested)]
    #[serde(default)]
    pub transport: TransportConfig,

    #[validate(nested)]
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[validate(nested)]
    #[serde(default)]
    pub store: StoreConfig,

    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl VaktpostConfig {
    /// Load configuration from default files and environment.
    ///
    /// Missing files are skipped; the result is validated before it is
    /// returned.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(VaktpostConfig::default()));

        if Path::new(BASE_CONFIG).exists() {
            figment = figment.merge(Yaml::file(BASE_CONFIG));
        }

        let env = std::env::var("VAKTPOST_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from an explicit YAML or JSON file, still honoring
    /// environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(VaktpostConfig::default()));
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Yaml::file(path)),
        };

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
