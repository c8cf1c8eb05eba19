//! Configuration schema for the weather-station lab workspace.
//!
//! This crate defines the on-disk `.env` configuration format (`ConfigStore`),
//! the catalogue of keys the lifecycle tooling owns (`keys`), the platform and
//! sensor vocabulary (`PlatformProfile`, `SensorType`), and the
//! platform-conditioned defaults that keep a simulation-only host from ever
//! being configured for real sensors (`apply_defaults`).

pub mod defaults;
pub mod envfile;
pub mod keys;
pub mod types;

pub use defaults::{apply_defaults, seed_install_defaults, DefaultsPolicy, INSTALL_DEFAULTS};
pub use envfile::ConfigStore;
pub use keys::{is_secret_key, mask_secret, SecretKind, SECRET_KEYS};
pub use types::{ExperienceLevel, Personalization, PlatformKind, PlatformProfile, SensorType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration key '{0}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidKey(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("unknown sensor type '{0}' (expected AUTO, BME280, DHT22, AHT20_BMP280, SIMULATED)")]
    UnknownSensor(String),
    #[error("unknown experience level '{0}' (expected beginner, intermediate, advanced)")]
    UnknownLevel(String),
}
