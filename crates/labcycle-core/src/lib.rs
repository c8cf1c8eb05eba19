//! Lifecycle orchestration for weather-station lab workspaces.
//!
//! This crate ties together the configuration schema, platform detection and
//! workspace storage into `Lifecycle`, the API behind `install`,
//! `personalize`, `soft-reset`, `hard-reset` and `clean`. It also provides
//! secret generation from the OS randomness source, the `Operator`
//! confirmation capability, the lifecycle state machine and Ctrl-C handling.

pub mod confirm;
pub mod engine;
pub mod interrupt;
pub mod lifecycle;
pub mod secrets;

pub use confirm::{AcceptAll, Operator, ScriptedOperator, HARD_RESET_PHRASE};
pub use engine::{BackupMode, Lifecycle, OperationReport, ResetOptions, StatusReport};
pub use interrupt::{install_signal_handler, shutdown_requested};
pub use lifecycle::{observe, validate_transition, LifecycleState, Operation};
pub use secrets::{SecretProvisioner, MIN_SECRET_BYTES};

use labcycle_schema::SchemaError;
use labcycle_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Schema(#[from] SchemaError),
    #[error("workspace error: {0}")]
    Store(#[from] StoreError),
    #[error("randomness source unavailable: {0}")]
    Entropy(String),
    #[error("{0} aborted: confirmation declined")]
    ConfirmationDeclined(String),
    #[error("workspace is not installed; run `labcycle install` first")]
    NotInstalled,
    #[error("a soft reset is unfinished ({0}); run `labcycle soft-reset` or `labcycle install` to complete it")]
    UnfinishedReset(String),
    #[error("workspace root '{path}' is not writable: {reason}")]
    RootNotWritable { path: PathBuf, reason: String },
    #[error("sensor {sensor} needs hardware interfaces, but {platform} is simulation-only")]
    IncompatibleSensor { sensor: String, platform: String },
    #[error("backup required but failed: {0}")]
    BackupFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Errors that must stop an operation outright and can never be
    /// downgraded to a warning.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Entropy(_)
                | CoreError::ConfirmationDeclined(_)
                | CoreError::RootNotWritable { .. }
        )
    }

    /// Rejected input, detected before anything was written.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::IncompatibleSensor { .. }
                | CoreError::Schema(
                    SchemaError::InvalidKey(_)
                        | SchemaError::InvalidValue { .. }
                        | SchemaError::UnknownSensor(_)
                        | SchemaError::UnknownLevel(_)
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoreError::Entropy("getrandom failed".to_owned()).is_fatal());
        assert!(CoreError::ConfirmationDeclined("hard reset".to_owned()).is_fatal());
        assert!(CoreError::RootNotWritable {
            path: PathBuf::from("/ro"),
            reason: "read-only file system".to_owned(),
        }
        .is_fatal());
        assert!(!CoreError::BackupFailed("disk full".to_owned()).is_fatal());
        assert!(!CoreError::NotInstalled.is_fatal());
    }

    #[test]
    fn validation_classification() {
        let e = CoreError::IncompatibleSensor {
            sensor: "BME280".to_owned(),
            platform: "Ubuntu 24.04".to_owned(),
        };
        assert!(e.is_validation());
        assert!(!e.is_fatal());
        assert!(CoreError::Schema(SchemaError::UnknownLevel("expert".to_owned())).is_validation());
        assert!(!CoreError::NotInstalled.is_validation());
    }

    #[test]
    fn messages_point_at_the_fix() {
        assert!(CoreError::NotInstalled.to_string().contains("labcycle install"));
        assert!(CoreError::UnfinishedReset("purging".to_owned())
            .to_string()
            .contains("soft-reset"));
        let e = CoreError::IncompatibleSensor {
            sensor: "DHT22".to_owned(),
            platform: "Fedora Linux 40".to_owned(),
        };
        assert!(e.to_string().contains("DHT22"));
        assert!(e.to_string().contains("simulation-only"));
    }
}
