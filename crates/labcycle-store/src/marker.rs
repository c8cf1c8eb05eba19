use crate::layout::WorkspaceLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// How far an in-flight soft reset got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPhase {
    /// Durable data is being removed.
    Purging,
    /// Durable data is gone; secrets and configuration not yet rewritten.
    Purged,
}

impl fmt::Display for ResetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetPhase::Purging => write!(f, "purging"),
            ResetPhase::Purged => write!(f, "purged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetMarker {
    pub phase: ResetPhase,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

/// Persistent record of an unfinished soft reset.
///
/// The marker is written before the first destructive step and removed only
/// after the configuration has been rewritten, so an interrupted reset is
/// always visible to the next invocation, which resumes it.
pub struct ResetJournal {
    path: PathBuf,
}

impl ResetJournal {
    pub fn new(layout: &WorkspaceLayout) -> Self {
        Self {
            path: layout.reset_marker(),
        }
    }

    /// The marker of an unfinished reset, if any. An unreadable marker is
    /// treated as a reset that had not finished purging.
    pub fn current(&self) -> Option<ResetMarker> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("unreadable reset marker {}: {e}", self.path.display());
                return Some(Self::fallback());
            }
        };
        match serde_json::from_str(&content) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("corrupt reset marker {}: {e}", self.path.display());
                Some(Self::fallback())
            }
        }
    }

    fn fallback() -> ResetMarker {
        ResetMarker {
            phase: ResetPhase::Purging,
            started_at: String::new(),
            backup: None,
        }
    }

    /// Start a reset, or return the unfinished one to resume. A backup taken
    /// while resuming is recorded if the marker had none.
    pub fn begin(&self, backup: Option<PathBuf>) -> Result<ResetMarker, StoreError> {
        if let Some(mut existing) = self.current() {
            debug!("resuming reset started at {} ({})", existing.started_at, existing.phase);
            if existing.backup.is_none() && backup.is_some() {
                existing.backup = backup;
                crate::write_json_atomic(&self.path, &existing)?;
                debug!("reset marker now records the backup");
            }
            return Ok(existing);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let marker = ResetMarker {
            phase: ResetPhase::Purging,
            started_at: chrono::Utc::now().to_rfc3339(),
            backup,
        };
        crate::write_json_atomic(&self.path, &marker)?;
        debug!("reset marker written: {}", self.path.display());
        Ok(marker)
    }

    pub fn advance(&self, phase: ResetPhase) -> Result<(), StoreError> {
        let mut marker = self.current().unwrap_or_else(Self::fallback);
        marker.phase = phase;
        crate::write_json_atomic(&self.path, &marker)?;
        debug!("reset marker advanced to {phase}");
        Ok(())
    }

    /// Remove the marker after the reset fully completed.
    pub fn complete(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("reset marker cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
