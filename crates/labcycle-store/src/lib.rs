//! Workspace storage for the lab lifecycle tooling.
//!
//! This crate owns everything that touches the workspace tree on disk:
//! `WorkspaceLayout` for the fixed path scheme and install marker,
//! `workspace` for idempotent provisioning, permission enforcement and the
//! transient/durable purges, `ResetJournal` for resumable soft resets, and
//! `backup` for timestamped zstd-compressed tar snapshots written outside the
//! workspace.

pub mod backup;
pub mod layout;
pub mod marker;
pub mod workspace;

pub use backup::{
    list_backups, snapshot, BackupArchive, BackupEntry, BackupIdentity, BackupOutcome,
    SkippedSubtree,
};
pub use layout::{InstallMarker, WorkspaceLayout, WORKSPACE_FORMAT_VERSION};
pub use marker::{ResetJournal, ResetMarker, ResetPhase};
pub use workspace::{
    audit_permissions, discard_root, ensure, purge_durable, purge_transient, sweep_trash,
    write_secret_file, PermissionIssue, PurgeReport, WorkspaceReport,
};

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

/// Serialize `value` as pretty JSON and atomically replace `dest` with it.
pub(crate) fn write_json_atomic(dest: &Path, value: &impl Serialize) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let content = serde_json::to_string_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(&dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("workspace format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("refusing to use '{path}' as a workspace: {reason}")]
    UnsafeRoot { path: PathBuf, reason: String },
    #[error("interrupted while {0}; re-run the same command to finish")]
    Interrupted(String),
    #[error("backup failed: {0}")]
    Backup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_display_unsafe_root() {
        let e = StoreError::UnsafeRoot {
            path: PathBuf::from("/"),
            reason: "filesystem root".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'/'"));
        assert!(msg.contains("filesystem root"));
    }

    #[test]
    fn store_error_display_interrupted() {
        let e = StoreError::Interrupted("purging logs".to_owned());
        assert!(e.to_string().contains("re-run"));
    }

    #[test]
    fn write_json_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("state.json");
        write_json_atomic(&dest, &serde_json::json!({"n": 1})).unwrap();
        write_json_atomic(&dest, &serde_json::json!({"n": 2})).unwrap();
        let content = fs::read_to_string(&dest).unwrap();
        assert!(content.contains('2'));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
