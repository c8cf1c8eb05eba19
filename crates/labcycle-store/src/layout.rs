use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current workspace format version. Incremented on incompatible layout changes.
pub const WORKSPACE_FORMAT_VERSION: u32 = 1;

const STATE_DIR: &str = ".labcycle";
const INSTALL_MARKER: &str = "install.json";
const RESET_MARKER: &str = "reset.json";

/// Fixed path scheme of one lab workspace.
///
/// The backup root never lies inside the workspace root; see [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
    backup_root: PathBuf,
}

/// Written once a workspace has been installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMarker {
    pub format_version: u32,
    pub installed_at: String,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backup_root: backup_root.into(),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// The application's `.env` configuration store.
    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join(".env")
    }

    #[inline]
    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    #[inline]
    pub fn master_key_file(&self) -> PathBuf {
        self.credentials_dir().join("master.key")
    }

    #[inline]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[inline]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Student source overrides. Optional; backed up when present.
    #[inline]
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    #[inline]
    pub fn install_marker(&self) -> PathBuf {
        self.state_dir().join(INSTALL_MARKER)
    }

    #[inline]
    pub fn reset_marker(&self) -> PathBuf {
        self.state_dir().join(RESET_MARKER)
    }

    /// Reject roots that would make a hard reset catastrophic, and backup
    /// roots that a hard reset would destroy.
    pub fn validate(&self) -> Result<(), StoreError> {
        let root = std::path::absolute(&self.root)?;
        let backup_root = std::path::absolute(&self.backup_root)?;

        let unsafe_root = |reason: &str| StoreError::UnsafeRoot {
            path: self.root.clone(),
            reason: reason.to_owned(),
        };

        if root.parent().is_none() {
            return Err(unsafe_root("it is the filesystem root"));
        }
        if let Some(home) = std::env::var_os("HOME") {
            if let Ok(home) = std::path::absolute(PathBuf::from(home)) {
                if root == home {
                    return Err(unsafe_root("it is the home directory"));
                }
            }
        }
        if backup_root.starts_with(&root) {
            return Err(unsafe_root(&format!(
                "backup root {} lies inside it",
                self.backup_root.display()
            )));
        }
        if root.starts_with(&backup_root) {
            return Err(unsafe_root(&format!(
                "it lies inside the backup root {}",
                self.backup_root.display()
            )));
        }
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.install_marker().is_file()
    }

    pub fn read_install_marker(&self) -> Result<Option<InstallMarker>, StoreError> {
        let path = self.install_marker();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let marker: InstallMarker = serde_json::from_str(&content)?;
        if marker.format_version != WORKSPACE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: WORKSPACE_FORMAT_VERSION,
                found: marker.format_version,
            });
        }
        Ok(Some(marker))
    }

    /// Write the install marker unless a valid one already exists.
    pub fn write_install_marker(&self) -> Result<InstallMarker, StoreError> {
        if let Some(existing) = self.read_install_marker()? {
            return Ok(existing);
        }
        fs::create_dir_all(self.state_dir())?;
        let marker = InstallMarker {
            format_version: WORKSPACE_FORMAT_VERSION,
            installed_at: chrono::Utc::now().to_rfc3339(),
        };
        crate::write_json_atomic(&self.install_marker(), &marker)?;
        Ok(marker)
    }
}
