//! Directory provisioning, permission enforcement and purging.

use crate::layout::WorkspaceLayout;
use crate::StoreError;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const CREDENTIALS_DIR_MODE: u32 = 0o700;
pub const SECRET_FILE_MODE: u32 = 0o600;
pub const PUBLIC_DIR_MODE: u32 = 0o755;
pub const STATE_DIR_MODE: u32 = 0o700;
pub const BACKUP_ROOT_MODE: u32 = 0o700;

/// Directory names that only ever hold regenerable caches.
const TRANSIENT_DIRS: &[&str] = &["__pycache__", ".pytest_cache", ".mypy_cache"];
/// File extensions of disposable artifacts.
const TRANSIENT_EXTENSIONS: &[&str] = &["pyc", "pyo", "tmp"];

#[derive(Debug, Default, Clone, Serialize)]
pub struct WorkspaceReport {
    pub created: Vec<PathBuf>,
    pub permissions_fixed: Vec<PathBuf>,
    /// Set when the backup root could not be provisioned. The workspace
    /// itself is still usable.
    pub backup_root_error: Option<String>,
}

impl WorkspaceReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.permissions_fixed.is_empty()
            && self.backup_root_error.is_none()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub bytes_removed: u64,
}

impl PurgeReport {
    fn absorb(&mut self, other: PurgeReport) {
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
        self.bytes_removed += other.bytes_removed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionIssue {
    pub path: PathBuf,
    pub expected: u32,
    pub found: u32,
}

impl std::fmt::Display for PermissionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} has mode {:o}, expected {:o}",
            self.path.display(),
            self.found,
            self.expected
        )
    }
}

fn managed_dirs(layout: &WorkspaceLayout) -> [(PathBuf, u32); 4] {
    [
        (layout.credentials_dir(), CREDENTIALS_DIR_MODE),
        (layout.logs_dir(), PUBLIC_DIR_MODE),
        (layout.data_dir(), PUBLIC_DIR_MODE),
        (layout.state_dir(), STATE_DIR_MODE),
    ]
}

fn secret_files(layout: &WorkspaceLayout) -> [PathBuf; 2] {
    [layout.config_file(), layout.master_key_file()]
}

fn mode_of(path: &Path) -> Result<u32, std::io::Error> {
    Ok(path.symlink_metadata()?.permissions().mode() & 0o777)
}

/// Set `mode` on `path` if it differs. Returns whether anything changed.
pub(crate) fn enforce_mode(path: &Path, mode: u32) -> Result<bool, std::io::Error> {
    if mode_of(path)? == mode {
        return Ok(false);
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(true)
}

fn ensure_dir(dir: PathBuf, mode: u32, report: &mut WorkspaceReport) -> Result<(), std::io::Error> {
    let existed = dir.is_dir();
    if !existed {
        fs::create_dir_all(&dir)?;
        debug!("created {}", dir.display());
        report.created.push(dir.clone());
    }
    if enforce_mode(&dir, mode)? && existed {
        warn!("repaired permissions on {} to {mode:o}", dir.display());
        report.permissions_fixed.push(dir);
    }
    Ok(())
}

/// Create the workspace skeleton and backup root, then enforce permissions.
///
/// Idempotent: a second run creates nothing and only repairs modes that
/// drifted since.
pub fn ensure(layout: &WorkspaceLayout) -> Result<WorkspaceReport, StoreError> {
    let mut report = WorkspaceReport::default();

    if !layout.root().exists() {
        fs::create_dir_all(layout.root())?;
        report.created.push(layout.root().to_path_buf());
    }

    for (dir, mode) in managed_dirs(layout) {
        ensure_dir(dir, mode, &mut report)?;
    }
    let backup_root = layout.backup_root().to_path_buf();
    if let Err(e) = ensure_dir(backup_root, BACKUP_ROOT_MODE, &mut report) {
        warn!("backup root {} unavailable: {e}", layout.backup_root().display());
        report.backup_root_error = Some(e.to_string());
    }

    for file in secret_files(layout) {
        if file.is_file() && enforce_mode(&file, SECRET_FILE_MODE)? {
            warn!("repaired permissions on {} to {SECRET_FILE_MODE:o}", file.display());
            report.permissions_fixed.push(file);
        }
    }

    Ok(report)
}

/// Atomically replace a small credential file, leaving it owner-only.
pub fn write_secret_file(path: &Path, contents: &str) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(SECRET_FILE_MODE))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    crate::fsync_dir(&dir)?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Report every managed path whose mode differs from what `ensure` enforces.
pub fn audit_permissions(layout: &WorkspaceLayout) -> Vec<PermissionIssue> {
    let dirs = managed_dirs(layout);
    let backup_root = (layout.backup_root().to_path_buf(), BACKUP_ROOT_MODE);
    let files = secret_files(layout).map(|f| (f, SECRET_FILE_MODE));
    dirs.into_iter()
        .chain(std::iter::once(backup_root))
        .chain(files)
        .filter_map(|(path, expected)| {
            let found = mode_of(&path).ok()?;
            (found != expected).then_some(PermissionIssue {
                path,
                expected,
                found,
            })
        })
        .collect()
}

fn is_rotated_log(name: &str) -> bool {
    let Some(idx) = name.find(".log.") else {
        return false;
    };
    let rest = &name[idx + ".log.".len()..];
    rest.split('.')
        .all(|part| part == "gz" || (!part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())))
}

fn is_transient_file(name: &str) -> bool {
    let ext = Path::new(name).extension().and_then(|e| e.to_str());
    ext.is_some_and(|e| TRANSIENT_EXTENSIONS.contains(&e)) || is_rotated_log(name)
}

/// Size and entry count of a tree, without following symlinks.
fn tally(path: &Path) -> PurgeReport {
    let mut report = PurgeReport::default();
    let Ok(meta) = path.symlink_metadata() else {
        return report;
    };
    if !meta.is_dir() {
        report.files_removed = 1;
        report.bytes_removed = meta.len();
        return report;
    }
    report.dirs_removed = 1;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            report.absorb(tally(&entry.path()));
        }
    }
    report
}

/// Remove a file or directory tree, treating prior absence as success.
fn remove_entry(path: &Path) -> Result<PurgeReport, StoreError> {
    let Ok(meta) = path.symlink_metadata() else {
        return Ok(PurgeReport::default());
    };
    let report = tally(path);
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(report),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PurgeReport::default()),
        Err(e) => Err(e.into()),
    }
}

/// Remove caches and disposable files anywhere under the workspace root.
///
/// The credential directory, the state directory and the configuration file
/// are never entered or touched. Symlinks are not followed.
pub fn purge_transient(
    layout: &WorkspaceLayout,
    should_stop: impl Fn() -> bool,
) -> Result<PurgeReport, StoreError> {
    let protected = [
        layout.credentials_dir(),
        layout.state_dir(),
        layout.config_file(),
    ];
    let mut report = PurgeReport::default();
    if layout.root().is_dir() {
        purge_transient_in(layout.root(), &protected, &should_stop, &mut report)?;
    }
    info!(
        "transient purge: {} files, {} dirs, {} bytes",
        report.files_removed, report.dirs_removed, report.bytes_removed
    );
    Ok(report)
}

fn purge_transient_in(
    dir: &Path,
    protected: &[PathBuf],
    should_stop: &impl Fn() -> bool,
    report: &mut PurgeReport,
) -> Result<(), StoreError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if should_stop() {
            return Err(StoreError::Interrupted("removing transient files".to_owned()));
        }
        if protected.contains(&path) {
            continue;
        }
        let Ok(meta) = path.symlink_metadata() else {
            continue;
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if meta.is_dir() {
            if TRANSIENT_DIRS.contains(&name.as_str()) {
                debug!("removing cache directory {}", path.display());
                report.absorb(remove_entry(&path)?);
            } else {
                purge_transient_in(&path, protected, should_stop, report)?;
            }
        } else if is_transient_file(&name) {
            debug!("removing {}", path.display());
            report.absorb(remove_entry(&path)?);
        }
    }
    Ok(())
}

/// Empty the log, data and credential directories, keeping the directories.
pub fn purge_durable(
    layout: &WorkspaceLayout,
    should_stop: impl Fn() -> bool,
) -> Result<PurgeReport, StoreError> {
    let mut report = PurgeReport::default();
    for dir in [
        layout.logs_dir(),
        layout.data_dir(),
        layout.credentials_dir(),
    ] {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} already absent", dir.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for path in paths {
            if should_stop() {
                return Err(StoreError::Interrupted(format!(
                    "emptying {}",
                    dir.display()
                )));
            }
            report.absorb(remove_entry(&path)?);
        }
        debug!("emptied {}", dir.display());
    }
    info!(
        "durable purge: {} files, {} dirs, {} bytes",
        report.files_removed, report.dirs_removed, report.bytes_removed
    );
    Ok(report)
}

fn trash_prefix(root: &Path) -> Option<String> {
    let name = root.file_name()?.to_string_lossy();
    Some(format!(".{name}.deleting-"))
}

/// Remove the whole workspace root.
///
/// The root is first renamed to a hidden sibling and only then deleted, so
/// an interruption leaves either the intact workspace or no workspace at all.
/// Returns `None` when there was nothing to remove.
pub fn discard_root(layout: &WorkspaceLayout) -> Result<Option<PurgeReport>, StoreError> {
    layout.validate()?;
    let root = std::path::absolute(layout.root())?;
    if root.symlink_metadata().is_err() {
        return Ok(None);
    }
    let (Some(parent), Some(prefix)) = (root.parent(), trash_prefix(&root)) else {
        return Err(StoreError::UnsafeRoot {
            path: root,
            reason: "it has no parent directory".to_owned(),
        });
    };

    let report = tally(&root);
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
    let trash = parent.join(format!("{prefix}{stamp}"));
    fs::rename(&root, &trash)?;
    crate::fsync_dir(parent)?;
    info!("workspace detached to {}", trash.display());

    fs::remove_dir_all(&trash)?;
    info!("removed {} ({} bytes)", root.display(), report.bytes_removed);
    Ok(Some(report))
}

/// Delete leftovers of interrupted `discard_root` calls. Failures are logged
/// and skipped. Returns the number of leftovers removed.
pub fn sweep_trash(layout: &WorkspaceLayout) -> Result<usize, StoreError> {
    let root = std::path::absolute(layout.root())?;
    let (Some(parent), Some(prefix)) = (root.parent(), trash_prefix(&root)) else {
        return Ok(0);
    };
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut swept = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                debug!("swept {}", entry.path().display());
                swept += 1;
            }
            Err(e) => warn!("failed to sweep {}: {e}", entry.path().display()),
        }
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn setup() -> (tempfile::TempDir, WorkspaceLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().join("ws"), dir.path().join("bk"));
        (dir, layout)
    }

    #[test]
    fn ensure_creates_skeleton_with_modes() {
        let (_dir, layout) = setup();
        let report = ensure(&layout).unwrap();
        assert!(report.created.contains(&layout.credentials_dir()));
        assert_eq!(mode_of(&layout.credentials_dir()).unwrap(), 0o700);
        assert_eq!(mode_of(&layout.logs_dir()).unwrap(), 0o755);
        assert_eq!(mode_of(&layout.data_dir()).unwrap(), 0o755);
        assert_eq!(mode_of(layout.backup_root()).unwrap(), 0o700);
        assert!(audit_permissions(&layout).is_empty());
    }

    #[test]
    fn ensure_is_idempotent() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        let second = ensure(&layout).unwrap();
        assert!(second.is_noop(), "{second:?}");
    }

    #[test]
    fn ensure_survives_unusable_backup_root() {
        let (_dir, layout) = setup();
        fs::write(layout.backup_root(), "not a directory").unwrap();
        let report = ensure(&layout).unwrap();
        assert!(report.backup_root_error.is_some());
        assert!(layout.data_dir().is_dir());
    }

    #[test]
    fn ensure_repairs_drifted_modes() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        fs::set_permissions(layout.credentials_dir(), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(layout.config_file(), "A=1\n").unwrap();
        fs::set_permissions(layout.config_file(), fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(audit_permissions(&layout).len(), 2);
        let report = ensure(&layout).unwrap();
        assert_eq!(report.permissions_fixed.len(), 2);
        assert_eq!(mode_of(&layout.credentials_dir()).unwrap(), 0o700);
        assert_eq!(mode_of(&layout.config_file()).unwrap(), 0o600);
    }

    #[test]
    fn write_secret_file_is_owner_only() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        write_secret_file(&layout.master_key_file(), "first").unwrap();
        write_secret_file(&layout.master_key_file(), "second").unwrap();
        assert_eq!(fs::read_to_string(layout.master_key_file()).unwrap(), "second");
        assert_eq!(mode_of(&layout.master_key_file()).unwrap(), 0o600);
        assert_eq!(fs::read_dir(layout.credentials_dir()).unwrap().count(), 1);
    }

    #[test]
    fn rotated_log_patterns() {
        assert!(is_rotated_log("weather_station.log.1"));
        assert!(is_rotated_log("weather_station.log.gz"));
        assert!(is_rotated_log("weather_station.log.3.gz"));
        assert!(!is_rotated_log("weather_station.log"));
        assert!(!is_rotated_log("weather_station.log.bak"));
        assert!(is_transient_file("module.pyc"));
        assert!(is_transient_file("upload.tmp"));
        assert!(!is_transient_file("weather.db"));
    }

    #[test]
    fn purge_transient_keeps_durable_state() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        let root = layout.root();
        fs::write(layout.config_file(), "SECRET_KEY=x\n").unwrap();
        fs::write(layout.master_key_file(), "key").unwrap();
        fs::write(layout.credentials_dir().join("scratch.tmp"), "keep").unwrap();
        fs::write(layout.data_dir().join("weather.db"), "db").unwrap();
        fs::write(layout.logs_dir().join("weather_station.log"), "live").unwrap();
        fs::write(layout.logs_dir().join("weather_station.log.1"), "old").unwrap();
        fs::create_dir_all(root.join("src/__pycache__")).unwrap();
        fs::write(root.join("src/__pycache__/app.cpython-311.pyc"), "bc").unwrap();
        fs::write(root.join("src/app.py"), "print()").unwrap();
        fs::write(root.join("upload.tmp"), "12345").unwrap();

        let report = purge_transient(&layout, || false).unwrap();
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.dirs_removed, 1);
        assert!(report.bytes_removed >= 10);

        assert!(layout.config_file().exists());
        assert!(layout.master_key_file().exists());
        assert!(layout.credentials_dir().join("scratch.tmp").exists());
        assert!(layout.data_dir().join("weather.db").exists());
        assert!(layout.logs_dir().join("weather_station.log").exists());
        assert!(root.join("src/app.py").exists());
        assert!(!root.join("src/__pycache__").exists());
        assert!(!root.join("upload.tmp").exists());
    }

    #[test]
    fn purge_transient_does_not_follow_symlinks() {
        let (dir, layout) = setup();
        ensure(&layout).unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("precious.tmp"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, layout.root().join("link")).unwrap();

        purge_transient(&layout, || false).unwrap();
        assert!(outside.join("precious.tmp").exists());
    }

    #[test]
    fn purge_durable_empties_but_keeps_skeleton() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        fs::write(layout.master_key_file(), "key").unwrap();
        fs::create_dir_all(layout.data_dir().join("nested")).unwrap();
        fs::write(layout.data_dir().join("nested/readings.csv"), "1,2").unwrap();
        fs::write(layout.logs_dir().join("weather_station.log"), "log").unwrap();
        fs::write(layout.config_file(), "A=1\n").unwrap();

        let report = purge_durable(&layout, || false).unwrap();
        assert_eq!(report.files_removed, 3);
        for dir in [layout.logs_dir(), layout.data_dir(), layout.credentials_dir()] {
            assert!(dir.is_dir());
            assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        }
        assert!(layout.config_file().exists());
    }

    #[test]
    fn purge_durable_stops_when_asked() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        fs::write(layout.logs_dir().join("a.log"), "a").unwrap();
        fs::write(layout.logs_dir().join("b.log"), "b").unwrap();

        let calls = Cell::new(0);
        let err = purge_durable(&layout, || {
            calls.set(calls.get() + 1);
            calls.get() > 1
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted(_)));
        assert!(!layout.logs_dir().join("a.log").exists());
        assert!(layout.logs_dir().join("b.log").exists());
    }

    #[test]
    fn purge_durable_tolerates_missing_dirs() {
        let (_dir, layout) = setup();
        let report = purge_durable(&layout, || false).unwrap();
        assert_eq!(report, PurgeReport::default());
    }

    #[test]
    fn discard_root_removes_everything_and_keeps_backups() {
        let (_dir, layout) = setup();
        ensure(&layout).unwrap();
        fs::write(layout.config_file(), "A=1\n").unwrap();
        fs::write(layout.backup_root().join("backup_x.tar.zst"), "z").unwrap();

        let report = discard_root(&layout).unwrap().unwrap();
        assert!(report.files_removed >= 1);
        assert!(!layout.root().exists());
        assert!(layout.backup_root().join("backup_x.tar.zst").exists());
        assert!(discard_root(&layout).unwrap().is_none());
    }

    #[test]
    fn sweep_trash_removes_leftovers_only() {
        let (dir, layout) = setup();
        let leftover = dir.path().join(".ws.deleting-20260101000000000");
        fs::create_dir_all(leftover.join("data")).unwrap();
        fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        assert_eq!(sweep_trash(&layout).unwrap(), 1);
        assert!(!leftover.exists());
        assert!(dir.path().join("unrelated").exists());
    }
}
