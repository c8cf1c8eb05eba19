//! Timestamped zstd-compressed tar snapshots of a workspace.
//!
//! Archives live in the backup root, never inside the workspace, and are
//! named `backup_<owner>_<YYYYmmdd_HHMMSS>.tar.zst`. Subtrees that are
//! missing or unreadable are skipped and reported; an empty selection still
//! yields a valid archive.

use crate::layout::WorkspaceLayout;
use crate::workspace::{enforce_mode, BACKUP_ROOT_MODE};
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const ARCHIVE_PREFIX: &str = "backup_";
const ARCHIVE_SUFFIX: &str = ".tar.zst";
const ZSTD_LEVEL: i32 = 3;
const ARCHIVE_MODE: u32 = 0o600;
const MAX_COLLISION_SUFFIX: u32 = 99;

/// Who and when a backup belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupIdentity {
    owner: String,
    timestamp: DateTime<Utc>,
}

impl BackupIdentity {
    pub fn new(owner: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            owner: sanitize_owner(owner),
            timestamp,
        }
    }

    pub fn now(owner: &str) -> Self {
        Self::new(owner, Utc::now())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn archive_stem(&self) -> String {
        format!(
            "{ARCHIVE_PREFIX}{}_{}",
            self.owner,
            self.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    fn archive_name(&self, attempt: u32) -> String {
        if attempt == 0 {
            format!("{}{ARCHIVE_SUFFIX}", self.archive_stem())
        } else {
            format!("{}-{attempt}{ARCHIVE_SUFFIX}", self.archive_stem())
        }
    }
}

fn sanitize_owner(owner: &str) -> String {
    let cleaned: String = owner
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "student".to_owned()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupArchive {
    pub path: PathBuf,
    pub owner: String,
    pub timestamp: String,
    /// Workspace-relative subtrees present in the archive.
    pub included: Vec<String>,
    pub size_bytes: u64,
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSubtree {
    pub name: String,
    pub reason: String,
    /// `false` for optional subtrees whose absence is normal.
    pub expected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub archive: BackupArchive,
    pub skipped: Vec<SkippedSubtree>,
}

impl BackupOutcome {
    /// Skipped subtrees worth telling the operator about.
    pub fn warnings(&self) -> impl Iterator<Item = &SkippedSubtree> {
        self.skipped.iter().filter(|s| s.expected)
    }
}

/// An archive found in the backup root.
#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub owner: Option<String>,
    pub taken: Option<String>,
    pub size_bytes: u64,
}

/// Subtrees selected for backup, in archive order: (name, path, expected).
fn selection(layout: &WorkspaceLayout) -> [(&'static str, PathBuf, bool); 4] {
    [
        ("src", layout.src_dir(), false),
        ("logs", layout.logs_dir(), true),
        ("data", layout.data_dir(), true),
        (".env", layout.config_file(), true),
    ]
}

/// Recursively collect (archive path, full path) pairs, verifying every
/// regular file can be opened so the subtree is known readable up front.
fn collect_entries(
    archive_root: &str,
    full: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> io::Result<()> {
    let meta = full.symlink_metadata()?;
    out.push((archive_root.to_owned(), full.to_path_buf()));
    if meta.is_file() {
        fs::File::open(full)?;
    } else if meta.is_dir() {
        let mut children: Vec<PathBuf> = fs::read_dir(full)?
            .map(|e| e.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        children.sort();
        for child in children {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            collect_entries(&format!("{archive_root}/{name}"), &child, out)?;
        }
    }
    Ok(())
}

fn make_header(meta: &fs::Metadata, entry_type: tar::EntryType) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(u64::try_from(meta.mtime()).unwrap_or(0));
    header.set_uid(u64::from(meta.uid()));
    header.set_gid(u64::from(meta.gid()));
    header.set_mode(meta.permissions().mode());
    header
}

fn append_entry<W: Write>(
    ar: &mut tar::Builder<W>,
    rel_path: &str,
    full_path: &Path,
) -> io::Result<()> {
    let meta = full_path.symlink_metadata()?;
    let ft = meta.file_type();
    if ft.is_file() {
        let mut header = make_header(&meta, tar::EntryType::Regular);
        header.set_size(meta.len());
        header.set_cksum();
        let file = fs::File::open(full_path)?;
        ar.append_data(&mut header, rel_path, file)
    } else if ft.is_dir() {
        let mut header = make_header(&meta, tar::EntryType::Directory);
        header.set_size(0);
        header.set_cksum();
        ar.append_data(&mut header, format!("{rel_path}/"), io::empty())
    } else if ft.is_symlink() {
        let target = fs::read_link(full_path)?;
        let mut header = make_header(&meta, tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        ar.append_link(&mut header, rel_path, target)
    } else {
        warn!("skipping unsupported file type: {rel_path}");
        Ok(())
    }
}

/// Passes bytes through while hashing and counting them.
struct DigestWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    fn into_parts(self) -> (W, String, u64) {
        (self.inner, self.hasher.finalize().to_hex().to_string(), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn backup_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backup(format!("{context}: {e}"))
}

/// Write a compressed snapshot of the selected subtrees into the backup root.
pub fn snapshot(
    layout: &WorkspaceLayout,
    identity: &BackupIdentity,
) -> Result<BackupOutcome, StoreError> {
    let backup_root = layout.backup_root();
    if !backup_root.is_dir() {
        fs::create_dir_all(backup_root)
            .map_err(|e| backup_err(&format!("creating {}", backup_root.display()), e))?;
        enforce_mode(backup_root, BACKUP_ROOT_MODE)?;
    }

    let mut entries = Vec::new();
    let mut included = Vec::new();
    let mut skipped = Vec::new();
    for (name, path, expected) in selection(layout) {
        let mut subtree = Vec::new();
        match collect_entries(name, &path, &mut subtree) {
            Ok(()) => {
                debug!("backing up {name}: {} entries", subtree.len());
                entries.extend(subtree);
                included.push(name.to_owned());
            }
            Err(e) => {
                let reason = if e.kind() == io::ErrorKind::NotFound {
                    "missing".to_owned()
                } else {
                    format!("unreadable: {e}")
                };
                if expected {
                    warn!("backup skips {name}: {reason}");
                } else {
                    debug!("backup skips optional {name}: {reason}");
                }
                skipped.push(SkippedSubtree {
                    name: name.to_owned(),
                    reason,
                    expected,
                });
            }
        }
    }

    let tmp = NamedTempFile::new_in(backup_root)
        .map_err(|e| backup_err("creating temporary archive", e))?;
    let encoder = zstd::Encoder::new(DigestWriter::new(tmp), ZSTD_LEVEL)
        .map_err(|e| backup_err("starting compression", e))?;
    let mut ar = tar::Builder::new(encoder);
    ar.follow_symlinks(false);
    for (rel_path, full_path) in &entries {
        append_entry(&mut ar, rel_path, full_path)
            .map_err(|e| backup_err(&format!("archiving {rel_path}"), e))?;
    }
    let encoder = ar
        .into_inner()
        .map_err(|e| backup_err("finishing tar stream", e))?;
    let digest_writer = encoder
        .finish()
        .map_err(|e| backup_err("finishing compression", e))?;
    let (tmp, blake3, size_bytes) = digest_writer.into_parts();
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(ARCHIVE_MODE))?;

    let path = persist_unique(tmp, backup_root, identity)?;
    crate::fsync_dir(backup_root)?;
    info!("backup written: {} ({size_bytes} bytes)", path.display());

    Ok(BackupOutcome {
        archive: BackupArchive {
            path,
            owner: identity.owner.clone(),
            timestamp: identity.timestamp.to_rfc3339(),
            included,
            size_bytes,
            blake3,
        },
        skipped,
    })
}

/// Rename the finished archive into place without clobbering an archive
/// taken in the same second.
fn persist_unique(
    mut tmp: NamedTempFile,
    backup_root: &Path,
    identity: &BackupIdentity,
) -> Result<PathBuf, StoreError> {
    for attempt in 0..=MAX_COLLISION_SUFFIX {
        let candidate = backup_root.join(identity.archive_name(attempt));
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(backup_err("renaming archive into place", e.error)),
        }
    }
    Err(StoreError::Backup(format!(
        "more than {MAX_COLLISION_SUFFIX} archives named {}",
        identity.archive_stem()
    )))
}

/// Split `backup_<owner>_<date>_<time>[-N].tar.zst` into owner and timestamp.
fn parse_archive_name(name: &str) -> Option<(String, String)> {
    let stem = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    let mut parts = stem.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let owner = parts.next()?;
    let time = time.split('-').next()?;
    let taken = chrono::NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S")
        .ok()?
        .and_utc()
        .to_rfc3339();
    Some((owner.to_owned(), taken))
}

/// Archives in the backup root, oldest name first.
pub fn list_backups(backup_root: &Path) -> Result<Vec<BackupEntry>, StoreError> {
    let entries = match fs::read_dir(backup_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut result = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(ARCHIVE_PREFIX) || !name.ends_with(ARCHIVE_SUFFIX) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let parsed = parse_archive_name(&name);
        result.push(BackupEntry {
            path: entry.path(),
            owner: parsed.as_ref().map(|(o, _)| o.clone()),
            taken: parsed.map(|(_, t)| t),
            size_bytes: meta.len(),
        });
    }
    result.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (tempfile::TempDir, WorkspaceLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().join("ws"), dir.path().join("bk"));
        crate::ensure(&layout).unwrap();
        (dir, layout)
    }

    fn identity() -> BackupIdentity {
        BackupIdentity::new("alice", Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap())
    }

    fn archive_paths(path: &Path) -> Vec<String> {
        let file = fs::File::open(path).unwrap();
        let decoder = zstd::Decoder::new(file).unwrap();
        let mut ar = tar::Archive::new(decoder);
        ar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn archive_name_format() {
        let id = identity();
        assert_eq!(id.archive_stem(), "backup_alice_20260314_092653");
        assert_eq!(id.archive_name(2), "backup_alice_20260314_092653-2.tar.zst");
    }

    #[test]
    fn owner_is_sanitized() {
        assert_eq!(sanitize_owner("Ada Lovelace/../x"), "Ada_Lovelace____x");
        assert_eq!(sanitize_owner("   "), "student");
    }

    #[test]
    fn snapshot_includes_selected_subtrees() {
        let (_dir, layout) = setup();
        fs::create_dir_all(layout.src_dir()).unwrap();
        fs::write(layout.src_dir().join("app.py"), "print('hi')").unwrap();
        fs::write(layout.logs_dir().join("weather_station.log"), "log").unwrap();
        fs::write(layout.data_dir().join("weather.db"), "db").unwrap();
        fs::write(layout.config_file(), "A=1\n").unwrap();
        fs::write(layout.master_key_file(), "secret").unwrap();

        let outcome = snapshot(&layout, &identity()).unwrap();
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.archive.included, ["src", "logs", "data", ".env"]);
        assert_eq!(outcome.archive.blake3.len(), 64);
        assert_eq!(
            outcome.archive.size_bytes,
            fs::metadata(&outcome.archive.path).unwrap().len()
        );
        let mode = fs::metadata(&outcome.archive.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let paths = archive_paths(&outcome.archive.path);
        assert!(paths.contains(&"src/app.py".to_owned()));
        assert!(paths.contains(&"data/weather.db".to_owned()));
        assert!(paths.contains(&".env".to_owned()));
        assert!(!paths.iter().any(|p| p.contains("master.key")));
    }

    #[test]
    fn missing_subtree_is_skipped_with_one_warning() {
        let (_dir, layout) = setup();
        fs::write(layout.config_file(), "A=1\n").unwrap();
        fs::remove_dir_all(layout.data_dir()).unwrap();

        let outcome = snapshot(&layout, &identity()).unwrap();
        let warnings: Vec<_> = outcome.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].name, "data");
        assert!(outcome.archive.path.exists());
    }

    #[test]
    fn empty_selection_still_produces_archive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path().join("ws"), dir.path().join("bk"));
        let outcome = snapshot(&layout, &identity()).unwrap();
        assert!(outcome.archive.included.is_empty());
        assert!(archive_paths(&outcome.archive.path).is_empty());
    }

    #[test]
    fn same_second_backups_do_not_clobber() {
        let (_dir, layout) = setup();
        let first = snapshot(&layout, &identity()).unwrap();
        let second = snapshot(&layout, &identity()).unwrap();
        assert_ne!(first.archive.path, second.archive.path);
        assert!(second
            .archive
            .path
            .to_string_lossy()
            .ends_with("-1.tar.zst"));
        assert_eq!(list_backups(layout.backup_root()).unwrap().len(), 2);
    }

    #[test]
    fn list_backups_parses_names() {
        let (_dir, layout) = setup();
        snapshot(&layout, &BackupIdentity::new("bob_smith", identity().timestamp)).unwrap();
        fs::write(layout.backup_root().join("notes.txt"), "x").unwrap();

        let listed = list_backups(layout.backup_root()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner.as_deref(), Some("bob_smith"));
        assert_eq!(listed[0].taken.as_deref(), Some("2026-03-14T09:26:53+00:00"));
    }

    #[test]
    fn list_backups_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&dir.path().join("nope")).unwrap().is_empty());
    }
}
