use crate::SchemaError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// One physical line of an env file.
///
/// Comments, blank lines and lines that do not parse are kept verbatim so a
/// rewrite does not destroy hand edits.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Blank,
    Comment(String),
    Entry {
        key: String,
        value: String,
        comment: Option<String>,
    },
    Unparsed(String),
}

/// The key-value configuration backing the weather-station application.
///
/// Parsing is tolerant: blank lines and `#` comments are skipped, inline
/// comments are stripped, surrounding whitespace is trimmed, an optional
/// `export ` prefix is accepted, and lines without `=` are ignored. No quoting
/// syntax is interpreted. Keys are unique; a key repeated on disk keeps its
/// first position and takes its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    lines: Vec<Line>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut store = Self::new();
        for (lineno, raw) in content.lines().enumerate() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                store.lines.push(Line::Blank);
                continue;
            }
            if trimmed.starts_with('#') {
                store.lines.push(Line::Comment(trimmed.to_owned()));
                continue;
            }

            let (data, comment) = match trimmed.split_once('#') {
                Some((data, comment)) => (data, Some(comment.to_owned())),
                None => (trimmed, None),
            };
            let data = data.trim();
            let data = data.strip_prefix("export ").unwrap_or(data);

            let Some((key, value)) = data.split_once('=') else {
                debug!("env line {}: no '=' found, keeping verbatim", lineno + 1);
                store.lines.push(Line::Unparsed(raw.to_owned()));
                continue;
            };
            let key = key.trim();
            if validate_key(key).is_err() {
                debug!("env line {}: invalid key '{key}', keeping verbatim", lineno + 1);
                store.lines.push(Line::Unparsed(raw.to_owned()));
                continue;
            }
            let value = value.trim().to_owned();

            if let Some(existing) = store.entry_mut(key) {
                debug!("env line {}: duplicate key '{key}', last value wins", lineno + 1);
                *existing = value;
                continue;
            }
            store.lines.push(Line::Entry {
                key: key.to_owned(),
                value,
                comment,
            });
        }
        store
    }

    /// Load a configuration file. A missing file is an empty store; bytes
    /// that are not UTF-8 are replaced rather than rejected.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no configuration at {}, starting empty", path.display());
                Ok(Self::new())
            }
            Err(e) => Err(SchemaError::Io(e)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut String> {
        self.lines.iter_mut().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value),
            _ => None,
        })
    }

    /// Set `key` to `value`, replacing in place if present and appending
    /// otherwise. An inline comment is dropped when the value changes.
    pub fn upsert(&mut self, key: &str, value: &str) -> Result<(), SchemaError> {
        validate_key(key)?;
        validate_value(key, value)?;

        for line in &mut self.lines {
            if let Line::Entry {
                key: k,
                value: v,
                comment,
            } = line
            {
                if k == key {
                    if v != value {
                        value.clone_into(v);
                        *comment = None;
                    }
                    return Ok(());
                }
            }
        }
        self.lines.push(Line::Entry {
            key: key.to_owned(),
            value: value.to_owned(),
            comment: None,
        });
        Ok(())
    }

    /// Set `key` only if it is absent. Returns whether a value was written.
    pub fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool, SchemaError> {
        if self.contains_key(key) {
            return Ok(false);
        }
        self.upsert(key, value)?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self
            .lines
            .iter()
            .position(|line| matches!(line, Line::Entry { key: k, .. } if k == key))?;
        match self.lines.remove(idx) {
            Line::Entry { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn push_comment(&mut self, text: &str) {
        let text = text.trim();
        if text.starts_with('#') {
            self.lines.push(Line::Comment(text.to_owned()));
        } else {
            self.lines.push(Line::Comment(format!("# {text}")));
        }
    }

    pub fn push_blank(&mut self) {
        self.lines.push(Line::Blank);
    }

    /// Keys in on-disk order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The structured key-value view handed to collaborators instead of
    /// mutating the process environment.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, value, .. } => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Blank => {}
                Line::Comment(text) | Line::Unparsed(text) => out.push_str(text),
                Line::Entry {
                    key,
                    value,
                    comment: Some(comment),
                } => {
                    out.push_str(&format!("{key}={value} #{comment}"));
                }
                Line::Entry {
                    key,
                    value,
                    comment: None,
                } => {
                    out.push_str(&format!("{key}={value}"));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Write atomically: temp file in the same directory, fsync, rename,
    /// fsync the directory. The file is owner read/write only.
    pub fn save(&self, path: &Path) -> Result<(), SchemaError> {
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SchemaError::Io(e.error))?;

        let d = fs::File::open(&dir)?;
        d.sync_all()?;
        debug!("wrote {} keys to {}", self.len(), path.display());
        Ok(())
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), SchemaError> {
    let mut bytes = key.bytes();
    let valid = match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() || first == b'_' => {
            bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidKey(key.to_owned()))
    }
}

fn validate_value(key: &str, value: &str) -> Result<(), SchemaError> {
    let reason = if value.contains('\n') || value.contains('\r') {
        "must be a single line"
    } else if value.contains('#') {
        "must not contain '#' (it starts a comment)"
    } else if value.trim() != value {
        "must not have leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(SchemaError::InvalidValue {
        key: key.to_owned(),
        reason: reason.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_strips_inline() {
        let store =
            ConfigStore::parse("SENSOR_TYPE=BME280   # hardware sensor\n\n# comment line\nDEBUG=True");
        let map = store.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["SENSOR_TYPE"], "BME280");
        assert_eq!(map["DEBUG"], "True");
    }

    #[test]
    fn parse_trims_whitespace_and_export_prefix() {
        let store = ConfigStore::parse("  export API_PORT = 8443  \n\tLOCATION=Lab 3\t");
        assert_eq!(store.get("API_PORT"), Some("8443"));
        assert_eq!(store.get("LOCATION"), Some("Lab 3"));
    }

    #[test]
    fn parse_ignores_malformed_lines() {
        let store = ConfigStore::parse("garbage line\n=novalue\n1KEY=x\nGOOD=yes\n");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("GOOD"), Some("yes"));
    }

    #[test]
    fn parse_does_not_interpret_quotes() {
        let store = ConfigStore::parse("NAME=\"quoted\"\n");
        assert_eq!(store.get("NAME"), Some("\"quoted\""));
    }

    #[test]
    fn parse_duplicate_key_last_value_wins() {
        let store = ConfigStore::parse("A=1\nB=2\nA=3\n");
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(store.get("A"), Some("3"));
    }

    #[test]
    fn empty_value_is_kept() {
        let store = ConfigStore::parse("ENCRYPTION_KEY=\n");
        assert_eq!(store.get("ENCRYPTION_KEY"), Some(""));
    }

    #[test]
    fn upsert_preserves_position_and_appends() {
        let mut store = ConfigStore::parse("A=1\nB=2\nC=3\n");
        store.upsert("B", "20").unwrap();
        store.upsert("D", "4").unwrap();
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
        assert_eq!(store.get("B"), Some("20"));
    }

    #[test]
    fn upsert_rejects_comment_character() {
        let mut store = ConfigStore::new();
        let err = store.upsert("STUDENT_NAME", "Ana #1").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValue { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn upsert_rejects_bad_key() {
        let mut store = ConfigStore::new();
        assert!(matches!(
            store.upsert("BAD-KEY", "x"),
            Err(SchemaError::InvalidKey(_))
        ));
    }

    #[test]
    fn upsert_drops_stale_inline_comment() {
        let mut store = ConfigStore::parse("SENSOR_TYPE=BME280 # hardware sensor\n");
        store.upsert("SENSOR_TYPE", "SIMULATED").unwrap();
        assert_eq!(store.render(), "SENSOR_TYPE=SIMULATED\n");
    }

    #[test]
    fn set_if_absent_keeps_existing() {
        let mut store = ConfigStore::parse("DEBUG=True\n");
        assert!(!store.set_if_absent("DEBUG", "False").unwrap());
        assert!(store.set_if_absent("API_PORT", "8443").unwrap());
        assert_eq!(store.get("DEBUG"), Some("True"));
    }

    #[test]
    fn remove_returns_value() {
        let mut store = ConfigStore::parse("A=1\nB=2\n");
        assert_eq!(store.remove("A"), Some("1".to_owned()));
        assert_eq!(store.remove("A"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn render_keeps_comments_and_unparsed_lines() {
        let src = "# header\n\nA=1 # why\nnot a pair\n";
        let store = ConfigStore::parse(src);
        assert_eq!(store.render(), "# header\n\nA=1 # why\nnot a pair\n");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(&dir.path().join(".env")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn save_then_load_preserves_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut store = ConfigStore::new();
        store.push_comment("managed by labcycle");
        store.upsert("SECRET_KEY", "abc-DEF_123").unwrap();
        store.upsert("LOCATION", "Room 101").unwrap();
        store.upsert("EMPTY", "").unwrap();
        store.save(&path).unwrap();

        let loaded = ConfigStore::load(&path).unwrap();
        assert_eq!(loaded.to_map(), store.to_map());
        assert_eq!(loaded.keys().collect::<Vec<_>>(), store.keys().collect::<Vec<_>>());
    }

    #[test]
    fn save_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        ConfigStore::parse("A=1").save(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn save_replaces_without_leftover_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        ConfigStore::parse("A=1").save(&path).unwrap();
        ConfigStore::parse("A=2").save(&path).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(ConfigStore::load(&path).unwrap().get("A"), Some("2"));
    }

    #[test]
    fn load_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, b"SECRET_KEY=abc\nLOCATION=Jos\xe9 lab\nDEBUG=False\n").unwrap();
        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.get("SECRET_KEY"), Some("abc"));
        assert_eq!(store.get("DEBUG"), Some("False"));
        assert!(store.get("LOCATION").unwrap().starts_with("Jos"));
    }
}
