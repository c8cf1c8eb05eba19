use labcycle_schema::{DefaultsPolicy, SensorType};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_ROOT: &str = "~/weather-station";
const DEFAULT_BACKUP_ROOT: &str = "~/weather-station-backups";
const DEFAULT_OWNER: &str = "student";

/// Contents of `~/.config/labcycle/config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    pub root: Option<String>,
    pub backup_root: Option<String>,
    /// Sensor written on hardware-capable hosts when none is configured.
    pub hardware_sensor: Option<String>,
    /// Identity used in backup archive names.
    pub owner: Option<String>,
}

impl ToolConfig {
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("failed to parse tool config: {e}"))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read tool config {}: {e}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `explicit` if given; otherwise the default location, which may
    /// be absent.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, String> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/labcycle/config.toml"))
}

/// Effective settings after applying command-line overrides to the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub backup_root: PathBuf,
    pub policy: DefaultsPolicy,
    pub owner: String,
}

impl Settings {
    pub fn resolve(
        file: ToolConfig,
        root: Option<&str>,
        backup_root: Option<&str>,
    ) -> Result<Self, String> {
        let root = root
            .map(str::to_owned)
            .or(file.root)
            .unwrap_or_else(|| DEFAULT_ROOT.to_owned());
        let backup_root = backup_root
            .map(str::to_owned)
            .or(file.backup_root)
            .unwrap_or_else(|| DEFAULT_BACKUP_ROOT.to_owned());
        let hardware_sensor = match file.hardware_sensor {
            Some(raw) => raw
                .parse::<SensorType>()
                .map_err(|e| format!("validation error: hardware_sensor: {e}"))?,
            None => SensorType::Auto,
        };
        let owner = file
            .owner
            .or_else(|| std::env::var("USER").ok())
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OWNER.to_owned());

        Ok(Self {
            root: expand_tilde(&root),
            backup_root: expand_tilde(&backup_root),
            policy: DefaultsPolicy { hardware_sensor },
            owner,
        })
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let cfg = ToolConfig::parse(
            r#"
root = "/srv/lab/ws"
backup_root = "/srv/lab/backups"
hardware_sensor = "bme280"
owner = "lab3"
"#,
        )
        .unwrap();
        let settings = Settings::resolve(cfg, None, None).unwrap();
        assert_eq!(settings.root, PathBuf::from("/srv/lab/ws"));
        assert_eq!(settings.backup_root, PathBuf::from("/srv/lab/backups"));
        assert_eq!(settings.policy.hardware_sensor, SensorType::Bme280);
        assert_eq!(settings.owner, "lab3");
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = ToolConfig::parse("root = \"/x\"\nremote = \"y\"\n").unwrap_err();
        assert!(err.contains("remote"));
    }

    #[test]
    fn flags_override_file() {
        let cfg = ToolConfig::parse("root = \"/from/file\"\n").unwrap();
        let settings = Settings::resolve(cfg, Some("/from/flag"), Some("/bk")).unwrap();
        assert_eq!(settings.root, PathBuf::from("/from/flag"));
        assert_eq!(settings.backup_root, PathBuf::from("/bk"));
    }

    #[test]
    fn bad_sensor_is_a_validation_error() {
        let cfg = ToolConfig::parse("hardware_sensor = \"LM35\"\n").unwrap();
        let err = Settings::resolve(cfg, None, None).unwrap_err();
        assert!(err.starts_with("validation error:"));
    }

    #[test]
    fn explicit_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ToolConfig::discover(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
