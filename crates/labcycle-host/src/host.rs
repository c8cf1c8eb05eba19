use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Device-tree model markers, in lookup order.
const MODEL_PATHS: &[&str] = &["proc/device-tree/model", "sys/firmware/devicetree/base/model"];
const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// Raw facts about the host that platform classification depends on.
pub trait HostInfo {
    /// Board model string, if the host exposes one.
    fn device_model(&self) -> Option<String>;
    /// Contents of the os-release descriptor, if present.
    fn os_release(&self) -> Option<String>;
}

/// Reads host facts from the filesystem, relative to a system root.
#[derive(Debug, Clone)]
pub struct SystemHost {
    sysroot: PathBuf,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::with_sysroot("/")
    }

    /// Read host facts below `sysroot` instead of `/`.
    pub fn with_sysroot(sysroot: impl Into<PathBuf>) -> Self {
        Self {
            sysroot: sysroot.into(),
        }
    }

    fn read_first(&self, candidates: &[&str]) -> Option<String> {
        candidates.iter().find_map(|rel| {
            let path = self.sysroot.join(rel);
            let content = read_lossy(&path)?;
            trace!("read host marker {}", path.display());
            Some(content)
        })
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostInfo for SystemHost {
    fn device_model(&self) -> Option<String> {
        self.read_first(MODEL_PATHS)
            .map(|m| m.trim_end_matches('\0').trim().to_owned())
            .filter(|m| !m.is_empty())
    }

    fn os_release(&self) -> Option<String> {
        self.read_first(OS_RELEASE_PATHS)
    }
}

fn read_lossy(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_model_and_strips_nul() {
        let root = tempfile::tempdir().unwrap();
        let dt = root.path().join("proc/device-tree");
        fs::create_dir_all(&dt).unwrap();
        fs::write(dt.join("model"), b"Raspberry Pi 4 Model B Rev 1.4\0").unwrap();

        let host = SystemHost::with_sysroot(root.path());
        assert_eq!(
            host.device_model().as_deref(),
            Some("Raspberry Pi 4 Model B Rev 1.4")
        );
    }

    #[test]
    fn falls_back_to_sysfs_model() {
        let root = tempfile::tempdir().unwrap();
        let dt = root.path().join("sys/firmware/devicetree/base");
        fs::create_dir_all(&dt).unwrap();
        fs::write(dt.join("model"), b"Raspberry Pi 5 Model B\0").unwrap();

        let host = SystemHost::with_sysroot(root.path());
        assert!(host.device_model().unwrap().starts_with("Raspberry Pi 5"));
    }

    #[test]
    fn missing_markers_yield_none() {
        let root = tempfile::tempdir().unwrap();
        let host = SystemHost::with_sysroot(root.path());
        assert!(host.device_model().is_none());
        assert!(host.os_release().is_none());
    }

    #[test]
    fn empty_model_is_none() {
        let root = tempfile::tempdir().unwrap();
        let dt = root.path().join("proc/device-tree");
        fs::create_dir_all(&dt).unwrap();
        fs::write(dt.join("model"), b"\0").unwrap();
        assert!(SystemHost::with_sysroot(root.path()).device_model().is_none());
    }
}
