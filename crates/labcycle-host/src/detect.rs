use crate::host::{HostInfo, SystemHost};
use labcycle_schema::PlatformProfile;
use tracing::debug;

const EMBEDDED_MARKER: &str = "Raspberry Pi";
const GENERIC_NAME: &str = "generic host";

/// Produces the platform profile for one invocation.
pub trait Detector {
    fn detect(&self) -> PlatformProfile;
}

/// Classifies the host from the facts a [`HostInfo`] exposes.
#[derive(Debug, Clone, Default)]
pub struct HostDetector<H = SystemHost> {
    host: H,
}

impl<H: HostInfo> HostDetector<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }
}

impl<H: HostInfo> Detector for HostDetector<H> {
    fn detect(&self) -> PlatformProfile {
        let model = self.host.device_model();
        let os_release = self.host.os_release();
        let profile = classify(model.as_deref(), os_release.as_deref());
        debug!(
            "platform: {} ({})",
            profile.kind(),
            profile.display_name()
        );
        profile
    }
}

/// Always returns the same profile. Used for `--platform` overrides and tests.
#[derive(Debug, Clone)]
pub struct FixedDetector(pub PlatformProfile);

impl Detector for FixedDetector {
    fn detect(&self) -> PlatformProfile {
        self.0.clone()
    }
}

/// Pure classification. Only a device model naming a Raspberry Pi counts as
/// hardware-capable; anything else, including a Raspberry Pi OS image running
/// on unknown hardware, is simulation-only.
pub fn classify(model: Option<&str>, os_release: Option<&str>) -> PlatformProfile {
    if let Some(model) = model {
        if model.contains(EMBEDDED_MARKER) {
            return PlatformProfile::embedded(model);
        }
    }
    let name = os_release
        .and_then(pretty_name)
        .or_else(|| model.map(str::to_owned))
        .unwrap_or_else(|| GENERIC_NAME.to_owned());
    PlatformProfile::simulation_only(name)
}

fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.trim().strip_prefix("PRETTY_NAME=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'').trim();
        (!value.is_empty()).then(|| value.to_owned())
    })
}
