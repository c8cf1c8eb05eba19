use crate::envfile::ConfigStore;
use crate::keys::{SENSOR_SIMULATION, SENSOR_TYPE};
use crate::types::{PlatformProfile, SensorType};
use crate::SchemaError;
use tracing::debug;

/// Non-secret keys every fresh installation starts with.
pub const INSTALL_DEFAULTS: &[(&str, &str)] = &[
    ("DEBUG", "False"),
    ("LOCATION", "Unknown"),
    ("API_HOST", "0.0.0.0"),
    ("API_PORT", "8443"),
    ("RATE_LIMIT", "60"),
    ("SENSOR_PIN", "4"),
    ("READING_INTERVAL", "60"),
    ("SIMULATION_LOCATION", "utah"),
    ("SIMULATION_ANOMALIES", "false"),
    ("LOG_LEVEL", "INFO"),
    ("LOG_FILE", "logs/weather_station.log"),
    ("DB_PATH", "data/weather.db"),
    ("CREDENTIAL_DB", "data/credentials.db"),
    ("KEY_FILE", "keys/master.key"),
];

/// Instructor-chosen knobs for platform-conditioned defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultsPolicy {
    /// Sensor used on hardware-capable hosts when none is configured.
    pub hardware_sensor: SensorType,
}

impl Default for DefaultsPolicy {
    fn default() -> Self {
        Self {
            hardware_sensor: SensorType::Auto,
        }
    }
}

/// Fill in every install default the store does not already have.
/// Returns the number of keys added.
pub fn seed_install_defaults(store: &mut ConfigStore) -> Result<usize, SchemaError> {
    let mut added = 0;
    for (key, value) in INSTALL_DEFAULTS {
        if store.set_if_absent(key, value)? {
            added += 1;
        }
    }
    Ok(added)
}

/// Force `SENSOR_TYPE` and `SENSOR_SIMULATION` to values the platform can run.
///
/// Hardware-capable hosts keep an explicit, recognised sensor and otherwise
/// get the policy default. Every other host is unconditionally put in
/// simulation mode. Returns a note for each key that was changed.
pub fn apply_defaults(
    store: &mut ConfigStore,
    profile: &PlatformProfile,
    policy: DefaultsPolicy,
) -> Result<Vec<String>, SchemaError> {
    let configured = store.get(SENSOR_TYPE).map(str::parse::<SensorType>);

    let sensor = if profile.supports_hardware_interfaces() {
        match configured {
            Some(Ok(sensor)) => sensor,
            Some(Err(_)) | None => policy.hardware_sensor,
        }
    } else {
        SensorType::Simulated
    };
    let simulation = if sensor == SensorType::Simulated {
        "true"
    } else {
        "false"
    };

    let mut notes = Vec::new();
    if store.get(SENSOR_TYPE) != Some(sensor.as_str()) {
        let note = match store.get(SENSOR_TYPE) {
            Some(old) => format!("{SENSOR_TYPE} changed from '{old}' to {sensor} for this platform"),
            None => format!("{SENSOR_TYPE} set to {sensor}"),
        };
        debug!("{note}");
        notes.push(note);
        store.upsert(SENSOR_TYPE, sensor.as_str())?;
    }
    if store.get(SENSOR_SIMULATION) != Some(simulation) {
        let note = format!("{SENSOR_SIMULATION} set to {simulation}");
        debug!("{note}");
        notes.push(note);
        store.upsert(SENSOR_SIMULATION, simulation)?;
    }
    Ok(notes)
}
