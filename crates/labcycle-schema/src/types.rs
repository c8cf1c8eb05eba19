//! Platform and sensor vocabulary shared by detection, defaults and the CLI.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    EmbeddedWithSensors,
    GenericSimulationOnly,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::EmbeddedWithSensors => write!(f, "embedded"),
            PlatformKind::GenericSimulationOnly => write!(f, "simulation-only"),
        }
    }
}

/// Immutable classification of the host, taken once per invocation.
///
/// Constructed only through [`embedded`](Self::embedded) and
/// [`simulation_only`](Self::simulation_only) so the kind and the hardware
/// capability can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformProfile {
    kind: PlatformKind,
    display_name: String,
    supports_hardware_interfaces: bool,
}

impl PlatformProfile {
    pub fn embedded(display_name: impl Into<String>) -> Self {
        Self {
            kind: PlatformKind::EmbeddedWithSensors,
            display_name: display_name.into(),
            supports_hardware_interfaces: true,
        }
    }

    pub fn simulation_only(display_name: impl Into<String>) -> Self {
        Self {
            kind: PlatformKind::GenericSimulationOnly,
            display_name: display_name.into(),
            supports_hardware_interfaces: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    #[inline]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[inline]
    pub fn supports_hardware_interfaces(&self) -> bool {
        self.supports_hardware_interfaces
    }
}

/// Sensor backends understood by the weather-station application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    /// Probe for hardware, fall back to simulation.
    #[serde(rename = "AUTO")]
    Auto,
    #[serde(rename = "BME280")]
    Bme280,
    #[serde(rename = "DHT22")]
    Dht22,
    #[serde(rename = "AHT20_BMP280")]
    Aht20Bmp280,
    #[serde(rename = "SIMULATED")]
    Simulated,
}

impl SensorType {
    pub const ALL: [SensorType; 5] = [
        SensorType::Auto,
        SensorType::Bme280,
        SensorType::Dht22,
        SensorType::Aht20Bmp280,
        SensorType::Simulated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Auto => "AUTO",
            SensorType::Bme280 => "BME280",
            SensorType::Dht22 => "DHT22",
            SensorType::Aht20Bmp280 => "AHT20_BMP280",
            SensorType::Simulated => "SIMULATED",
        }
    }

    /// Whether selecting this sensor needs GPIO/I2C access on the host.
    /// `AUTO` falls back to simulation when no sensor answers, so it does not.
    pub fn requires_hardware(self) -> bool {
        !matches!(self, SensorType::Simulated | SensorType::Auto)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        SensorType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| SchemaError::UnknownSensor(s.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    pub const ALL: [ExperienceLevel; 3] = [
        ExperienceLevel::Beginner,
        ExperienceLevel::Intermediate,
        ExperienceLevel::Advanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => "beginner",
            ExperienceLevel::Intermediate => "intermediate",
            ExperienceLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperienceLevel {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ExperienceLevel::ALL
            .into_iter()
            .find(|l| l.as_str() == lower)
            .ok_or_else(|| SchemaError::UnknownLevel(s.to_owned()))
    }
}

/// Student-supplied identity merged in by `personalize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Personalization {
    pub student_name: String,
    pub experience_level: ExperienceLevel,
    /// `None` keeps whatever sensor is already configured.
    pub sensor: Option<SensorType>,
}
