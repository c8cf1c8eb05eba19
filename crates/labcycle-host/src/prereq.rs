use labcycle_schema::PlatformProfile;
use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Tools the weather-station application and its setup scripts rely on.
/// Returns an empty list when everything is present.
pub fn check_prereqs(profile: &PlatformProfile) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("python3") {
        missing.push(MissingPrereq {
            name: "python3",
            purpose: "running the weather-station application",
            install_hint: "apt install python3 python3-venv | dnf install python3",
        });
    }

    if !command_exists("openssl") {
        missing.push(MissingPrereq {
            name: "openssl",
            purpose: "generating TLS certificates for the API",
            install_hint: "apt install openssl | dnf install openssl",
        });
    }

    if profile.supports_hardware_interfaces() && !command_exists("i2cdetect") {
        missing.push(MissingPrereq {
            name: "i2c-tools",
            purpose: "probing I2C sensors (BME280, AHT20/BMP280)",
            install_hint: "apt install i2c-tools, then enable I2C in raspi-config",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThe lab application needs these tools once the workspace is installed.");
    msg
}
