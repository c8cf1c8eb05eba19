//! Keys the lifecycle tooling owns inside the application's `.env`.

pub const SECRET_KEY: &str = "SECRET_KEY";
pub const JWT_SECRET: &str = "JWT_SECRET";
pub const DEVICE_ID: &str = "DEVICE_ID";

pub const SENSOR_TYPE: &str = "SENSOR_TYPE";
pub const SENSOR_SIMULATION: &str = "SENSOR_SIMULATION";

pub const STUDENT_NAME: &str = "STUDENT_NAME";
pub const EXPERIENCE_LEVEL: &str = "EXPERIENCE_LEVEL";

/// Shape of the material a secret-bearing key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// URL-safe random token with the given number of random bytes.
    Token { bytes: usize },
    /// `weather-` followed by a short URL-safe token.
    DeviceId,
}

/// Every key regenerated by secret rotation. Anything not listed here is
/// left untouched by rotation.
pub const SECRET_KEYS: &[(&str, SecretKind)] = &[
    (SECRET_KEY, SecretKind::Token { bytes: 32 }),
    (JWT_SECRET, SecretKind::Token { bytes: 32 }),
    (DEVICE_ID, SecretKind::DeviceId),
];

pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|(k, _)| *k == key)
}

/// Redact a secret for display, keeping a short prefix for identification.
pub fn mask_secret(value: &str) -> String {
    if value.len() <= 8 {
        return "********".to_owned();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}…({} chars)", value.chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_keys_are_recognised() {
        assert!(is_secret_key("SECRET_KEY"));
        assert!(is_secret_key("JWT_SECRET"));
        assert!(is_secret_key("DEVICE_ID"));
        assert!(!is_secret_key("SENSOR_TYPE"));
    }

    #[test]
    fn production_tokens_have_full_strength() {
        for (key, kind) in SECRET_KEYS {
            if let SecretKind::Token { bytes } = kind {
                assert!(*bytes >= 32, "{key} must carry at least 32 random bytes");
            }
        }
    }

    #[test]
    fn mask_hides_short_values_entirely() {
        assert_eq!(mask_secret("abc"), "********");
    }

    #[test]
    fn mask_keeps_prefix_of_long_values() {
        let masked = mask_secret("abcdefghijklmnop");
        assert!(masked.starts_with("abcd"));
        assert!(!masked.contains("ijkl"));
        assert!(masked.contains("16 chars"));
    }
}
