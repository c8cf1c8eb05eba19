//! Secret generation from the operating system's randomness source.

use crate::CoreError;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use labcycle_schema::{ConfigStore, SecretKind, SECRET_KEYS};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

/// Minimum random bytes behind any production-facing secret.
pub const MIN_SECRET_BYTES: usize = 32;

const DEVICE_ID_PREFIX: &str = "weather-";
const DEVICE_ID_BYTES: usize = 6;
const FERNET_KEY_BYTES: usize = 32;

/// Generates URL-safe secrets.
///
/// Every byte comes from the injected [`RngCore`] through `try_fill_bytes`;
/// when the source fails the error is returned as [`CoreError::Entropy`] and
/// nothing weaker is ever substituted.
pub struct SecretProvisioner {
    rng: Box<dyn RngCore>,
}

impl Default for SecretProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvisioner {
    pub fn new() -> Self {
        Self::with_rng(Box::new(OsRng))
    }

    pub fn with_rng(rng: Box<dyn RngCore>) -> Self {
        Self { rng }
    }

    fn random_bytes(&mut self, len: usize) -> Result<Vec<u8>, CoreError> {
        let mut buf = vec![0u8; len];
        self.rng
            .try_fill_bytes(&mut buf)
            .map_err(|e| CoreError::Entropy(e.to_string()))?;
        Ok(buf)
    }

    /// URL-safe, unpadded token carrying `byte_length` random bytes.
    pub fn generate_secret(&mut self, byte_length: usize) -> Result<String, CoreError> {
        let bytes = self.random_bytes(byte_length)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn device_id(&mut self) -> Result<String, CoreError> {
        Ok(format!(
            "{DEVICE_ID_PREFIX}{}",
            self.generate_secret(DEVICE_ID_BYTES)?
        ))
    }

    /// Fernet-compatible key: 32 random bytes, URL-safe base64 with padding.
    pub fn fernet_key(&mut self) -> Result<String, CoreError> {
        let bytes = self.random_bytes(FERNET_KEY_BYTES)?;
        Ok(URL_SAFE.encode(bytes))
    }

    pub fn generate_for(&mut self, kind: SecretKind) -> Result<String, CoreError> {
        match kind {
            SecretKind::Token { bytes } => self.generate_secret(bytes.max(MIN_SECRET_BYTES)),
            SecretKind::DeviceId => self.device_id(),
        }
    }

    /// Replace every secret-bearing key with a fresh value. All values are
    /// generated before the store is touched, so a failing randomness source
    /// leaves it unchanged. Returns the rotated keys.
    pub fn rotate_secrets(&mut self, store: &mut ConfigStore) -> Result<Vec<String>, CoreError> {
        let fresh = SECRET_KEYS
            .iter()
            .map(|(key, kind)| Ok((*key, self.generate_for(*kind)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        for (key, value) in &fresh {
            store.upsert(key, value)?;
        }
        debug!("rotated {} secrets", fresh.len());
        Ok(fresh.into_iter().map(|(k, _)| k.to_owned()).collect())
    }

    /// Generate only the secrets that are missing or empty. Returns the keys
    /// that were added.
    pub fn ensure_secrets(&mut self, store: &mut ConfigStore) -> Result<Vec<String>, CoreError> {
        let missing: Vec<_> = SECRET_KEYS
            .iter()
            .filter(|(key, _)| store.get(key).map_or(true, str::is_empty))
            .collect();
        let fresh = missing
            .iter()
            .map(|(key, kind)| Ok((*key, self.generate_for(*kind)?)))
            .collect::<Result<Vec<_>, CoreError>>()?;
        for (key, value) in &fresh {
            store.upsert(key, value)?;
        }
        Ok(fresh.into_iter().map(|(k, _)| k.to_owned()).collect())
    }
}
