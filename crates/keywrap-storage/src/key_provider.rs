use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

const DATA_KEY_ID: &str = "items";

/// Data key used by the encrypted file backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the data key (OS keyring in production; memory in tests).
pub trait KeyProvider: Send + Sync {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// Keeps the data key base64-encoded in the OS keyring.
pub struct KeyringKeyProvider {
    service: String,
    account: String,
}

impl KeyringKeyProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl KeyProvider for KeyringKeyProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        match entry.get_password() {
            Ok(secret) => decode_key(&secret),
            Err(keyring::Error::NoEntry) => {
                let material = generate_key();
                debug!(service = %self.service, key_id = %material.id, "creating data key");
                entry
                    .set_password(&encode_key(&material))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(material)
            }
            // Only a missing entry may be replaced with a fresh key.
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_key();
        *guard = Some(material.clone());
        Ok(material)
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: DATA_KEY_ID.to_string(),
        bytes,
    }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| KeyError::Decode(format!("expected 32 bytes, got {}", b.len())))?;

    Ok(KeyMaterial {
        id: DATA_KEY_ID.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().unwrap();
        let second = provider.get_or_create().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = decode_key("abcd").expect_err("should reject wrong length");
        assert!(matches!(err, KeyError::Decode(_)));
    }

    #[test]
    fn encoded_key_decodes_back() {
        let material = generate_key();
        let decoded = decode_key(&encode_key(&material)).expect("decode");
        assert_eq!(decoded, material);
        assert_eq!(decoded.id, DATA_KEY_ID);
    }
}
