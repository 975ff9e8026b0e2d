//! Concrete secure-storage backends: the OS keyring, and AES-GCM encrypted
//! files whose data key lives in the OS keyring (or a test double).

pub mod encrypted_file_storage;
pub mod key_provider;
pub mod keyring_storage;

pub use encrypted_file_storage::EncryptedFileStorage;
pub use key_provider::{InMemoryKeyProvider, KeyError, KeyMaterial, KeyProvider, KeyringKeyProvider};
pub use keyring_storage::KeyringStorage;
