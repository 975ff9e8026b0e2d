use std::{path::PathBuf, sync::Arc};

use crate::{cli::ScopeArgs, config::Config};
use color_eyre::Result;
use dirs::data_dir;
use keywrap_core::SecureStorage;
#[cfg(test)]
use keywrap_storage::InMemoryKeyProvider;
use keywrap_storage::{EncryptedFileStorage, KeyringKeyProvider, KeyringStorage};
use keywrap_wrapper::{Keychain, KeychainOptions, DEFAULT_SERVICE_NAME};
use tracing::debug;

/// Keyring service holding the data key of the encrypted file backend.
const DATA_KEY_SERVICE: &str = "keywrap-cli";
const DATA_KEY_ACCOUNT: &str = "data-key";

pub type DynStorage = Arc<dyn SecureStorage>;

/// Resolve the default item directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("keywrap").join("items"))
}

/// Build the configured backend.
pub fn storage_from_config(config: &Config) -> Result<DynStorage> {
    match config.backend {
        crate::config::Backend::Keyring => {
            debug!("using OS keyring backend");
            Ok(Arc::new(KeyringStorage::new()))
        }
        crate::config::Backend::File => {
            let root = match &config.data_dir {
                Some(root) => root.clone(),
                None => default_data_dir()?,
            };
            debug!(?root, "initializing encrypted file backend");
            Ok(Arc::new(EncryptedFileStorage::new(
                root,
                KeyringKeyProvider::new(DATA_KEY_SERVICE, DATA_KEY_ACCOUNT),
            )))
        }
    }
}

/// Keychain scope from config, with command-line flags taking precedence.
pub fn options_from(scope: &ScopeArgs, config: &Config) -> KeychainOptions {
    KeychainOptions {
        service_name: scope
            .service
            .clone()
            .or_else(|| config.service_name.clone())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
        access_group: scope
            .access_group
            .clone()
            .or_else(|| config.access_group.clone()),
        accessibility: config.accessibility.clone().unwrap_or_default(),
    }
}

pub fn keychain_from(scope: &ScopeArgs, config: &Config) -> Result<Keychain<DynStorage>> {
    Ok(Keychain::new(
        storage_from_config(config)?,
        options_from(scope, config),
    ))
}

/// Helper for tests: encrypted files under `root` with an in-memory data key.
#[cfg(test)]
pub fn test_storage(root: impl Into<PathBuf>) -> DynStorage {
    Arc::new(EncryptedFileStorage::new(root, InMemoryKeyProvider::default()))
}
