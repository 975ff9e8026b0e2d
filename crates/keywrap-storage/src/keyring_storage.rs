use keywrap_core::{
    storage::{required_attributes, ItemMatch, SecureStorage, StorageError},
    ItemQuery,
};
use tracing::instrument;

/// OS keyring backend (macOS Keychain, Windows Credential Manager, Secret Service).
///
/// Each query is turned into a `keyring::Entry` keyed by service and account;
/// the access group, when set, becomes the entry target. The keyring keeps no
/// accessibility level, sync flag or generic attribute, and hands out no
/// persistent references, so matches echo the query's attributes and
/// `persistent_ref` is always `None`. Entries cannot be enumerated either:
/// `copy_all_matching` only answers queries that name a single account.
#[derive(Debug, Default, Clone)]
pub struct KeyringStorage;

impl KeyringStorage {
    pub fn new() -> Self {
        Self
    }

    fn entry_for(&self, query: &ItemQuery) -> Result<keyring::Entry, StorageError> {
        let attrs = required_attributes(query)?;
        let entry = match attrs.access_group.as_deref() {
            Some(group) => keyring::Entry::new_with_target(group, &attrs.service, &attrs.account),
            None => keyring::Entry::new(&attrs.service, &attrs.account),
        };
        entry.map_err(map_keyring_error)
    }
}

impl SecureStorage for KeyringStorage {
    #[instrument(skip_all, fields(account = ?query.account))]
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, StorageError> {
        let entry = self.entry_for(query)?;
        let secret = entry.get_secret().map_err(map_keyring_error)?;
        let attributes = required_attributes(query)?;

        Ok(ItemMatch {
            attributes,
            data: query.return_data.then_some(secret),
            persistent_ref: None,
        })
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn copy_all_matching(&self, query: &ItemQuery) -> Result<Vec<ItemMatch>, StorageError> {
        if query.service.is_none() || query.account.is_none() {
            return Err(StorageError::InvalidParameter {
                reason: "the OS keyring cannot enumerate entries".to_string(),
            });
        }
        match self.copy_matching(query) {
            Ok(found) => Ok(vec![found]),
            Err(StorageError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn add(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let entry = self.entry_for(query)?;
        match entry.get_secret() {
            Ok(_) => return Err(StorageError::DuplicateItem),
            Err(keyring::Error::NoEntry) => {}
            Err(err) => return Err(map_keyring_error(err)),
        }
        entry.set_secret(data).map_err(map_keyring_error)
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn update(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let entry = self.entry_for(query)?;
        entry.get_secret().map_err(map_keyring_error)?;
        entry.set_secret(data).map_err(map_keyring_error)
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn delete(&self, query: &ItemQuery) -> Result<(), StorageError> {
        self.entry_for(query)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

fn map_keyring_error(err: keyring::Error) -> StorageError {
    match err {
        keyring::Error::NoEntry => StorageError::NotFound,
        keyring::Error::NoStorageAccess(inner) => StorageError::AuthFailed {
            reason: inner.to_string(),
        },
        err @ (keyring::Error::Invalid(..)
        | keyring::Error::TooLong(..)
        | keyring::Error::BadEncoding(_)) => StorageError::InvalidParameter {
            reason: err.to_string(),
        },
        other => StorageError::Backend {
            reason: other.to_string(),
        },
    }
}
