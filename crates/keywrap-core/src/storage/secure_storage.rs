use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::query::{ItemAttributes, ItemQuery};

/// Status of a failed secure-storage call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No stored item matches the query.
    #[error("no item matches the query")]
    NotFound,
    /// An item with the same identity already exists.
    #[error("an item with this identity already exists")]
    DuplicateItem,
    /// The backend refused access (locked keychain, denied prompt, ...).
    #[error("access denied: {reason}")]
    AuthFailed { reason: String },
    /// The query cannot be executed by this backend.
    #[error("invalid query: {reason}")]
    InvalidParameter { reason: String },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Backend { reason: String },
}

/// Result object of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMatch {
    pub attributes: ItemAttributes,
    /// Present only when the query asked for data and the item carries a payload.
    pub data: Option<Vec<u8>>,
    /// Present only when the query asked for a persistent reference.
    pub persistent_ref: Option<Vec<u8>>,
}

/// Contract of a platform secure-storage subsystem.
///
/// Calls are synchronous. Implementations must be safe to share across threads.
pub trait SecureStorage: Send + Sync {
    /// Find the first item matching `query`.
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, StorageError>;

    /// Every item matching `query`, in a stable order. An empty result is `Ok`.
    fn copy_all_matching(&self, query: &ItemQuery) -> Result<Vec<ItemMatch>, StorageError>;

    /// Store a new item. Fails with `DuplicateItem` if the identity is taken.
    fn add(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError>;

    /// Replace the payload of every item matching `query`.
    fn update(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError>;

    /// Remove every item matching `query`. Fails with `NotFound` if none did.
    fn delete(&self, query: &ItemQuery) -> Result<(), StorageError>;
}

impl<S: SecureStorage + ?Sized> SecureStorage for Arc<S> {
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, StorageError> {
        (**self).copy_matching(query)
    }

    fn copy_all_matching(&self, query: &ItemQuery) -> Result<Vec<ItemMatch>, StorageError> {
        (**self).copy_all_matching(query)
    }

    fn add(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        (**self).add(query, data)
    }

    fn update(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        (**self).update(query, data)
    }

    fn delete(&self, query: &ItemQuery) -> Result<(), StorageError> {
        (**self).delete(query)
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    attributes: ItemAttributes,
    payload: Option<Vec<u8>>,
}

/// In-memory storage for tests and smoke runs.
/// Payloads are masked, not encrypted; production code should use a keyring
/// or encrypted file backend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Vec<StoredItem>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an item that has attributes but no data payload.
    pub fn insert_without_payload(&self, query: &ItemQuery) -> Result<(), StorageError> {
        let attributes = required_attributes(query)?;
        let mut items = self.lock()?;
        if items
            .iter()
            .any(|item| item.attributes.identity() == attributes.identity())
        {
            return Err(StorageError::DuplicateItem);
        }
        items.push(StoredItem {
            attributes,
            payload: None,
        });
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<StoredItem>>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Backend {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl SecureStorage for InMemoryStorage {
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, StorageError> {
        let items = self.lock()?;
        items
            .iter()
            .find(|item| query.matches(&item.attributes))
            .map(|item| to_match(item, query))
            .ok_or(StorageError::NotFound)
    }

    fn copy_all_matching(&self, query: &ItemQuery) -> Result<Vec<ItemMatch>, StorageError> {
        let items = self.lock()?;
        Ok(items
            .iter()
            .filter(|item| query.matches(&item.attributes))
            .map(|item| to_match(item, query))
            .collect())
    }

    fn add(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let attributes = required_attributes(query)?;
        let mut items = self.lock()?;
        if items
            .iter()
            .any(|item| item.attributes.identity() == attributes.identity())
        {
            return Err(StorageError::DuplicateItem);
        }

        // XOR is a placeholder to avoid holding plaintext in tests.
        items.push(StoredItem {
            attributes,
            payload: Some(mask(data)),
        });
        Ok(())
    }

    fn update(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let mut items = self.lock()?;
        let mut updated = false;
        for item in items.iter_mut().filter(|item| query.matches(&item.attributes)) {
            item.payload = Some(mask(data));
            updated = true;
        }
        if updated {
            Ok(())
        } else {
            Err(StorageError::NotFound)
        }
    }

    fn delete(&self, query: &ItemQuery) -> Result<(), StorageError> {
        let mut items = self.lock()?;
        let before = items.len();
        items.retain(|item| !query.matches(&item.attributes));
        if items.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

fn to_match(item: &StoredItem, query: &ItemQuery) -> ItemMatch {
    ItemMatch {
        attributes: item.attributes.clone(),
        data: if query.return_data {
            item.payload.as_deref().map(unmask)
        } else {
            None
        },
        persistent_ref: query
            .return_persistent_ref
            .then(|| item.attributes.identity().into_bytes()),
    }
}

/// Attributes for a write, rejecting queries that cannot name a single item.
pub fn required_attributes(query: &ItemQuery) -> Result<ItemAttributes, StorageError> {
    query
        .attributes()
        .ok_or_else(|| StorageError::InvalidParameter {
            reason: "service and account are required".to_string(),
        })
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Vec<u8> {
    mask(input) // XOR twice restores original.
}
