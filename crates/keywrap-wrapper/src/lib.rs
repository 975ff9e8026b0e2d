//! Key/value facade over a `SecureStorage` backend, scoped to one service
//! name and optional access group.

use std::{collections::BTreeSet, sync::Arc};

use keywrap_core::{
    fetch_data, fetch_persistent_ref, Accessibility, ItemClass, ItemQuery, SecureStorage,
    StorageError,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// Service name used when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "keywrap";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode value: {reason}")]
    Encode { reason: String },
}

/// Scope applied to every key a `Keychain` touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeychainOptions {
    pub service_name: String,
    /// Shared access group; `None` keeps items private to this service.
    pub access_group: Option<String>,
    /// Accessibility given to newly written items.
    pub accessibility: Accessibility,
}

impl Default for KeychainOptions {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            access_group: None,
            accessibility: Accessibility::default(),
        }
    }
}

/// Typed accessor for secrets stored as generic passwords.
pub struct Keychain<S: SecureStorage> {
    storage: Arc<S>,
    options: KeychainOptions,
}

impl<S: SecureStorage> Clone for Keychain<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            options: self.options.clone(),
        }
    }
}

impl<S: SecureStorage> Keychain<S> {
    pub fn new(storage: S, options: KeychainOptions) -> Self {
        Self {
            storage: Arc::new(storage),
            options,
        }
    }

    /// Keychain with the default service name and no access group.
    pub fn standard(storage: S) -> Self {
        Self::new(storage, KeychainOptions::default())
    }

    pub fn options(&self) -> &KeychainOptions {
        &self.options
    }

    /// Identity query for `key`: the key name is both the account and the generic attribute.
    fn query(&self, key: &str) -> ItemQuery {
        let query = ItemQuery::generic_password()
            .service(self.options.service_name.as_str())
            .account(key)
            .generic(key.as_bytes().to_vec());
        match &self.options.access_group {
            Some(group) => query.access_group(group.as_str()),
            None => query,
        }
    }

    /// Every item of this keychain's service (and access group, when set).
    fn scope_query(&self) -> ItemQuery {
        let query = ItemQuery::generic_password().service(self.options.service_name.as_str());
        match &self.options.access_group {
            Some(group) => query.access_group(group.as_str()),
            None => query,
        }
    }

    // Getters

    /// Raw bytes stored under `key`, or `None` if absent or unreadable.
    pub fn data(&self, key: &str) -> Option<Vec<u8>> {
        fetch_data(self.storage.as_ref(), &self.query(key).return_data(true))
    }

    /// Like [`Keychain::data`], but only sees items with the given accessibility and sync flag.
    pub fn data_with(
        &self,
        key: &str,
        accessible: Option<Accessibility>,
        synchronizable: Option<bool>,
    ) -> Option<Vec<u8>> {
        let mut query = self.query(key).return_data(true);
        query.accessible = accessible;
        query.synchronizable = synchronizable;
        fetch_data(self.storage.as_ref(), &query)
    }

    /// UTF-8 string under `key`; `None` if absent or not valid UTF-8.
    pub fn string(&self, key: &str) -> Option<String> {
        String::from_utf8(self.data(key)?).ok()
    }

    /// JSON-decoded value under `key`. Used for integers, floats and bools.
    pub fn value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.data(key)?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key, %err, "stored value does not decode as requested type");
                None
            }
        }
    }

    pub fn persistent_ref(&self, key: &str) -> Option<Vec<u8>> {
        fetch_persistent_ref(
            self.storage.as_ref(),
            &self.query(key).return_persistent_ref(true),
        )
    }

    /// Accessibility level the item under `key` was stored with.
    pub fn accessibility(&self, key: &str) -> Option<Accessibility> {
        self.storage
            .copy_matching(&self.query(key))
            .ok()
            .map(|found| found.attributes.accessible)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data(key).is_some()
    }

    /// Names of every key stored under this keychain's service.
    ///
    /// Backends that cannot enumerate (the OS keyring) report `InvalidParameter`.
    pub fn all_keys(&self) -> Result<BTreeSet<String>, KeychainError> {
        let found = self.storage.copy_all_matching(&self.scope_query())?;
        Ok(found
            .into_iter()
            .map(|item| item.attributes.account)
            .collect())
    }

    // Setters

    /// Store `value` under `key`, overwriting any existing value.
    pub fn set_data(&self, key: &str, value: &[u8]) -> Result<(), KeychainError> {
        self.set_data_with(key, value, None, false)
    }

    /// Store `value` with an explicit accessibility (defaults to the keychain's) and sync flag.
    #[instrument(skip(self, value))]
    pub fn set_data_with(
        &self,
        key: &str,
        value: &[u8],
        accessible: Option<Accessibility>,
        synchronizable: bool,
    ) -> Result<(), KeychainError> {
        let query = self
            .query(key)
            .accessible(accessible.unwrap_or_else(|| self.options.accessibility.clone()))
            .synchronizable(synchronizable);

        match self.storage.add(&query, value) {
            Ok(()) => Ok(()),
            Err(StorageError::DuplicateItem) => {
                debug!("item exists, updating in place");
                // Match on identity only so the existing item is found whatever its level.
                self.storage.update(&self.query(key), value)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.set_data(key, value.as_bytes())
    }

    /// Store any serializable value as JSON.
    pub fn set_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KeychainError> {
        let bytes = serde_json::to_vec(value).map_err(|e| KeychainError::Encode {
            reason: e.to_string(),
        })?;
        self.set_data(key, &bytes)
    }

    /// Remove the item under `key`. Returns `false` if nothing was stored.
    #[instrument(skip(self))]
    pub fn remove(&self, key: &str) -> Result<bool, KeychainError> {
        match self.storage.delete(&self.query(key)) {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove every key stored under this keychain's service. Returns how many were removed.
    #[instrument(skip(self), fields(service = %self.options.service_name))]
    pub fn remove_all_keys(&self) -> Result<usize, KeychainError> {
        delete_counted(self.storage.as_ref(), &self.scope_query())
    }

    /// Remove every generic and internet password the backend holds, whatever
    /// their service or access group. Returns how many items were removed.
    #[instrument(skip(self))]
    pub fn wipe(&self) -> Result<usize, KeychainError> {
        let mut removed = 0;
        for class in [ItemClass::GenericPassword, ItemClass::InternetPassword] {
            let query = ItemQuery {
                class,
                ..ItemQuery::default()
            };
            removed += delete_counted(self.storage.as_ref(), &query)?;
        }
        Ok(removed)
    }
}

fn delete_counted<S: SecureStorage + ?Sized>(
    storage: &S,
    query: &ItemQuery,
) -> Result<usize, KeychainError> {
    let count = storage.copy_all_matching(query)?.len();
    if count == 0 {
        return Ok(0);
    }
    match storage.delete(query) {
        Ok(()) => Ok(count),
        Err(StorageError::NotFound) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use keywrap_core::InMemoryStorage;

    use super::*;

    fn keychain() -> Keychain<InMemoryStorage> {
        Keychain::standard(InMemoryStorage::new())
    }

    #[test]
    fn stores_and_reads_strings() {
        let keychain = keychain();
        keychain.set_string("token", "s3cret").expect("set");

        assert_eq!(keychain.string("token").as_deref(), Some("s3cret"));
        assert!(keychain.contains("token"));
        assert!(!keychain.contains("other"));
    }

    #[test]
    fn set_overwrites_existing_value() {
        let keychain = keychain();
        keychain.set_string("token", "first").expect("set");
        keychain.set_string("token", "second").expect("overwrite");

        assert_eq!(keychain.string("token").as_deref(), Some("second"));
    }

    #[test]
    fn primitive_values_round_trip() {
        let keychain = keychain();
        keychain.set_value("int", &42i64).expect("int");
        keychain.set_value("bool", &false).expect("bool");
        keychain.set_value("float", &5.25f32).expect("float");
        keychain.set_value("double", &10.75f64).expect("double");

        assert_eq!(keychain.value::<i64>("int"), Some(42));
        assert_eq!(keychain.value::<bool>("bool"), Some(false));
        assert_eq!(keychain.value::<f32>("float"), Some(5.25));
        assert_eq!(keychain.value::<f64>("double"), Some(10.75));
        // Wrong type reads as absent.
        assert_eq!(keychain.value::<bool>("int"), None);
    }

    #[test]
    fn non_utf8_payload_is_not_a_string() {
        let keychain = keychain();
        keychain.set_data("bin", &[0xff, 0xfe]).expect("set");

        assert_eq!(keychain.string("bin"), None);
        assert_eq!(keychain.data("bin"), Some(vec![0xff, 0xfe]));
    }

    #[test]
    fn remove_reports_whether_anything_was_stored() {
        let keychain = keychain();
        keychain.set_string("k", "v").expect("set");

        assert!(keychain.remove("k").expect("remove"));
        assert!(!keychain.remove("k").expect("remove again"));
        assert_eq!(keychain.data("k"), None);
    }

    #[test]
    fn accessibility_is_recorded_and_filters_reads() {
        let keychain = keychain();
        keychain
            .set_data_with("k", b"v", Some(Accessibility::AfterFirstUnlock), false)
            .expect("set");

        assert_eq!(
            keychain.accessibility("k"),
            Some(Accessibility::AfterFirstUnlock)
        );
        assert_eq!(
            keychain.data_with("k", Some(Accessibility::WhenUnlocked), None),
            None
        );
        assert_eq!(
            keychain.data_with("k", Some(Accessibility::AfterFirstUnlock), Some(false)),
            Some(b"v".to_vec())
        );
        assert_eq!(keychain.data_with("k", None, Some(true)), None);
    }

    #[test]
    fn default_accessibility_comes_from_options() {
        let keychain = Keychain::new(
            InMemoryStorage::new(),
            KeychainOptions {
                accessibility: Accessibility::WhenUnlockedThisDeviceOnly,
                ..KeychainOptions::default()
            },
        );
        keychain.set_string("k", "v").expect("set");
        assert_eq!(
            keychain.accessibility("k"),
            Some(Accessibility::WhenUnlockedThisDeviceOnly)
        );
    }

    #[test]
    fn services_and_access_groups_are_isolated() {
        let storage = Arc::new(InMemoryStorage::new());
        let app = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "app".into(),
                ..KeychainOptions::default()
            },
        );
        let other = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "other".into(),
                ..KeychainOptions::default()
            },
        );
        let shared = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "app".into(),
                access_group: Some("team".into()),
                ..KeychainOptions::default()
            },
        );

        app.set_string("k", "app").expect("set");
        assert_eq!(other.string("k"), None);
        assert_eq!(shared.string("k"), None);

        shared.set_string("k", "team").expect("set shared");
        assert_eq!(shared.string("k").as_deref(), Some("team"));
        assert_eq!(app.string("k").as_deref(), Some("app"));
    }

    #[test]
    fn all_keys_lists_only_this_service() {
        let storage = Arc::new(InMemoryStorage::new());
        let app = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "app".into(),
                ..KeychainOptions::default()
            },
        );
        let other = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "other".into(),
                ..KeychainOptions::default()
            },
        );
        app.set_string("b", "2").expect("set");
        app.set_string("a", "1").expect("set");
        other.set_string("c", "3").expect("set");

        let keys: Vec<_> = app.all_keys().expect("keys").into_iter().collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(Keychain::standard(InMemoryStorage::new())
            .all_keys()
            .expect("keys")
            .is_empty());
    }

    #[test]
    fn remove_all_keys_leaves_other_services_alone() {
        let storage = Arc::new(InMemoryStorage::new());
        let app = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "app".into(),
                ..KeychainOptions::default()
            },
        );
        let other = Keychain::new(
            Arc::clone(&storage),
            KeychainOptions {
                service_name: "other".into(),
                ..KeychainOptions::default()
            },
        );
        app.set_string("a", "1").expect("set");
        app.set_string("b", "2").expect("set");
        other.set_string("c", "3").expect("set");

        assert_eq!(app.remove_all_keys().expect("remove all"), 2);
        assert_eq!(app.remove_all_keys().expect("nothing left"), 0);
        assert!(app.all_keys().expect("keys").is_empty());
        assert_eq!(other.string("c").as_deref(), Some("3"));
    }

    #[test]
    fn wipe_clears_every_service_and_class() {
        let storage = Arc::new(InMemoryStorage::new());
        let app = Keychain::new(Arc::clone(&storage), KeychainOptions::default());
        app.set_string("a", "1").expect("set");
        storage
            .add(
                &ItemQuery::internet_password().service("web").account("bob"),
                b"pw",
            )
            .expect("add internet password");

        assert_eq!(app.wipe().expect("wipe"), 2);
        assert!(!app.contains("a"));
        assert_eq!(
            storage.copy_all_matching(&ItemQuery::internet_password()),
            Ok(Vec::new())
        );
        assert_eq!(app.wipe().expect("wipe empty"), 0);
    }

    #[test]
    fn persistent_ref_exists_only_for_stored_keys() {
        let keychain = keychain();
        keychain.set_string("k", "v").expect("set");

        assert!(keychain.persistent_ref("k").is_some());
        assert!(keychain.persistent_ref("missing").is_none());
    }
}
