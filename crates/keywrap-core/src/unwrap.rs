use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    query::ItemQuery,
    storage::{SecureStorage, StorageError},
};

/// Why a lookup produced no payload. Only surfaced by [`lookup_data`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no item matches the query")]
    NotFound,
    /// An item matched but carried no payload (or the query did not ask for one).
    #[error("matching item has no data payload")]
    MissingPayload,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for LookupError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => LookupError::NotFound,
            other => LookupError::Storage(other),
        }
    }
}

/// Run `query` against `storage` and return the raw payload of the match.
///
/// The query is forwarded untouched; callers must set `return_data` for the
/// backend to hand back bytes. Every failure (nothing found, an item without
/// payload, a locked keychain, a backend error) is reported as `None`.
/// Callers should treat `None` as "credential not found", keeping in mind
/// that a transient read failure looks exactly the same. Use [`lookup_data`]
/// when the distinction matters for diagnostics.
pub fn fetch_data<S>(storage: &S, query: &ItemQuery) -> Option<Vec<u8>>
where
    S: SecureStorage + ?Sized,
{
    match lookup_data(storage, query) {
        Ok(data) => Some(data),
        Err(err) => {
            log_collapsed("data", &err);
            None
        }
    }
}

/// Same as [`fetch_data`], but keeps the reason a lookup came back empty.
pub fn lookup_data<S>(storage: &S, query: &ItemQuery) -> Result<Vec<u8>, LookupError>
where
    S: SecureStorage + ?Sized,
{
    storage
        .copy_matching(query)?
        .data
        .ok_or(LookupError::MissingPayload)
}

/// Persistent reference of the first match, collapsed the same way as [`fetch_data`].
/// The query must set `return_persistent_ref`.
pub fn fetch_persistent_ref<S>(storage: &S, query: &ItemQuery) -> Option<Vec<u8>>
where
    S: SecureStorage + ?Sized,
{
    let result = storage
        .copy_matching(query)
        .map_err(LookupError::from)
        .and_then(|found| found.persistent_ref.ok_or(LookupError::MissingPayload));

    match result {
        Ok(reference) => Some(reference),
        Err(err) => {
            log_collapsed("persistent ref", &err);
            None
        }
    }
}

fn log_collapsed(what: &str, err: &LookupError) {
    match err {
        LookupError::NotFound | LookupError::MissingPayload => {
            debug!(%err, "{what} lookup returned nothing")
        }
        LookupError::Storage(_) => warn!(%err, "{what} lookup failed, reporting absent"),
    }
}
