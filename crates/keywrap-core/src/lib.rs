//! Core abstractions for keywrap: the typed item query, the secure-storage
//! contract, and the read path that unwraps a lookup into raw bytes.

pub mod query;
pub mod storage;
pub mod unwrap;

pub use query::{Accessibility, ItemAttributes, ItemClass, ItemQuery};
pub use storage::{InMemoryStorage, ItemMatch, SecureStorage, StorageError};
pub use unwrap::{fetch_data, fetch_persistent_ref, lookup_data, LookupError};
