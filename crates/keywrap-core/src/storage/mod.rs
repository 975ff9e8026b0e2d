mod secure_storage;

pub use secure_storage::{
    required_attributes, InMemoryStorage, ItemMatch, SecureStorage, StorageError,
};
