use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use keywrap_core::{
    storage::{required_attributes, ItemMatch, SecureStorage, StorageError},
    ItemAttributes, ItemQuery,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::key_provider::{KeyMaterial, KeyProvider};

const BLOB_EXTENSION: &str = "item";

/// AES-GCM encrypted file backend implementing `SecureStorage`.
/// One blob per item; attributes stay in clear so lookups can filter without
/// decrypting. The data key comes from a `KeyProvider` (OS keyring in production).
pub struct EncryptedFileStorage<P: KeyProvider> {
    root: PathBuf,
    key_provider: P,
}

impl<P: KeyProvider> EncryptedFileStorage<P> {
    pub fn new(root: impl Into<PathBuf>, key_provider: P) -> Self {
        Self {
            root: root.into(),
            key_provider,
        }
    }

    fn path_for(&self, attrs: &ItemAttributes) -> PathBuf {
        self.root
            .join(blob_name(attrs))
            .with_extension(BLOB_EXTENSION)
    }

    fn cipher(&self) -> Result<Aes256Gcm, StorageError> {
        let material = self
            .key_provider
            .get_or_create()
            .map_err(|e| StorageError::Backend {
                reason: format!("key provider: {e}"),
            })?;
        build_cipher(&material)
    }

    /// Every blob on disk whose attributes satisfy `query`.
    fn matching(&self, query: &ItemQuery) -> Result<Vec<(PathBuf, StoredBlob)>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_err(err)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let path = entry.map_err(storage_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            // A damaged blob must not hide the healthy ones next to it.
            let blob = match read_blob(&path) {
                Ok(blob) => blob,
                Err(StorageError::NotFound) => continue,
                Err(err) => {
                    warn!(?path, %err, "skipping unreadable item");
                    continue;
                }
            };
            if query.matches(&blob.attributes) {
                found.push((path, blob));
            }
        }
        // Stable order so "first match" does not depend on the filesystem.
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    fn seal(&self, attributes: ItemAttributes, data: &[u8]) -> Result<StoredBlob, StorageError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| StorageError::Backend {
                reason: format!("encrypt failed: {e}"),
            })?;

        Ok(StoredBlob {
            attributes,
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        })
    }

    fn open(&self, blob: &StoredBlob) -> Result<Vec<u8>, StorageError> {
        let cipher = self.cipher()?;

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(&blob.nonce)
            .map_err(|e| StorageError::Backend {
                reason: format!("nonce decode failed: {e}"),
            })?;
        if nonce_bytes.len() != 12 {
            return Err(StorageError::Backend {
                reason: format!("nonce must be 12 bytes, got {}", nonce_bytes.len()),
            });
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = URL_SAFE_NO_PAD
            .decode(&blob.ciphertext)
            .map_err(|e| StorageError::Backend {
                reason: format!("ciphertext decode failed: {e}"),
            })?;

        cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| StorageError::Backend {
                reason: format!("decrypt failed: {e}"),
            })
    }

    fn to_match(
        &self,
        query: &ItemQuery,
        path: &Path,
        blob: StoredBlob,
    ) -> Result<ItemMatch, StorageError> {
        let data = if query.return_data {
            Some(self.open(&blob)?)
        } else {
            None
        };
        // The blob name is the persistent reference.
        let persistent_ref = if query.return_persistent_ref {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned().into_bytes())
        } else {
            None
        };

        Ok(ItemMatch {
            attributes: blob.attributes,
            data,
            persistent_ref,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    attributes: ItemAttributes,
    nonce: String,
    ciphertext: String,
}

impl<P: KeyProvider> SecureStorage for EncryptedFileStorage<P> {
    #[instrument(skip_all, fields(account = ?query.account))]
    fn copy_matching(&self, query: &ItemQuery) -> Result<ItemMatch, StorageError> {
        let (path, blob) = self
            .matching(query)?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)?;
        self.to_match(query, &path, blob)
    }

    #[instrument(skip_all, fields(service = ?query.service))]
    fn copy_all_matching(&self, query: &ItemQuery) -> Result<Vec<ItemMatch>, StorageError> {
        self.matching(query)?
            .into_iter()
            .map(|(path, blob)| self.to_match(query, &path, blob))
            .collect()
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn add(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let attributes = required_attributes(query)?;
        let path = self.path_for(&attributes);
        if path.exists() {
            return Err(StorageError::DuplicateItem);
        }

        let blob = self.seal(attributes, data)?;
        write_blob(&path, &blob)
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn update(&self, query: &ItemQuery, data: &[u8]) -> Result<(), StorageError> {
        let matches = self.matching(query)?;
        if matches.is_empty() {
            return Err(StorageError::NotFound);
        }

        for (path, blob) in matches {
            let resealed = self.seal(blob.attributes, data)?;
            write_blob(&path, &resealed)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(account = ?query.account))]
    fn delete(&self, query: &ItemQuery) -> Result<(), StorageError> {
        let matches = self.matching(query)?;
        if matches.is_empty() {
            return Err(StorageError::NotFound);
        }

        for (path, _) in matches {
            match fs::remove_file(&path) {
                Ok(_) => debug!(?path, "removed item"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(storage_err(err)),
            }
        }
        Ok(())
    }
}

fn write_blob(path: &Path, blob: &StoredBlob) -> Result<(), StorageError> {
    let parent = path.parent().ok_or_else(|| StorageError::Backend {
        reason: "invalid storage path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(blob).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_blob(path: &Path) -> Result<StoredBlob, StorageError> {
    let mut file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound
        } else {
            storage_err(err)
        }
    })?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    serde_json::from_slice(&buf).map_err(storage_err)
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(&material.bytes).map_err(|e| StorageError::Backend {
        reason: format!("cipher init failed: {e}"),
    })
}

/// Fixed-length file name, whatever the size of the service or account.
fn blob_name(attrs: &ItemAttributes) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(attrs.identity().as_bytes()))
}

fn storage_err<E: ToString>(err: E) -> StorageError {
    StorageError::Backend {
        reason: err.to_string(),
    }
}
