//! File-backed Token Store: layers over [`MemoryTokenStore`], persisting RS
//! records to an optionally AES-GCM-encrypted JSON document (spec §4.1).

use super::{MemoryTokenStore, TokenStore};
use crate::crypto::{self, EncryptionKey};
use crate::types::{ProviderToken, RsRecord};
use async_trait::async_trait;
use mcpgate_core::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

const PERSIST_VERSION: u32 = 1;
const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDocument {
    version: u32,
    encrypted: bool,
    records: Vec<RsRecord>,
}

pub struct FileTokenStore {
    inner: MemoryTokenStore,
    path: PathBuf,
    key: Option<EncryptionKey>,
    dirty: Arc<Notify>,
}

impl FileTokenStore {
    /// Load `path` (if present), re-hydrating every non-expired record into
    /// the in-memory layer, and spawn the debounced write-through task.
    ///
    /// If the document on disk is marked `encrypted: true` but no `key` was
    /// supplied, the file is left unconsumed and the store starts empty
    /// (spec §8 boundary case), with a warning logged.
    ///
    /// # Errors
    ///
    /// Returns `GateError::configuration` if `key` fails to decode.
    pub async fn open(path: PathBuf, encryption_key: Option<&str>) -> GateResult<Arc<Self>> {
        let key = encryption_key.map(EncryptionKey::decode).transpose()?;
        let inner = MemoryTokenStore::new();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.ok();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(metadata) = tokio::fs::metadata(parent).await {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o700);
                    tokio::fs::set_permissions(parent, perms).await.ok();
                }
            }
        }

        if let Ok(raw) = tokio::fs::read(&path).await {
            match Self::decode_document(&raw, key.as_ref()) {
                Ok(Some(doc)) => {
                    for record in doc.records {
                        if !record.is_expired() {
                            inner
                                .store_rs_mapping(record.rs_access_token.clone(), record.provider, Some(record.rs_refresh_token))
                                .await?;
                        }
                    }
                }
                Ok(None) => {
                    warn!(path = %path.display(), "file store is encrypted but no key configured; starting empty");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load token store file; starting empty");
                }
            }
        }

        let store = Arc::new(Self {
            inner,
            path,
            key,
            dirty: Arc::new(Notify::new()),
        });
        store.clone().spawn_writer();
        Ok(store)
    }

    fn decode_document(raw: &[u8], key: Option<&EncryptionKey>) -> GateResult<Option<PersistedDocument>> {
        // Peek `encrypted` without requiring a key, by trying plaintext JSON
        // first; an encrypted document is opaque bytes and will fail to parse.
        if let Ok(doc) = serde_json::from_slice::<PersistedDocument>(raw) {
            return Ok(Some(doc));
        }
        let Some(key) = key else {
            return Ok(None);
        };
        let plaintext = crypto::decrypt(key, raw)?;
        let doc: PersistedDocument = serde_json::from_slice(&plaintext)?;
        Ok(Some(doc))
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    fn spawn_writer(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                self.dirty.notified().await;
                tokio::time::sleep(DEBOUNCE).await;
                if let Err(e) = self.flush().await {
                    warn!(error = %e, "token store write-through failed");
                }
            }
        });
    }

    /// Snapshot every live record and write it to disk, encrypting first if
    /// a key is configured. Called by the debounced writer and on shutdown.
    ///
    /// # Errors
    ///
    /// Propagates I/O and encryption errors; the in-memory state is
    /// unaffected either way.
    pub async fn flush(&self) -> GateResult<()> {
        let records = self.inner.snapshot_records();
        let doc = PersistedDocument {
            version: PERSIST_VERSION,
            encrypted: self.key.is_some(),
            records,
        };
        let json = serde_json::to_vec(&doc)?;
        let bytes = match &self.key {
            Some(key) => crypto::encrypt(key, &json)?,
            None => json,
        };

        tokio::fs::write(&self.path, &bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await.ok();
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn store_rs_mapping(
        &self,
        rs_access: String,
        provider: ProviderToken,
        rs_refresh: Option<String>,
    ) -> GateResult<RsRecord> {
        let record = self.inner.store_rs_mapping(rs_access, provider, rs_refresh).await?;
        self.mark_dirty();
        Ok(record)
    }

    async fn get_by_rs_access(&self, token: &str) -> GateResult<Option<RsRecord>> {
        self.inner.get_by_rs_access(token).await
    }

    async fn get_by_rs_refresh(&self, token: &str) -> GateResult<Option<RsRecord>> {
        self.inner.get_by_rs_refresh(token).await
    }

    async fn update_by_rs_refresh(
        &self,
        rs_refresh: &str,
        new_provider: ProviderToken,
        maybe_new_rs_access: Option<String>,
    ) -> GateResult<Option<RsRecord>> {
        let result = self.inner.update_by_rs_refresh(rs_refresh, new_provider, maybe_new_rs_access).await?;
        if result.is_some() {
            self.mark_dirty();
        }
        Ok(result)
    }

    async fn save_transaction(&self, txn_id: &str, txn: crate::types::Transaction) -> GateResult<()> {
        self.inner.save_transaction(txn_id, txn).await
    }

    async fn get_transaction(&self, txn_id: &str) -> GateResult<Option<crate::types::Transaction>> {
        self.inner.get_transaction(txn_id).await
    }

    async fn delete_transaction(&self, txn_id: &str) -> GateResult<()> {
        self.inner.delete_transaction(txn_id).await
    }

    async fn save_code(&self, code: &str, txn_id: &str) -> GateResult<()> {
        self.inner.save_code(code, txn_id).await
    }

    async fn get_txn_id_by_code(&self, code: &str) -> GateResult<Option<String>> {
        self.inner.get_txn_id_by_code(code).await
    }

    async fn delete_code(&self, code: &str) -> GateResult<()> {
        self.inner.delete_code(code).await
    }

    async fn sweep(&self) -> GateResult<()> {
        self.inner.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderToken;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn provider() -> ProviderToken {
        ProviderToken {
            access_token: "p1".into(),
            refresh_token: None,
            expires_at: None,
            scopes: None,
        }
    }

    #[tokio::test]
    async fn round_trips_through_disk_unencrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::open(path.clone(), None).await.unwrap();
        store.store_rs_mapping("access-1".into(), provider(), Some("refresh-1".into())).await.unwrap();
        store.flush().await.unwrap();

        let reopened = FileTokenStore::open(path, None).await.unwrap();
        let record = reopened.get_by_rs_access("access-1").await.unwrap().unwrap();
        assert_eq!(record.provider.access_token, "p1");
    }

    #[tokio::test]
    async fn round_trips_through_disk_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let key = URL_SAFE_NO_PAD.encode([3u8; 32]);

        let store = FileTokenStore::open(path.clone(), Some(&key)).await.unwrap();
        store.store_rs_mapping("access-1".into(), provider(), Some("refresh-1".into())).await.unwrap();
        store.flush().await.unwrap();

        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert!(serde_json::from_slice::<PersistedDocument>(&on_disk).is_err());

        let reopened = FileTokenStore::open(path, Some(&key)).await.unwrap();
        assert!(reopened.get_by_rs_access("access-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn encrypted_file_without_key_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let key = URL_SAFE_NO_PAD.encode([5u8; 32]);

        let store = FileTokenStore::open(path.clone(), Some(&key)).await.unwrap();
        store.store_rs_mapping("access-1".into(), provider(), Some("refresh-1".into())).await.unwrap();
        store.flush().await.unwrap();

        let reopened = FileTokenStore::open(path, None).await.unwrap();
        assert!(reopened.get_by_rs_access("access-1").await.unwrap().is_none());
    }
}
