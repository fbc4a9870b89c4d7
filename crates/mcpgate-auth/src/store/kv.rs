//! KV-backed Token Store: write-through to a remote namespace, falling back
//! to the in-process memory layer on KV errors (spec §4.1).
//!
//! `KvNamespace` is the capability interface a real deployment would back
//! with Redis, DynamoDB, or similar; nothing in this crate depends on a
//! specific remote store.

use super::{MemoryTokenStore, TokenStore};
use crate::types::{ProviderToken, RsRecord, Transaction};
use async_trait::async_trait;
use mcpgate_core::GateResult;
use tracing::warn;

/// Minimal remote key-value capability the KV backend needs: get/set with a
/// TTL, and delete. Implementations are expected to be cheap to clone
/// (an `Arc`-wrapped client handle, typically).
#[async_trait]
pub trait KvNamespace: Send + Sync {
    async fn get(&self, key: &str) -> GateResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> GateResult<()>;
    async fn delete(&self, key: &str) -> GateResult<()>;
}

pub struct KvTokenStore<K: KvNamespace> {
    kv: K,
    /// Read-your-writes cache within this process; not shared across
    /// replicas (spec §4.1: "fallback to an in-process memory cache").
    cache: MemoryTokenStore,
}

const RECORD_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const TXN_TTL_SECS: u64 = 10 * 60;

impl<K: KvNamespace> KvTokenStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            cache: MemoryTokenStore::new(),
        }
    }

    fn record_key(access: &str) -> String {
        format!("rs_record:{access}")
    }

    fn refresh_index_key(refresh: &str) -> String {
        format!("session:apikey:{refresh}")
    }

    async fn put_remote(&self, record: &RsRecord) {
        let Ok(json) = serde_json::to_string(record) else { return };
        if let Err(e) = self.kv.set(&Self::record_key(&record.rs_access_token), &json, RECORD_TTL_SECS).await {
            warn!(error = %e, "KV write-through failed, relying on in-process cache");
        }
        if let Err(e) = self
            .kv
            .set(&Self::refresh_index_key(&record.rs_refresh_token), &record.rs_access_token, RECORD_TTL_SECS)
            .await
        {
            warn!(error = %e, "KV refresh-index write-through failed");
        }
    }
}

#[async_trait]
impl<K: KvNamespace> TokenStore for KvTokenStore<K> {
    async fn store_rs_mapping(
        &self,
        rs_access: String,
        provider: ProviderToken,
        rs_refresh: Option<String>,
    ) -> GateResult<RsRecord> {
        let record = self.cache.store_rs_mapping(rs_access, provider, rs_refresh).await?;
        self.put_remote(&record).await;
        Ok(record)
    }

    async fn get_by_rs_access(&self, token: &str) -> GateResult<Option<RsRecord>> {
        if let Some(record) = self.cache.get_by_rs_access(token).await? {
            return Ok(Some(record));
        }
        match self.kv.get(&Self::record_key(token)).await {
            Ok(Some(json)) => {
                let record: RsRecord = serde_json::from_str(&json)?;
                if record.is_expired() {
                    return Ok(None);
                }
                self.cache
                    .store_rs_mapping(record.rs_access_token.clone(), record.provider.clone(), Some(record.rs_refresh_token.clone()))
                    .await?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "KV read failed, falling back to empty result");
                Ok(None)
            }
        }
    }

    async fn get_by_rs_refresh(&self, token: &str) -> GateResult<Option<RsRecord>> {
        if let Some(record) = self.cache.get_by_rs_refresh(token).await? {
            return Ok(Some(record));
        }
        match self.kv.get(&Self::refresh_index_key(token)).await {
            Ok(Some(access)) => self.get_by_rs_access(&access).await,
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "KV read failed, falling back to empty result");
                Ok(None)
            }
        }
    }

    async fn update_by_rs_refresh(
        &self,
        rs_refresh: &str,
        new_provider: ProviderToken,
        maybe_new_rs_access: Option<String>,
    ) -> GateResult<Option<RsRecord>> {
        let result = self.cache.update_by_rs_refresh(rs_refresh, new_provider, maybe_new_rs_access).await?;
        if let Some(record) = &result {
            self.put_remote(record).await;
        }
        Ok(result)
    }

    async fn save_transaction(&self, txn_id: &str, txn: Transaction) -> GateResult<()> {
        self.cache.save_transaction(txn_id, txn.clone()).await?;
        if let Ok(json) = serde_json::to_string(&txn) {
            let _ = self.kv.set(&format!("txn:{txn_id}"), &json, TXN_TTL_SECS).await;
        }
        Ok(())
    }

    async fn get_transaction(&self, txn_id: &str) -> GateResult<Option<Transaction>> {
        if let Some(txn) = self.cache.get_transaction(txn_id).await? {
            return Ok(Some(txn));
        }
        match self.kv.get(&format!("txn:{txn_id}")).await {
            Ok(Some(json)) => Ok(serde_json::from_str(&json).ok()),
            _ => Ok(None),
        }
    }

    async fn delete_transaction(&self, txn_id: &str) -> GateResult<()> {
        self.cache.delete_transaction(txn_id).await?;
        let _ = self.kv.delete(&format!("txn:{txn_id}")).await;
        Ok(())
    }

    async fn save_code(&self, code: &str, txn_id: &str) -> GateResult<()> {
        self.cache.save_code(code, txn_id).await?;
        let _ = self.kv.set(&format!("code:{code}"), txn_id, TXN_TTL_SECS).await;
        Ok(())
    }

    async fn get_txn_id_by_code(&self, code: &str) -> GateResult<Option<String>> {
        if let Some(txn_id) = self.cache.get_txn_id_by_code(code).await? {
            return Ok(Some(txn_id));
        }
        match self.kv.get(&format!("code:{code}")).await {
            Ok(v) => Ok(v),
            Err(_) => Ok(None),
        }
    }

    async fn delete_code(&self, code: &str) -> GateResult<()> {
        self.cache.delete_code(code).await?;
        let _ = self.kv.delete(&format!("code:{code}")).await;
        Ok(())
    }

    async fn sweep(&self) -> GateResult<()> {
        self.cache.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct FakeKv {
        data: Arc<Mutex<HashMap<String, String>>>,
    }

    #[async_trait]
    impl KvNamespace for FakeKv {
        async fn get(&self, key: &str) -> GateResult<Option<String>> {
            Ok(self.data.lock().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str, _ttl_secs: u64) -> GateResult<()> {
            self.data.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn delete(&self, key: &str) -> GateResult<()> {
            self.data.lock().remove(key);
            Ok(())
        }
    }

    fn provider() -> ProviderToken {
        ProviderToken {
            access_token: "p1".into(),
            refresh_token: None,
            expires_at: None,
            scopes: None,
        }
    }

    #[tokio::test]
    async fn write_through_reaches_remote_namespace() {
        let kv = FakeKv::default();
        let store = KvTokenStore::new(kv.clone());
        store.store_rs_mapping("access-1".into(), provider(), Some("refresh-1".into())).await.unwrap();

        assert!(kv.get(&KvTokenStore::<FakeKv>::record_key("access-1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fresh_store_reads_from_cache_without_remote_round_trip() {
        let kv = FakeKv::default();
        let store = KvTokenStore::new(kv);
        store.store_rs_mapping("access-1".into(), provider(), Some("refresh-1".into())).await.unwrap();
        let record = store.get_by_rs_access("access-1").await.unwrap().unwrap();
        assert_eq!(record.provider.access_token, "p1");
    }
}
