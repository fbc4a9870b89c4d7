//! The in-memory Token Store: the reference backend, and the layer that
//! [`super::FileTokenStore`] and [`super::KvTokenStore`] are built on top of.

use super::{MAX_RS_RECORDS, TokenStore};
use crate::types::{ProviderToken, RsRecord, Transaction};
use async_trait::async_trait;
use dashmap::DashMap;
use mcpgate_core::GateResult;
use tracing::warn;

/// Records are keyed by access token; a secondary index maps refresh token
/// to access token so both lookups are O(1).
pub struct MemoryTokenStore {
    by_access: DashMap<String, RsRecord>,
    refresh_to_access: DashMap<String, String>,
    transactions: DashMap<String, Transaction>,
    codes: DashMap<String, String>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            by_access: DashMap::new(),
            refresh_to_access: DashMap::new(),
            transactions: DashMap::new(),
            codes: DashMap::new(),
        }
    }

    /// Delete both index entries for a record.
    fn remove_record(&self, access: &str, refresh: &str) {
        self.by_access.remove(access);
        self.refresh_to_access.remove(refresh);
    }

    fn evict_oldest_if_over_cap(&self) {
        if self.by_access.len() <= MAX_RS_RECORDS {
            return;
        }
        let mut entries: Vec<(String, String, i64)> = self
            .by_access
            .iter()
            .map(|e| (e.rs_access_token.clone(), e.rs_refresh_token.clone(), e.created_at))
            .collect();
        entries.sort_by_key(|(_, _, created_at)| *created_at);
        for (access, refresh, _) in entries.into_iter().take(10) {
            self.remove_record(&access, &refresh);
        }
        warn!("token store exceeded {MAX_RS_RECORDS} records, evicted 10 oldest");
    }

    fn insert_fresh(&self, record: RsRecord) -> RsRecord {
        self.refresh_to_access
            .insert(record.rs_refresh_token.clone(), record.rs_access_token.clone());
        self.by_access.insert(record.rs_access_token.clone(), record.clone());
        self.evict_oldest_if_over_cap();
        record
    }

    /// Every live record, for the file/KV backends to persist.
    pub fn snapshot_records(&self) -> Vec<RsRecord> {
        self.by_access.iter().filter(|e| !e.is_expired()).map(|e| e.clone()).collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store_rs_mapping(
        &self,
        rs_access: String,
        provider: ProviderToken,
        rs_refresh: Option<String>,
    ) -> GateResult<RsRecord> {
        if let Some(refresh) = &rs_refresh
            && let Some(existing_access) = self.refresh_to_access.get(refresh).map(|e| e.clone())
        {
            let mut record = if existing_access == rs_access {
                self.by_access.get(&existing_access).map(|e| e.clone())
            } else {
                self.by_access.remove(&existing_access).map(|(_, r)| r)
            }
            .unwrap_or_else(|| RsRecord::new(rs_access.clone(), refresh.clone(), provider.clone()));
            record.rs_access_token = rs_access.clone();
            record.provider = provider;
            self.refresh_to_access.insert(refresh.clone(), rs_access.clone());
            self.by_access.insert(rs_access, record.clone());
            return Ok(record);
        }

        let refresh = rs_refresh.unwrap_or_else(mcpgate_core::token::rs_token);
        let record = RsRecord::new(rs_access, refresh, provider);
        Ok(self.insert_fresh(record))
    }

    async fn get_by_rs_access(&self, token: &str) -> GateResult<Option<RsRecord>> {
        let Some(record) = self.by_access.get(token).map(|e| e.clone()) else {
            return Ok(None);
        };
        if record.is_expired() {
            self.remove_record(&record.rs_access_token, &record.rs_refresh_token);
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn get_by_rs_refresh(&self, token: &str) -> GateResult<Option<RsRecord>> {
        let Some(access) = self.refresh_to_access.get(token).map(|e| e.clone()) else {
            return Ok(None);
        };
        self.get_by_rs_access(&access).await
    }

    async fn update_by_rs_refresh(
        &self,
        rs_refresh: &str,
        new_provider: ProviderToken,
        maybe_new_rs_access: Option<String>,
    ) -> GateResult<Option<RsRecord>> {
        let Some(mut record) = self.get_by_rs_refresh(rs_refresh).await? else {
            return Ok(None);
        };
        let old_access = record.rs_access_token.clone();
        record.provider = new_provider;

        if let Some(new_access) = maybe_new_rs_access
            && new_access != old_access
        {
            self.by_access.remove(&old_access);
            record.rs_access_token = new_access;
        }

        self.refresh_to_access.insert(rs_refresh.to_string(), record.rs_access_token.clone());
        self.by_access.insert(record.rs_access_token.clone(), record.clone());
        Ok(Some(record))
    }

    async fn save_transaction(&self, txn_id: &str, txn: Transaction) -> GateResult<()> {
        self.transactions.insert(txn_id.to_string(), txn);
        Ok(())
    }

    async fn get_transaction(&self, txn_id: &str) -> GateResult<Option<Transaction>> {
        let Some(txn) = self.transactions.get(txn_id).map(|e| e.clone()) else {
            return Ok(None);
        };
        if txn.is_expired() {
            self.transactions.remove(txn_id);
            return Ok(None);
        }
        Ok(Some(txn))
    }

    async fn delete_transaction(&self, txn_id: &str) -> GateResult<()> {
        self.transactions.remove(txn_id);
        Ok(())
    }

    async fn save_code(&self, code: &str, txn_id: &str) -> GateResult<()> {
        self.codes.insert(code.to_string(), txn_id.to_string());
        Ok(())
    }

    async fn get_txn_id_by_code(&self, code: &str) -> GateResult<Option<String>> {
        Ok(self.codes.get(code).map(|e| e.clone()))
    }

    async fn delete_code(&self, code: &str) -> GateResult<()> {
        self.codes.remove(code);
        Ok(())
    }

    async fn sweep(&self) -> GateResult<()> {
        let expired_records: Vec<(String, String)> = self
            .by_access
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| (e.rs_access_token.clone(), e.rs_refresh_token.clone()))
            .collect();
        for (access, refresh) in expired_records {
            self.remove_record(&access, &refresh);
        }

        let expired_txns: Vec<String> = self.transactions.iter().filter(|e| e.is_expired()).map(|e| e.key().clone()).collect();
        for txn_id in expired_txns {
            self.transactions.remove(&txn_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(access: &str) -> ProviderToken {
        ProviderToken {
            access_token: access.to_string(),
            refresh_token: Some("provider-refresh".to_string()),
            expires_at: None,
            scopes: None,
        }
    }

    #[tokio::test]
    async fn store_then_lookup_both_keys() {
        let store = MemoryTokenStore::new();
        store
            .store_rs_mapping("rs-access-1".into(), provider("p1"), Some("rs-refresh-1".into()))
            .await
            .unwrap();

        let by_access = store.get_by_rs_access("rs-access-1").await.unwrap().unwrap();
        let by_refresh = store.get_by_rs_refresh("rs-refresh-1").await.unwrap().unwrap();
        assert_eq!(by_access.rs_access_token, by_refresh.rs_access_token);
    }

    #[tokio::test]
    async fn rotating_access_key_invalidates_old_one() {
        let store = MemoryTokenStore::new();
        store
            .store_rs_mapping("rs-access-1".into(), provider("p1"), Some("rs-refresh-1".into()))
            .await
            .unwrap();

        store
            .update_by_rs_refresh("rs-refresh-1", provider("p2"), Some("rs-access-2".into()))
            .await
            .unwrap();

        assert!(store.get_by_rs_access("rs-access-1").await.unwrap().is_none());
        let rec = store.get_by_rs_access("rs-access-2").await.unwrap().unwrap();
        assert_eq!(rec.provider.access_token, "p2");
    }

    #[tokio::test]
    async fn missing_lookups_return_none_not_error() {
        let store = MemoryTokenStore::new();
        assert!(store.get_by_rs_access("nope").await.unwrap().is_none());
        assert!(store.get_txn_id_by_code("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_storing_a_refresh_token_with_a_new_access_token_preserves_created_at() {
        let store = MemoryTokenStore::new();
        let first = store
            .store_rs_mapping("rs-access-1".into(), provider("p1"), Some("rs-refresh-1".into()))
            .await
            .unwrap();

        let second = store
            .store_rs_mapping("rs-access-2".into(), provider("p2"), Some("rs-refresh-1".into()))
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(store.get_by_rs_access("rs-access-1").await.unwrap().is_none());
        let rec = store.get_by_rs_access("rs-access-2").await.unwrap().unwrap();
        assert_eq!(rec.provider.access_token, "p2");
    }

    #[tokio::test]
    async fn code_to_txn_round_trips_and_deletes() {
        let store = MemoryTokenStore::new();
        store.save_code("code-1", "txn-1").await.unwrap();
        assert_eq!(store.get_txn_id_by_code("code-1").await.unwrap().as_deref(), Some("txn-1"));
        store.delete_code("code-1").await.unwrap();
        assert!(store.get_txn_id_by_code("code-1").await.unwrap().is_none());
    }
}
