//! The Token Store contract (spec §4.1) and its three backends.

mod file;
mod kv;
mod memory;

pub use file::FileTokenStore;
pub use kv::{KvNamespace, KvTokenStore};
pub use memory::MemoryTokenStore;

use crate::types::{ProviderToken, RsRecord, Transaction};
use async_trait::async_trait;
use mcpgate_core::GateResult;

/// Records beyond this count trigger eviction of the 10 oldest on write.
pub const MAX_RS_RECORDS: usize = 10_000;

/// Persists RS-token ↔ provider-token mappings, OAuth transactions, and
/// authorization codes. All three backends (in-memory, file, KV) implement
/// the same contract; callers never see the backend through this trait.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Create or replace a mapping. If `rs_refresh` already identifies a
    /// record, updates it in place (re-indexing the old access key);
    /// otherwise creates a fresh record.
    async fn store_rs_mapping(
        &self,
        rs_access: String,
        provider: ProviderToken,
        rs_refresh: Option<String>,
    ) -> GateResult<RsRecord>;

    /// Returns `None` if absent or provider-expired (lazy eviction).
    async fn get_by_rs_access(&self, token: &str) -> GateResult<Option<RsRecord>>;

    /// Returns `None` if absent or provider-expired (lazy eviction).
    async fn get_by_rs_refresh(&self, token: &str) -> GateResult<Option<RsRecord>>;

    /// Atomically replace the provider token for the record addressed by
    /// `rs_refresh`. If `maybe_new_rs_access` differs from the current access
    /// key, the old access index entry is deleted before the new one is
    /// published — no window exists where both resolve the record.
    async fn update_by_rs_refresh(
        &self,
        rs_refresh: &str,
        new_provider: ProviderToken,
        maybe_new_rs_access: Option<String>,
    ) -> GateResult<Option<RsRecord>>;

    async fn save_transaction(&self, txn_id: &str, txn: Transaction) -> GateResult<()>;
    async fn get_transaction(&self, txn_id: &str) -> GateResult<Option<Transaction>>;
    async fn delete_transaction(&self, txn_id: &str) -> GateResult<()>;

    async fn save_code(&self, code: &str, txn_id: &str) -> GateResult<()>;
    async fn get_txn_id_by_code(&self, code: &str) -> GateResult<Option<String>>;
    async fn delete_code(&self, code: &str) -> GateResult<()>;

    /// Lazily delete expired records/transactions/codes. Called from the
    /// 60-second sweep task; backends that self-evict on read may no-op.
    async fn sweep(&self) -> GateResult<()>;
}
