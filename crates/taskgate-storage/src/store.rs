use async_trait::async_trait;

use taskgate_adaptor_core::{ChannelMeta, Task};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Caller identity resolved from an access key.
#[derive(Debug, Clone, Default)]
pub struct AuthUser {
    pub id: i64,
    pub name: String,
    pub using_group: String,
    pub quota: i64,
    pub enabled: bool,
}

/// Task persistence. Implementations must treat (user_id, platform, task_id)
/// as unique.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts and returns the row id.
    async fn insert_task(&self, task: &Task) -> StorageResult<i64>;
    async fn update_task(&self, task: &Task) -> StorageResult<()>;
    async fn get_task(&self, user_id: i64, task_id: &str) -> StorageResult<Option<Task>>;
    /// Lookup without a user scope. Used by operator tooling and the sweep.
    async fn get_task_any_user(&self, task_id: &str) -> StorageResult<Option<Task>>;
    /// Non-terminal tasks, oldest submit first.
    async fn unfinished_tasks(&self, limit: u64) -> StorageResult<Vec<Task>>;
}

/// One audit row per settled relay or task submission.
#[derive(Debug, Clone, Default)]
pub struct UsageEntry {
    pub user_id: i64,
    pub model: String,
    pub action: String,
    pub quota: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    /// Human-readable cost breakdown: the effective ratios and request
    /// attributes the charge was computed from.
    pub detail: String,
}

/// Balance accounting in quota units.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn balance(&self, user_id: i64) -> StorageResult<i64>;
    /// Decrements the balance by `amount` only if it covers it, as one
    /// atomic operation. Returns whether the decrement happened.
    async fn try_consume(&self, user_id: i64, amount: i64) -> StorageResult<bool>;
    /// Unconditional decrement used at settlement time. The balance may go
    /// negative when a concurrent call already spent the preflight margin.
    async fn consume_unchecked(&self, user_id: i64, amount: i64) -> StorageResult<()>;
    async fn refund(&self, user_id: i64, amount: i64) -> StorageResult<()>;
    /// Appends one audit row. Settlement must not fail on a logging error.
    async fn record_usage(&self, entry: &UsageEntry) -> StorageResult<()>;
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn get_channel(&self, id: i64) -> StorageResult<Option<ChannelMeta>>;
    /// Enabled channels for a platform, in id order. Failover walks this
    /// list after removing the channel that already failed.
    async fn enabled_channels(&self, platform: &str) -> StorageResult<Vec<ChannelMeta>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_access_key(&self, access_key: &str) -> StorageResult<Option<AuthUser>>;
}
