pub mod db;
pub mod entities;
pub mod memory;
pub mod seaorm;
pub mod store;

pub use memory::MemoryStorage;
pub use seaorm::SeaOrmStorage;
pub use store::{
    AuthUser, ChannelDirectory, QuotaLedger, StorageError, StorageResult, TaskStore, UsageEntry,
    UserDirectory,
};
