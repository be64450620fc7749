//! In-memory storage used by tests and by ephemeral deployments that do not
//! want a database. Same trait surface as [`crate::SeaOrmStorage`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use taskgate_adaptor_core::{ChannelMeta, Task};

use crate::store::{
    AuthUser, ChannelDirectory, QuotaLedger, StorageResult, TaskStore, UsageEntry, UserDirectory,
};

#[derive(Debug, Clone)]
pub struct MemoryUser {
    pub auth: AuthUser,
    pub access_key: String,
}

#[derive(Default)]
pub struct MemoryStorage {
    users: Mutex<HashMap<i64, MemoryUser>>,
    channels: Mutex<HashMap<i64, ChannelMeta>>,
    tasks: Mutex<Vec<Task>>,
    usage: Mutex<Vec<UsageEntry>>,
    next_task_row: AtomicI64,
    task_writes: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: i64, access_key: &str, using_group: &str, quota: i64) {
        let mut users = self.users.lock().expect("memory storage lock poisoned");
        users.insert(
            id,
            MemoryUser {
                auth: AuthUser {
                    id,
                    name: format!("user-{id}"),
                    using_group: using_group.to_string(),
                    quota,
                    enabled: true,
                },
                access_key: access_key.to_string(),
            },
        );
    }

    pub fn add_channel(&self, meta: ChannelMeta) {
        self.channels.lock().expect("memory storage lock poisoned").insert(meta.id, meta);
    }

    pub fn remove_channel(&self, id: i64) {
        self.channels.lock().expect("memory storage lock poisoned").remove(&id);
    }

    pub fn usage_entries(&self) -> Vec<UsageEntry> {
        self.usage.lock().expect("memory storage lock poisoned").clone()
    }

    /// Number of task rewrites since construction. Inserts are not counted.
    pub fn task_write_count(&self) -> i64 {
        self.task_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for MemoryStorage {
    async fn insert_task(&self, task: &Task) -> StorageResult<i64> {
        let id = self.next_task_row.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = task.clone();
        stored.id = id;
        self.tasks.lock().expect("memory storage lock poisoned").push(stored);
        Ok(id)
    }

    async fn update_task(&self, task: &Task) -> StorageResult<()> {
        let mut tasks = self.tasks.lock().expect("memory storage lock poisoned");
        if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
            self.task_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get_task(&self, user_id: i64, task_id: &str) -> StorageResult<Option<Task>> {
        let tasks = self.tasks.lock().expect("memory storage lock poisoned");
        Ok(tasks
            .iter()
            .find(|t| t.user_id == user_id && t.task_id == task_id)
            .cloned())
    }

    async fn get_task_any_user(&self, task_id: &str) -> StorageResult<Option<Task>> {
        let tasks = self.tasks.lock().expect("memory storage lock poisoned");
        Ok(tasks.iter().find(|t| t.task_id == task_id).cloned())
    }

    async fn unfinished_tasks(&self, limit: u64) -> StorageResult<Vec<Task>> {
        let tasks = self.tasks.lock().expect("memory storage lock poisoned");
        let mut open: Vec<Task> = tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|t| t.submit_time);
        open.truncate(limit as usize);
        Ok(open)
    }
}

#[async_trait]
impl QuotaLedger for MemoryStorage {
    async fn balance(&self, user_id: i64) -> StorageResult<i64> {
        let users = self.users.lock().expect("memory storage lock poisoned");
        Ok(users.get(&user_id).map(|u| u.auth.quota).unwrap_or_default())
    }

    async fn try_consume(&self, user_id: i64, amount: i64) -> StorageResult<bool> {
        // Check and decrement under one lock acquisition.
        let mut users = self.users.lock().expect("memory storage lock poisoned");
        match users.get_mut(&user_id) {
            Some(user) if user.auth.quota >= amount => {
                user.auth.quota -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_unchecked(&self, user_id: i64, amount: i64) -> StorageResult<()> {
        let mut users = self.users.lock().expect("memory storage lock poisoned");
        if let Some(user) = users.get_mut(&user_id) {
            user.auth.quota -= amount;
        }
        Ok(())
    }

    async fn refund(&self, user_id: i64, amount: i64) -> StorageResult<()> {
        let mut users = self.users.lock().expect("memory storage lock poisoned");
        if let Some(user) = users.get_mut(&user_id) {
            user.auth.quota += amount;
        }
        Ok(())
    }

    async fn record_usage(&self, entry: &UsageEntry) -> StorageResult<()> {
        self.usage.lock().expect("memory storage lock poisoned").push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for MemoryStorage {
    async fn get_channel(&self, id: i64) -> StorageResult<Option<ChannelMeta>> {
        Ok(self.channels.lock().expect("memory storage lock poisoned").get(&id).cloned())
    }

    async fn enabled_channels(&self, platform: &str) -> StorageResult<Vec<ChannelMeta>> {
        let channels = self.channels.lock().expect("memory storage lock poisoned");
        let mut out: Vec<ChannelMeta> = channels
            .values()
            .filter(|c| c.enabled && c.platform == platform)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }
}

#[async_trait]
impl UserDirectory for MemoryStorage {
    async fn user_by_access_key(&self, access_key: &str) -> StorageResult<Option<AuthUser>> {
        let users = self.users.lock().expect("memory storage lock poisoned");
        Ok(users
            .values()
            .find(|u| u.access_key == access_key)
            .map(|u| u.auth.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consume_refuses_overdraw() {
        let store = MemoryStorage::new();
        store.add_user(1, "sk-test", "default", 100);
        assert!(store.try_consume(1, 60).await.unwrap());
        assert!(!store.try_consume(1, 60).await.unwrap());
        assert_eq!(store.balance(1).await.unwrap(), 40);
        store.refund(1, 60).await.unwrap();
        assert_eq!(store.balance(1).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn unfinished_excludes_terminal() {
        use taskgate_adaptor_core::TaskStatus;
        let store = MemoryStorage::new();
        let mut t = Task {
            user_id: 1,
            task_id: "a".to_string(),
            status: TaskStatus::InProgress,
            ..Default::default()
        };
        t.id = store.insert_task(&t).await.unwrap();
        let mut done = Task {
            user_id: 1,
            task_id: "b".to_string(),
            status: TaskStatus::Success,
            ..Default::default()
        };
        done.id = store.insert_task(&done).await.unwrap();
        let open = store.unfinished_tasks(10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].task_id, "a");
    }
}
