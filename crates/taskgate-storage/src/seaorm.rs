use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, ExprTrait, QueryFilter, QueryOrder,
    QuerySelect, Schema,
};
use time::OffsetDateTime;

use taskgate_adaptor_core::{ChannelMeta, Task, TaskStatus};

use crate::db::connect_shared;
use crate::entities;
use crate::store::{
    AuthUser, ChannelDirectory, QuotaLedger, StorageError, StorageResult, TaskStore, UsageEntry,
    UserDirectory,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = connect_shared(dsn).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync. Run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Users)
            .register(entities::Channels)
            .register(entities::Tasks)
            .register(entities::UsageLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    /// Seeds a user if no user with this access key exists. Returns the id.
    pub async fn ensure_user(
        &self,
        name: &str,
        access_key: &str,
        using_group: &str,
        quota: i64,
    ) -> StorageResult<i64> {
        use entities::users::Column;
        if let Some(existing) = entities::Users::find()
            .filter(Column::AccessKey.eq(access_key))
            .one(&self.db)
            .await?
        {
            return Ok(existing.id);
        }
        let now = OffsetDateTime::now_utc();
        let active = entities::users::ActiveModel {
            name: ActiveValue::Set(Some(name.to_string())),
            access_key: ActiveValue::Set(access_key.to_string()),
            using_group: ActiveValue::Set(using_group.to_string()),
            quota: ActiveValue::Set(quota),
            enabled: ActiveValue::Set(true),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let res = entities::Users::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }

    pub async fn upsert_channel(&self, meta: &ChannelMeta) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let mapping = if meta.model_mapping.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&meta.model_mapping)?)
        };
        let mut active = entities::channels::ActiveModel {
            platform: ActiveValue::Set(meta.platform.clone()),
            name: ActiveValue::Set(meta.name.clone()),
            base_url: ActiveValue::Set(meta.base_url.clone()),
            api_key: ActiveValue::Set(meta.api_key.clone()),
            enabled: ActiveValue::Set(meta.enabled),
            model_mapping: ActiveValue::Set(mapping),
            model_override: ActiveValue::Set(meta.model_override.clone()),
            passthrough: ActiveValue::Set(meta.passthrough),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        if meta.id > 0 {
            active.id = ActiveValue::Set(meta.id);
            active.created_at = ActiveValue::NotSet;
            entities::Channels::update(active).exec(&self.db).await?;
            return Ok(meta.id);
        }
        let res = entities::Channels::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }
}

fn channel_from_model(model: entities::channels::Model) -> StorageResult<ChannelMeta> {
    let model_mapping = match model.model_mapping {
        Some(value) => serde_json::from_value(value)?,
        None => Default::default(),
    };
    Ok(ChannelMeta {
        id: model.id,
        platform: model.platform,
        name: model.name,
        base_url: model.base_url,
        api_key: model.api_key,
        enabled: model.enabled,
        model_mapping,
        model_override: model.model_override,
        passthrough: model.passthrough,
    })
}

fn task_from_model(model: entities::tasks::Model) -> StorageResult<Task> {
    let status = TaskStatus::parse(&model.status)
        .ok_or_else(|| StorageError::Corrupt(format!("task status {:?}", model.status)))?;
    Ok(Task {
        id: model.id,
        user_id: model.user_id,
        channel_id: model.channel_id,
        platform: model.platform,
        action: model.action,
        task_id: model.task_id,
        status,
        progress: model.progress,
        fail_reason: model.fail_reason,
        result_ref: model.result_ref,
        quota: model.quota,
        submit_time: model.submit_time,
        start_time: model.start_time,
        finish_time: model.finish_time,
        data: model.data,
        properties: serde_json::from_value(model.properties)?,
        private_data: serde_json::from_value(model.private_data)?,
    })
}

fn task_to_active(
    task: &Task,
    now: OffsetDateTime,
) -> StorageResult<entities::tasks::ActiveModel> {
    Ok(entities::tasks::ActiveModel {
        user_id: ActiveValue::Set(task.user_id),
        channel_id: ActiveValue::Set(task.channel_id),
        platform: ActiveValue::Set(task.platform.clone()),
        action: ActiveValue::Set(task.action.clone()),
        task_id: ActiveValue::Set(task.task_id.clone()),
        status: ActiveValue::Set(task.status.as_str().to_string()),
        progress: ActiveValue::Set(task.progress.clone()),
        fail_reason: ActiveValue::Set(task.fail_reason.clone()),
        result_ref: ActiveValue::Set(task.result_ref.clone()),
        quota: ActiveValue::Set(task.quota),
        submit_time: ActiveValue::Set(task.submit_time),
        start_time: ActiveValue::Set(task.start_time),
        finish_time: ActiveValue::Set(task.finish_time),
        data: ActiveValue::Set(task.data.clone()),
        properties: ActiveValue::Set(serde_json::to_value(&task.properties)?),
        private_data: ActiveValue::Set(serde_json::to_value(&task.private_data)?),
        updated_at: ActiveValue::Set(now),
        ..Default::default()
    })
}

#[async_trait]
impl TaskStore for SeaOrmStorage {
    async fn insert_task(&self, task: &Task) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let mut active = task_to_active(task, now)?;
        active.created_at = ActiveValue::Set(now);
        let res = entities::Tasks::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }

    async fn update_task(&self, task: &Task) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut active = task_to_active(task, now)?;
        active.id = ActiveValue::Set(task.id);
        entities::Tasks::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn get_task(&self, user_id: i64, task_id: &str) -> StorageResult<Option<Task>> {
        use entities::tasks::Column;
        let model = entities::Tasks::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::TaskId.eq(task_id))
            .one(&self.db)
            .await?;
        model.map(task_from_model).transpose()
    }

    async fn get_task_any_user(&self, task_id: &str) -> StorageResult<Option<Task>> {
        use entities::tasks::Column;
        let model = entities::Tasks::find()
            .filter(Column::TaskId.eq(task_id))
            .one(&self.db)
            .await?;
        model.map(task_from_model).transpose()
    }

    async fn unfinished_tasks(&self, limit: u64) -> StorageResult<Vec<Task>> {
        use entities::tasks::Column;
        let models = entities::Tasks::find()
            .filter(Column::Status.is_in(vec![
                TaskStatus::NotStart.as_str(),
                TaskStatus::Submitted.as_str(),
                TaskStatus::Queued.as_str(),
                TaskStatus::InProgress.as_str(),
            ]))
            .order_by_asc(Column::SubmitTime)
            .limit(limit)
            .all(&self.db)
            .await?;
        models.into_iter().map(task_from_model).collect()
    }
}

#[async_trait]
impl QuotaLedger for SeaOrmStorage {
    async fn balance(&self, user_id: i64) -> StorageResult<i64> {
        let model = entities::Users::find_by_id(user_id).one(&self.db).await?;
        Ok(model.map(|m| m.quota).unwrap_or_default())
    }

    async fn try_consume(&self, user_id: i64, amount: i64) -> StorageResult<bool> {
        use entities::users::Column;
        // Single conditional UPDATE; concurrent submits cannot overdraw.
        let res = entities::Users::update_many()
            .col_expr(Column::Quota, Expr::col(Column::Quota).sub(amount))
            .filter(Column::Id.eq(user_id))
            .filter(Column::Quota.gte(amount))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn consume_unchecked(&self, user_id: i64, amount: i64) -> StorageResult<()> {
        use entities::users::Column;
        entities::Users::update_many()
            .col_expr(Column::Quota, Expr::col(Column::Quota).sub(amount))
            .filter(Column::Id.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn refund(&self, user_id: i64, amount: i64) -> StorageResult<()> {
        use entities::users::Column;
        entities::Users::update_many()
            .col_expr(Column::Quota, Expr::col(Column::Quota).add(amount))
            .filter(Column::Id.eq(user_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn record_usage(&self, entry: &UsageEntry) -> StorageResult<()> {
        let active = entities::usage_logs::ActiveModel {
            user_id: ActiveValue::Set(entry.user_id),
            model: ActiveValue::Set(entry.model.clone()),
            action: ActiveValue::Set(entry.action.clone()),
            quota: ActiveValue::Set(entry.quota),
            prompt_tokens: ActiveValue::Set(entry.prompt_tokens),
            completion_tokens: ActiveValue::Set(entry.completion_tokens),
            detail: ActiveValue::Set(entry.detail.clone()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::UsageLogs::insert(active).exec(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for SeaOrmStorage {
    async fn get_channel(&self, id: i64) -> StorageResult<Option<ChannelMeta>> {
        let model = entities::Channels::find_by_id(id).one(&self.db).await?;
        model.map(channel_from_model).transpose()
    }

    async fn enabled_channels(&self, platform: &str) -> StorageResult<Vec<ChannelMeta>> {
        use entities::channels::Column;
        let models = entities::Channels::find()
            .filter(Column::Platform.eq(platform))
            .filter(Column::Enabled.eq(true))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        models.into_iter().map(channel_from_model).collect()
    }
}

#[async_trait]
impl UserDirectory for SeaOrmStorage {
    async fn user_by_access_key(&self, access_key: &str) -> StorageResult<Option<AuthUser>> {
        use entities::users::Column;
        let model = entities::Users::find()
            .filter(Column::AccessKey.eq(access_key))
            .one(&self.db)
            .await?;
        Ok(model.map(|m| AuthUser {
            id: m.id,
            name: m.name.unwrap_or_default(),
            using_group: m.using_group,
            quota: m.quota,
            enabled: m.enabled,
        }))
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;

    use super::*;

    async fn sqlite_store() -> SeaOrmStorage {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("sqlite in-memory connect");
        let store = SeaOrmStorage::from_connection(db);
        store.sync().await.expect("schema sync");
        store
    }

    #[tokio::test]
    async fn conditional_consume_never_overdraws() {
        let store = sqlite_store().await;
        let id = store
            .ensure_user("tester", "sk-t", "default", 100)
            .await
            .unwrap();
        assert!(store.try_consume(id, 60).await.unwrap());
        assert!(!store.try_consume(id, 60).await.unwrap());
        assert_eq!(store.balance(id).await.unwrap(), 40);
        store.refund(id, 60).await.unwrap();
        assert_eq!(store.balance(id).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn unchecked_consume_may_go_negative() {
        let store = sqlite_store().await;
        let id = store
            .ensure_user("tester", "sk-t", "default", 10)
            .await
            .unwrap();
        store.consume_unchecked(id, 50).await.unwrap();
        assert_eq!(store.balance(id).await.unwrap(), -40);
    }

    #[tokio::test]
    async fn usage_rows_are_appended() {
        let store = sqlite_store().await;
        let id = store
            .ensure_user("tester", "sk-t", "default", 100)
            .await
            .unwrap();
        store
            .record_usage(&UsageEntry {
                user_id: id,
                model: "sora-2".to_string(),
                action: "generate".to_string(),
                quota: 500,
                detail: "ratio 0.001".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let rows = entities::UsageLogs::find()
            .all(store.connection())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quota, 500);
        assert_eq!(rows[0].model, "sora-2");
    }
}
