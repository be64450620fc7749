use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "task_user_platform")]
    pub user_id: i64,
    pub channel_id: i64,
    #[sea_orm(unique_key = "task_user_platform")]
    pub platform: String,
    pub action: String,
    /// Provider-issued identifier.
    #[sea_orm(unique_key = "task_user_platform")]
    pub task_id: String,
    pub status: String,
    pub progress: String,
    #[sea_orm(column_type = "Text")]
    pub fail_reason: String,
    #[sea_orm(column_type = "Text")]
    pub result_ref: String,
    pub quota: i64,
    pub submit_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    /// Raw provider blob from the most recent poll.
    pub data: Json,
    pub properties: Json,
    pub private_data: Json,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
    #[sea_orm(belongs_to, from = "channel_id", to = "id")]
    pub channel: HasOne<super::channels::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
