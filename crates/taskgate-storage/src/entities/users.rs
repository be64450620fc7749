use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: Option<String>,
    #[sea_orm(unique_key = "user_access_key")]
    pub access_key: String,
    pub using_group: String,
    /// Remaining balance in quota units.
    pub quota: i64,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub tasks: HasMany<super::tasks::Entity>,
    #[sea_orm(has_many)]
    pub usage_logs: HasMany<super::usage_logs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
