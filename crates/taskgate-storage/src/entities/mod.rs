pub mod channels;
pub mod tasks;
pub mod usage_logs;
pub mod users;

pub use channels::Entity as Channels;
pub use tasks::Entity as Tasks;
pub use usage_logs::Entity as UsageLogs;
pub use users::Entity as Users;
