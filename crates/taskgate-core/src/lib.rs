//! Relay dispatcher and task orchestrator.
//!
//! This crate drives the provider contracts from `taskgate-adaptor-core`
//! against the persistence traits from `taskgate-storage`. It owns pricing,
//! quota settlement, channel selection and failover, and the background
//! sweep. It has no HTTP server surface of its own.

pub mod auth;
pub mod dispatch;
pub mod orchestrator;
pub mod pricing;
pub mod select;
pub mod state;
pub mod upstream_client;

pub use dispatch::{SyncRelayOutput, relay_sync};
pub use orchestrator::{FetchOutput, SubmitOutput, fetch_task, submit_task, sweep_once};
pub use pricing::PricingTable;
pub use state::AppState;
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
