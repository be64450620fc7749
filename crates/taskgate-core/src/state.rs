use std::sync::Arc;

use taskgate_adaptor_core::{ChannelRegistry, UpstreamClient};
use taskgate_common::GlobalConfig;
use taskgate_storage::{ChannelDirectory, QuotaLedger, TaskStore, UserDirectory};

use crate::pricing::PricingTable;

/// Shared per-process state. Built once at bootstrap, cloned cheaply.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GlobalConfig>,
    pub registry: Arc<ChannelRegistry>,
    pub pricing: Arc<PricingTable>,
    pub client: Arc<dyn UpstreamClient>,
    pub tasks: Arc<dyn TaskStore>,
    pub ledger: Arc<dyn QuotaLedger>,
    pub channels: Arc<dyn ChannelDirectory>,
    pub users: Arc<dyn UserDirectory>,
}
