use std::collections::HashMap;
use std::sync::Arc;

use crate::adaptor::{Adaptor, TaskAdaptor};

/// Immutable lookup table from platform key to adaptor instance. Built once
/// at startup and shared behind `Arc`.
#[derive(Default)]
pub struct ChannelRegistry {
    sync: HashMap<&'static str, Arc<dyn Adaptor>>,
    task: HashMap<&'static str, Arc<dyn TaskAdaptor>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sync(&mut self, adaptor: Arc<dyn Adaptor>) {
        self.sync.insert(adaptor.platform(), adaptor);
    }

    pub fn register_task(&mut self, adaptor: Arc<dyn TaskAdaptor>) {
        self.task.insert(adaptor.platform(), adaptor);
    }

    pub fn sync(&self, platform: &str) -> Option<Arc<dyn Adaptor>> {
        self.sync.get(platform).cloned()
    }

    pub fn task(&self, platform: &str) -> Option<Arc<dyn TaskAdaptor>> {
        self.task.get(platform).cloned()
    }

    pub fn task_platforms(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.task.keys().copied()
    }
}
