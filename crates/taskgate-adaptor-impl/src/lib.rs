//! Built-in provider adaptors.
//!
//! Each provider is a flat struct implementing `Adaptor`, `TaskAdaptor`, or
//! both. This crate performs no network IO of its own; adaptors build
//! `UpstreamHttpRequest` values and translate bodies, and the shared client
//! executes them.

mod grs;
mod kie;
mod openai;
mod sora;

use std::sync::Arc;

use taskgate_adaptor_core::ChannelRegistry;

pub use grs::GrsAdaptor;
pub use kie::KieAdaptor;
pub use openai::OpenAIAdaptor;
pub use sora::SoraAdaptor;

pub fn build_registry() -> ChannelRegistry {
    let mut registry = ChannelRegistry::new();
    registry.register_sync(Arc::new(OpenAIAdaptor::default()));
    registry.register_task(Arc::new(SoraAdaptor));
    registry.register_task(Arc::new(GrsAdaptor));
    registry.register_task(Arc::new(KieAdaptor::default()));
    registry
}
