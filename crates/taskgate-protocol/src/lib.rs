//! Canonical (OpenAI-compatible) wire types for taskgate.
//!
//! This crate is pure data: serde DTOs for the client-facing surface and the
//! task submission/fetch envelopes. It performs no IO and holds no policy.

pub mod openai;
pub mod task;
pub mod usage;

pub use openai::chat::{ChatChoice, ChatMessage, CreateChatCompletionRequest, CreateChatCompletionResponse};
pub use openai::image::{CreateImageRequest, ImageData, ImageResponse};
pub use openai::video::{OpenAIVideo, VideoError};
pub use task::{SubmitAckData, SubmitEnvelope, TaskDto, TaskEnvelope, TaskSubmitRequest};
pub use usage::Usage;
