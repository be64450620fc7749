use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const VIDEO_STATUS_QUEUED: &str = "queued";
pub const VIDEO_STATUS_IN_PROGRESS: &str = "in_progress";
pub const VIDEO_STATUS_COMPLETED: &str = "completed";
pub const VIDEO_STATUS_FAILED: &str = "failed";
pub const VIDEO_STATUS_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoError {
    pub message: String,
    pub code: String,
}

/// Public video-job object on the `/v1/videos` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIVideo {
    pub id: String,
    pub object: String,
    pub status: String,
    pub progress: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seconds: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VideoError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl OpenAIVideo {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            object: "video".to_string(),
            status: VIDEO_STATUS_QUEUED.to_string(),
            progress: 0,
            created_at,
            completed_at: None,
            model: String::new(),
            seconds: String::new(),
            size: String::new(),
            error: None,
            metadata: None,
        }
    }

    /// Parses a "42%" progress string; anything unparsable is ignored so a
    /// garbled provider value cannot zero out a previously known progress.
    pub fn set_progress_str(&mut self, progress: &str) {
        let trimmed = progress.trim().trim_end_matches('%');
        if let Ok(value) = trimmed.parse::<u32>() {
            self.progress = value.min(100);
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
    }
}
