use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::info::RelayInfo;

/// Lifecycle of an asynchronous task as stored and served to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStart,
    Submitted,
    Queued,
    InProgress,
    Success,
    Failure,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStart => "NOT_START",
            TaskStatus::Submitted => "SUBMITTED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Unknown
        )
    }

    /// Parses the stored database representation.
    pub fn parse(s: &str) -> Option<TaskStatus> {
        Some(match s {
            "NOT_START" => TaskStatus::NotStart,
            "SUBMITTED" => TaskStatus::Submitted,
            "QUEUED" => TaskStatus::Queued,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "SUCCESS" => TaskStatus::Success,
            "FAILURE" => TaskStatus::Failure,
            "UNKNOWN" => TaskStatus::Unknown,
            _ => return None,
        })
    }

    /// Maps to the OpenAI video object status vocabulary.
    pub fn to_video_status(self) -> &'static str {
        match self {
            TaskStatus::NotStart | TaskStatus::Submitted | TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Success => "completed",
            TaskStatus::Failure => "failed",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::NotStart
    }
}

/// Normalizes a provider's free-form status string. Anything unrecognized is
/// treated as still running so a provider adding states never flips a live
/// task into a terminal one.
pub fn status_from_provider(raw: &str) -> TaskStatus {
    match raw.to_ascii_lowercase().as_str() {
        "queued" | "pending" | "waiting" => TaskStatus::Queued,
        "submitted" => TaskStatus::Submitted,
        "processing" | "in_progress" | "running" | "generating" => TaskStatus::InProgress,
        "completed" | "succeeded" | "success" | "finished" => TaskStatus::Success,
        "failed" | "fail" | "error" | "cancelled" | "canceled" => TaskStatus::Failure,
        _ => TaskStatus::InProgress,
    }
}

/// Normalized poll result a TaskAdaptor hands back to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct TaskInfo {
    pub status: TaskStatus,
    /// Percentage string like "42%" when the provider reports one.
    pub progress: Option<String>,
    /// Provider-hosted result location.
    pub url: Option<String>,
    /// CDN or re-hosted result location; preferred over `url`.
    pub remote_url: Option<String>,
    /// Failure reason for FAILURE, or a result carrier for providers that
    /// report the output location through the same field.
    pub reason: Option<String>,
}

/// Operator-only bookkeeping attached to a task record. Never rendered into
/// client-facing responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPrivateData {
    #[serde(default)]
    pub consumed_quota: i64,
    #[serde(default)]
    pub model_price: f64,
    #[serde(default)]
    pub group_ratio: f64,
    #[serde(default)]
    pub other_ratios: BTreeMap<String, f64>,
    /// Submit-time channel endpoint, kept so polling can resume after the
    /// channel row is deleted or reconfigured.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Channel type of the submitting channel; decides the resumed
    /// authorization scheme.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_type: String,
}

/// Request-shape details captured at submit time, replayed on continuation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProperties {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub seconds: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub input_images: Vec<String>,
}

/// A stored asynchronous task.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: i64,
    pub platform: String,
    pub action: String,
    /// Provider-issued identifier, unique per (user, platform).
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: String,
    pub fail_reason: String,
    /// Final artifact location once the task succeeds.
    pub result_ref: String,
    pub quota: i64,
    pub submit_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    /// Raw provider response blob from the most recent poll.
    pub data: Value,
    pub properties: TaskProperties,
    pub private_data: TaskPrivateData,
}

impl Task {
    pub fn init(platform: &str, info: &RelayInfo, now: OffsetDateTime) -> Self {
        Task {
            user_id: info.user_id,
            channel_id: info.channel.id,
            platform: platform.to_string(),
            action: info.action.clone(),
            status: TaskStatus::NotStart,
            submit_time: now.unix_timestamp(),
            data: Value::Null,
            ..Default::default()
        }
    }

    /// Folds one poll result into the record. Terminal tasks are immutable;
    /// callers may poll a finished task but the snapshot never changes.
    pub fn apply_poll(&mut self, info: &TaskInfo, now: OffsetDateTime) {
        if self.status.is_terminal() {
            return;
        }
        let was_running = self.status == TaskStatus::InProgress;
        self.status = info.status;
        if let Some(p) = info.progress.as_deref() {
            if !p.is_empty() {
                self.progress = p.to_string();
            }
        }
        match info.status {
            TaskStatus::InProgress => {
                if !was_running && self.start_time == 0 {
                    self.start_time = now.unix_timestamp();
                }
            }
            TaskStatus::Success => {
                self.progress = "100%".to_string();
                self.finish_time = now.unix_timestamp();
                self.result_ref = self.pick_result_ref(info);
            }
            TaskStatus::Failure => {
                self.finish_time = now.unix_timestamp();
                if let Some(reason) = info.reason.as_deref() {
                    self.fail_reason = reason.to_string();
                }
            }
            _ => {}
        }
    }

    /// Fallback chain for the artifact location: the poll's reason field
    /// (some providers carry the URL there), then remote_url, then url, and
    /// finally whatever the stored raw blob recorded.
    fn pick_result_ref(&self, info: &TaskInfo) -> String {
        if let Some(reason) = info.reason.as_deref() {
            if looks_like_url(reason) {
                return reason.to_string();
            }
        }
        if let Some(remote) = info.remote_url.as_deref() {
            if !remote.is_empty() {
                return remote.to_string();
            }
        }
        if let Some(url) = info.url.as_deref() {
            if !url.is_empty() {
                return url.to_string();
            }
        }
        self.recover_result_from_data()
    }

    /// Last-resort recovery from the stored provider blob:
    /// data.remote_url, data.transfer_url, data.url in that order.
    fn recover_result_from_data(&self) -> String {
        let Some(data) = self.data.get("data") else {
            return String::new();
        };
        for key in ["remote_url", "transfer_url", "url"] {
            if let Some(v) = data.get(key).and_then(Value::as_str) {
                if !v.is_empty() {
                    return v.to_string();
                }
            }
        }
        String::new()
    }
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn provider_status_normalization_is_total() {
        assert_eq!(status_from_provider("queued"), TaskStatus::Queued);
        assert_eq!(status_from_provider("SUCCESS"), TaskStatus::Success);
        assert_eq!(status_from_provider("cancelled"), TaskStatus::Failure);
        // Never seen before: treated as still running, never terminal.
        assert_eq!(status_from_provider("warming-up"), TaskStatus::InProgress);
        assert_eq!(status_from_provider(""), TaskStatus::InProgress);
    }

    #[test]
    fn terminal_tasks_ignore_further_polls() {
        let mut task = Task {
            status: TaskStatus::Success,
            result_ref: "https://cdn.example/final.mp4".to_string(),
            progress: "100%".to_string(),
            ..Default::default()
        };
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::Failure,
                reason: Some("late failure".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.result_ref, "https://cdn.example/final.mp4");
        assert!(task.fail_reason.is_empty());
    }

    #[test]
    fn success_prefers_reason_url_then_remote_then_url() {
        let mut task = Task::default();
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::Success,
                reason: Some("https://a.example/out.mp4".to_string()),
                remote_url: Some("https://b.example/out.mp4".to_string()),
                url: Some("https://c.example/out.mp4".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.result_ref, "https://a.example/out.mp4");
        assert_eq!(task.progress, "100%");

        let mut task = Task::default();
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::Success,
                remote_url: Some("https://b.example/out.mp4".to_string()),
                url: Some("https://c.example/out.mp4".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.result_ref, "https://b.example/out.mp4");
    }

    #[test]
    fn success_recovers_result_from_stored_blob() {
        let mut task = Task {
            data: serde_json::json!({
                "data": {"transfer_url": "https://cdn.example/v.mp4"}
            }),
            ..Default::default()
        };
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::Success,
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.result_ref, "https://cdn.example/v.mp4");
    }

    #[test]
    fn failure_records_reason_and_finish_time() {
        let mut task = Task::default();
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::Failure,
                reason: Some("content policy".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.status, TaskStatus::Failure);
        assert_eq!(task.fail_reason, "content policy");
        assert_eq!(task.finish_time, now().unix_timestamp());
    }

    #[test]
    fn progress_keeps_last_value_when_poll_omits_it() {
        let mut task = Task::default();
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::InProgress,
                progress: Some("40%".to_string()),
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.progress, "40%");
        task.apply_poll(
            &TaskInfo {
                status: TaskStatus::InProgress,
                ..Default::default()
            },
            now(),
        );
        assert_eq!(task.progress, "40%");
    }
}
