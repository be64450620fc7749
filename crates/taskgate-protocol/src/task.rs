use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound job submission. Form submissions and JSON submissions are both
/// folded into this one field set; JSON bodies that nest their parameters
/// under an `input` object are flattened first so downstream code only ever
/// sees one shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmitRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    /// Requested duration as the client sent it ("10"), echoed back verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seconds: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: u32,
    /// Reference image(s): a single URL string or an array of URL strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_reference: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TaskSubmitRequest {
    /// Parses a JSON body, flattening a nested `input` object into the
    /// top-level field set first.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_slice(body)?;
        if let Some(obj) = value.as_object_mut() {
            if let Some(Value::Object(input)) = obj.remove("input") {
                for (key, inner) in input {
                    obj.entry(key).or_insert(inner);
                }
            }
        }
        serde_json::from_value(value)
    }

    /// Builds a request from decoded form fields. Repeated `images` /
    /// `input_reference` keys accumulate; unknown keys land in `metadata`.
    pub fn from_form_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut req = Self::default();
        let mut references: Vec<Value> = Vec::new();
        for (key, value) in pairs {
            match key {
                "prompt" => req.prompt = value.to_string(),
                "model" => req.model = value.to_string(),
                "mode" => req.mode = value.to_string(),
                "image" => req.image = value.to_string(),
                "images" => req.images.push(value.to_string()),
                "size" => req.size = value.to_string(),
                "seconds" => req.seconds = value.to_string(),
                "duration" => req.duration = value.parse().unwrap_or(0),
                "input_reference" => references.push(Value::String(value.to_string())),
                _ => {
                    let parsed = value
                        .parse::<i64>()
                        .map(Value::from)
                        .or_else(|_| value.parse::<f64>().map(Value::from))
                        .unwrap_or_else(|_| Value::String(value.to_string()));
                    req.metadata.insert(key.to_string(), parsed);
                }
            }
        }
        match references.len() {
            0 => {}
            1 => req.input_reference = references.pop(),
            _ => req.input_reference = Some(Value::Array(references)),
        }
        req
    }

    /// The duration the client asked for, as a string; `None` when neither
    /// `seconds` nor `duration` was supplied.
    pub fn requested_seconds(&self) -> Option<String> {
        if !self.seconds.is_empty() {
            return Some(self.seconds.clone());
        }
        if self.duration > 0 {
            return Some(self.duration.to_string());
        }
        None
    }

    pub fn seconds_value(&self) -> u32 {
        if let Ok(parsed) = self.seconds.parse::<u32>() {
            if parsed > 0 {
                return parsed;
            }
        }
        self.duration
    }

    /// All reference image URLs, whichever field carried them.
    pub fn reference_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        match &self.input_reference {
            Some(Value::String(url)) if !url.trim().is_empty() => {
                urls.push(url.trim().trim_matches('`').to_string());
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::String(url) = item {
                        let cleaned = url.trim().trim_matches('`');
                        if !cleaned.is_empty() {
                            urls.push(cleaned.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
        if urls.is_empty() {
            if !self.image.trim().is_empty() {
                urls.push(self.image.trim().to_string());
            }
            urls.extend(self.images.iter().filter(|s| !s.trim().is_empty()).cloned());
        }
        urls
    }

    pub fn has_image(&self) -> bool {
        !self.reference_urls().is_empty()
    }
}

/// Submission acknowledgment on the legacy surface: `{code, msg, data:{id}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEnvelope {
    pub code: i32,
    pub msg: String,
    pub data: SubmitAckData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAckData {
    pub id: String,
}

impl SubmitEnvelope {
    pub fn success(task_id: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: "success".to_string(),
            data: SubmitAckData { id: task_id.into() },
        }
    }
}

/// Fetch envelope on the legacy surface: `{code:"success", data:...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope<T> {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> TaskEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "success".to_string(),
            message: None,
            data: Some(data),
        }
    }
}

/// Client-visible task snapshot. On success the result location is written
/// through the `fail_reason` key for compatibility with existing consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDto {
    pub task_id: String,
    pub action: String,
    pub status: String,
    pub fail_reason: String,
    pub submit_time: i64,
    pub start_time: i64,
    pub finish_time: i64,
    pub progress: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_submission_flattens_nested_input() {
        let body = br#"{"model":"sora-2","input":{"prompt":"a cat","input_reference":"http://x/1.jpg"},"seconds":"10"}"#;
        let req = TaskSubmitRequest::from_json(body).unwrap();
        assert_eq!(req.model, "sora-2");
        assert_eq!(req.prompt, "a cat");
        assert_eq!(req.seconds, "10");
        assert_eq!(req.reference_urls(), vec!["http://x/1.jpg".to_string()]);
    }

    #[test]
    fn form_pairs_accumulate_references_and_metadata() {
        let req = TaskSubmitRequest::from_form_pairs([
            ("prompt", "a dog"),
            ("model", "sora-2"),
            ("input_reference", "http://x/1.jpg"),
            ("input_reference", "http://x/2.jpg"),
            ("watermark", "1"),
        ]);
        assert_eq!(req.reference_urls().len(), 2);
        assert_eq!(req.metadata.get("watermark"), Some(&Value::from(1)));
    }

    #[test]
    fn requested_seconds_prefers_explicit_string() {
        let req = TaskSubmitRequest {
            seconds: "10".to_string(),
            duration: 4,
            ..Default::default()
        };
        assert_eq!(req.requested_seconds().as_deref(), Some("10"));

        let req = TaskSubmitRequest {
            duration: 8,
            ..Default::default()
        };
        assert_eq!(req.requested_seconds().as_deref(), Some("8"));
        assert_eq!(TaskSubmitRequest::default().requested_seconds(), None);
    }
}
