use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use taskgate_adaptor_core::{
    AdaptorError, ChannelMeta, Headers, HttpMethod, RelayError, RelayInfo, RelayResult, SubmitAck,
    Task, TaskAdaptor, TaskInfo, TaskStatus, UpstreamHttpRequest, auth_header_for, header_set,
    size_ratio, status_from_provider,
};
use taskgate_protocol::{OpenAIVideo, TaskSubmitRequest, VideoError};

/// OpenAI-compatible video provider: POST to create the job, GET to poll it,
/// video object in and out.
pub struct SoraAdaptor;

const PLATFORM: &str = "sora";

#[async_trait]
impl TaskAdaptor for SoraAdaptor {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn validate_request(
        &self,
        info: &mut RelayInfo,
        raw: &[u8],
    ) -> Result<TaskSubmitRequest, AdaptorError> {
        let req = TaskSubmitRequest::from_json(raw)
            .map_err(|err| AdaptorError::Other(format!("invalid submit request: {err}")))?;
        if req.prompt.is_empty() {
            return Err(AdaptorError::Other("prompt is required".to_string()));
        }
        if req.model.is_empty() {
            return Err(AdaptorError::Other("model is required".to_string()));
        }
        info.action = if req.has_image() {
            "remix".to_string()
        } else {
            "generate".to_string()
        };
        info.price_data
            .set_ratio("seconds", f64::from(req.seconds_value()));
        info.price_data.set_ratio("size", size_ratio(&req.size));
        Ok(req)
    }

    fn build_submit(
        &self,
        info: &RelayInfo,
        req: &TaskSubmitRequest,
    ) -> Result<UpstreamHttpRequest, AdaptorError> {
        let url = format!("{}/v1/videos", info.channel.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": info.resolved_model(),
            "prompt": req.prompt,
        });
        if let Some(seconds) = req.requested_seconds() {
            body["seconds"] = Value::String(seconds);
        }
        if !req.size.is_empty() {
            body["size"] = Value::String(req.size.clone());
        }
        let references = req.reference_urls();
        if let Some(first) = references.first() {
            body["input_reference"] = Value::String(first.clone());
        }
        let mut headers = Headers::new();
        header_set(
            &mut headers,
            "Authorization",
            &auth_header_for(&info.channel.platform, &info.channel.api_key),
        );
        header_set(&mut headers, "Content-Type", "application/json");
        Ok(UpstreamHttpRequest::post(
            url,
            headers,
            Some(Bytes::from(body.to_string())),
        ))
    }

    fn parse_submit_response(&self, body: &Bytes) -> RelayResult<SubmitAck> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("submit response: {err}")))?;
        let task_id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if task_id.is_empty() {
            return Err(RelayError::response_parse("submit response has no id"));
        }
        Ok(SubmitAck {
            task_id,
            raw: body.clone(),
        })
    }

    fn fetch_task(
        &self,
        channel: &ChannelMeta,
        task_id: &str,
    ) -> Result<UpstreamHttpRequest, AdaptorError> {
        let url = format!(
            "{}/v1/videos/{task_id}",
            channel.base_url.trim_end_matches('/')
        );
        let mut headers = Headers::new();
        header_set(
            &mut headers,
            "Authorization",
            &auth_header_for(&channel.platform, &channel.api_key),
        );
        Ok(UpstreamHttpRequest {
            method: HttpMethod::Get,
            url,
            headers,
            body: None,
        })
    }

    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("poll response: {err}")))?;
        let status_str = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut out = TaskInfo {
            status: status_from_provider(status_str),
            ..Default::default()
        };
        match value.get("progress") {
            Some(Value::Number(n)) => out.progress = Some(format!("{}%", n)),
            Some(Value::String(s)) if !s.is_empty() => out.progress = Some(s.clone()),
            _ => {}
        }
        if let Some(url) = value.get("url").and_then(Value::as_str) {
            out.url = Some(url.to_string());
        }
        if let Some(remote) = value.get("remote_url").and_then(Value::as_str) {
            out.remote_url = Some(remote.to_string());
        }
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(Value::as_str)
        {
            out.reason = Some(message.to_string());
        }
        Ok(out)
    }

    fn render_video(&self, task: &Task) -> Result<Bytes, AdaptorError> {
        let mut video = OpenAIVideo::new(task.task_id.clone(), task.submit_time);
        video.status = task.status.to_video_status().to_string();
        video.set_progress_str(&task.progress);
        if let Some(model) = task.properties.model.as_deref() {
            video.model = model.to_string();
        }
        if let Some(seconds) = task.properties.seconds.as_deref() {
            video.seconds = seconds.to_string();
        }
        if let Some(size) = task.properties.size.as_deref() {
            video.size = size.to_string();
        }
        if task.finish_time > 0 {
            video.completed_at = Some(task.finish_time);
        }
        match task.status {
            TaskStatus::Failure => {
                video.error = Some(VideoError {
                    message: task.fail_reason.clone(),
                    code: "task_failed".to_string(),
                });
            }
            TaskStatus::Success if !task.result_ref.is_empty() => {
                video.set_metadata("url", task.result_ref.clone());
            }
            _ => {}
        }
        serde_json::to_vec(&video)
            .map(Bytes::from)
            .map_err(|err| AdaptorError::Other(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RelayInfo {
        RelayInfo::new(
            ChannelMeta {
                id: 7,
                platform: PLATFORM.to_string(),
                base_url: "https://api.example.com/".to_string(),
                api_key: "sk-up".to_string(),
                enabled: true,
                ..Default::default()
            },
            "sora-2",
        )
    }

    #[test]
    fn validate_sets_pricing_ratios() {
        let adaptor = SoraAdaptor;
        let mut info = info();
        let req = adaptor
            .validate_request(
                &mut info,
                br#"{"model":"sora-2","prompt":"a cat","seconds":"10","size":"720x1280"}"#,
            )
            .unwrap();
        assert_eq!(req.seconds, "10");
        assert_eq!(info.price_data.other_ratios.get("seconds"), Some(&10.0));
        assert_eq!(info.price_data.other_ratios.get("size"), Some(&1.0));
    }

    #[test]
    fn validate_rejects_empty_prompt() {
        let adaptor = SoraAdaptor;
        let mut info = info();
        assert!(
            adaptor
                .validate_request(&mut info, br#"{"model":"sora-2"}"#)
                .is_err()
        );
    }

    #[test]
    fn submit_hits_videos_endpoint_with_bearer_key() {
        let adaptor = SoraAdaptor;
        let info = info();
        let req = TaskSubmitRequest::from_json(br#"{"model":"sora-2","prompt":"a cat"}"#).unwrap();
        let upstream = adaptor.build_submit(&info, &req).unwrap();
        assert_eq!(upstream.url, "https://api.example.com/v1/videos");
        let auth = upstream
            .headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .map(|(_, v)| v.clone());
        assert_eq!(auth.as_deref(), Some("Bearer sk-up"));
    }

    #[test]
    fn poll_auth_scheme_follows_the_channel_type() {
        // A continuation may leave the task on a channel of another family;
        // the raw-key families must not receive a bearer prefix.
        let adaptor = SoraAdaptor;
        let channel = ChannelMeta {
            id: 3,
            platform: "grs".to_string(),
            base_url: "https://other.example".to_string(),
            api_key: "raw-key-1".to_string(),
            enabled: true,
            ..Default::default()
        };
        let upstream = adaptor.fetch_task(&channel, "video_1").unwrap();
        let auth = upstream
            .headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .map(|(_, v)| v.clone());
        assert_eq!(auth.as_deref(), Some("raw-key-1"));
    }

    #[test]
    fn poll_parse_is_total_on_unknown_status() {
        let adaptor = SoraAdaptor;
        let out = adaptor
            .parse_task_result(br#"{"id":"v_1","status":"warming-up"}"#)
            .unwrap();
        assert_eq!(out.status, TaskStatus::InProgress);
    }

    #[test]
    fn poll_parse_extracts_failure_reason() {
        let adaptor = SoraAdaptor;
        let out = adaptor
            .parse_task_result(
                br#"{"id":"v_1","status":"failed","error":{"message":"nsfw content"}}"#,
            )
            .unwrap();
        assert_eq!(out.status, TaskStatus::Failure);
        assert_eq!(out.reason.as_deref(), Some("nsfw content"));
    }

    #[test]
    fn missing_submit_id_is_fatal() {
        let adaptor = SoraAdaptor;
        let err = adaptor
            .parse_submit_response(&Bytes::from_static(b"{\"object\":\"video\"}"))
            .unwrap_err();
        assert_eq!(err.client_code(), "bad_response");
    }
}
