use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use taskgate_adaptor_core::{
    AdaptorError, ChannelMeta, Headers, RelayError, RelayInfo, RelayResult, SubmitAck, TaskAdaptor,
    TaskInfo, UpstreamHttpRequest, auth_header_for, header_set, size_ratio, status_from_provider,
};
use taskgate_protocol::TaskSubmitRequest;

/// Generic `{code, msg, data}` envelope provider. Submits and polls with
/// POST; the raw key goes into the authorization header without a bearer
/// prefix.
pub struct GrsAdaptor;

const PLATFORM: &str = "grs";

fn headers_for(platform: &str, api_key: &str) -> Headers {
    let mut headers = Headers::new();
    header_set(
        &mut headers,
        "Authorization",
        &auth_header_for(platform, api_key),
    );
    header_set(&mut headers, "Content-Type", "application/json");
    headers
}

fn envelope_ok(value: &Value) -> bool {
    match value.get("code") {
        Some(Value::String(code)) => code == "success" || code == "0",
        Some(Value::Number(code)) => code.as_i64() == Some(0),
        _ => false,
    }
}

#[async_trait]
impl TaskAdaptor for GrsAdaptor {
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
        info.action = "generate".to_string();
        if req.seconds_value() > 0 {
            info.price_data
                .set_ratio("seconds", f64::from(req.seconds_value()));
        }
        info.price_data.set_ratio("size", size_ratio(&req.size));
        Ok(req)
    }

    fn build_submit(
        &self,
        info: &RelayInfo,
        req: &TaskSubmitRequest,
    ) -> Result<UpstreamHttpRequest, AdaptorError> {
        let url = format!(
            "{}/api/v1/task/submit",
            info.channel.base_url.trim_end_matches('/')
        );
        let mut body = json!({
            "model": info.resolved_model(),
            "prompt": req.prompt,
        });
        if !req.mode.is_empty() {
            body["mode"] = Value::String(req.mode.clone());
        }
        let references = req.reference_urls();
        if !references.is_empty() {
            body["images"] = json!(references);
        }
        Ok(UpstreamHttpRequest::post(
            url,
            headers_for(&info.channel.platform, &info.channel.api_key),
            Some(Bytes::from(body.to_string())),
        ))
    }

    fn parse_submit_response(&self, body: &Bytes) -> RelayResult<SubmitAck> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("submit response: {err}")))?;
        if !envelope_ok(&value) {
            let msg = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("submit rejected");
            return Err(RelayError::response_parse(format!(
                "submit envelope: {msg}"
            )));
        }
        let task_id = value
            .pointer("/data/task_id")
            .or_else(|| value.pointer("/data/id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if task_id.is_empty() {
            return Err(RelayError::response_parse("submit response has no task id"));
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
            "{}/api/v1/task/fetch",
            channel.base_url.trim_end_matches('/')
        );
        let body = json!({ "task_id": task_id });
        Ok(UpstreamHttpRequest::post(
            url,
            headers_for(&channel.platform, &channel.api_key),
            Some(Bytes::from(body.to_string())),
        ))
    }

    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("poll response: {err}")))?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let status_str = data
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut out = TaskInfo {
            status: status_from_provider(status_str),
            ..Default::default()
        };
        if let Some(progress) = data.get("progress").and_then(Value::as_str) {
            if !progress.is_empty() {
                out.progress = Some(progress.to_string());
            }
        }
        if let Some(url) = data.get("url").and_then(Value::as_str) {
            out.url = Some(url.to_string());
        }
        if let Some(remote) = data.get("remote_url").and_then(Value::as_str) {
            out.remote_url = Some(remote.to_string());
        }
        if let Some(reason) = data.get("fail_reason").and_then(Value::as_str) {
            if !reason.is_empty() {
                out.reason = Some(reason.to_string());
            }
        }
        Ok(out)
    }
}
