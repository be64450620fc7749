use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::debug;

use taskgate_adaptor_core::{
    AdaptorError, ChannelMeta, Headers, RelayError, RelayInfo, RelayResult, SubmitAck,
    SubmitOutcome, TaskAdaptor, TaskInfo, UpstreamClient, UpstreamHttpRequest, auth_header_for,
    header_set, status_from_provider,
};
use taskgate_protocol::TaskSubmitRequest;

const PLATFORM: &str = "kie";

/// Provider whose job API only answers usefully once the job is done: the
/// submit path itself polls with a bounded sleep/attempt loop and hands the
/// orchestrator an already-terminal outcome. Exceeding the cap is a timeout
/// of this request's polling, not proof the job failed.
pub struct KieAdaptor {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for KieAdaptor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 30,
        }
    }
}

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

#[async_trait]
impl TaskAdaptor for KieAdaptor {
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
        Ok(req)
    }

    fn build_submit(
        &self,
        info: &RelayInfo,
        req: &TaskSubmitRequest,
    ) -> Result<UpstreamHttpRequest, AdaptorError> {
        let url = format!(
            "{}/api/v1/jobs/createTask",
            info.channel.base_url.trim_end_matches('/')
        );
        let mut input = json!({ "prompt": req.prompt });
        let references = req.reference_urls();
        if !references.is_empty() {
            input["image_urls"] = json!(references);
        }
        if let Some(seconds) = req.requested_seconds() {
            input["duration"] = Value::String(seconds);
        }
        let body = json!({
            "model": info.resolved_model(),
            "input": input,
        });
        Ok(UpstreamHttpRequest::post(
            url,
            headers_for(&info.channel.platform, &info.channel.api_key),
            Some(Bytes::from(body.to_string())),
        ))
    }

    fn parse_submit_response(&self, body: &Bytes) -> RelayResult<SubmitAck> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("submit response: {err}")))?;
        let task_id = value
            .pointer("/data/taskId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if task_id.is_empty() {
            return Err(RelayError::response_parse("submit response has no taskId"));
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
            "{}/api/v1/jobs/recordInfo?taskId={task_id}",
            channel.base_url.trim_end_matches('/')
        );
        Ok(UpstreamHttpRequest::get(
            url,
            headers_for(&channel.platform, &channel.api_key),
        ))
    }

    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| RelayError::response_parse(format!("poll response: {err}")))?;
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut out = TaskInfo {
            status: status_from_provider(state),
            ..Default::default()
        };
        if let Some(urls) = data
            .pointer("/resultJson")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        {
            if let Some(url) = urls
                .pointer("/resultUrls/0")
                .and_then(Value::as_str)
            {
                out.url = Some(url.to_string());
            }
        }
        if let Some(reason) = data.get("failMsg").and_then(Value::as_str) {
            if !reason.is_empty() {
                out.reason = Some(reason.to_string());
            }
        }
        Ok(out)
    }

    /// Submit then wait: acknowledge, then poll at a fixed interval up to the
    /// attempt cap. Vendor states that are not terminal keep the loop going.
    async fn submit(
        &self,
        client: &dyn UpstreamClient,
        info: &RelayInfo,
        req: &TaskSubmitRequest,
    ) -> RelayResult<SubmitOutcome> {
        let upstream = self.build_submit(info, req)?;
        let resp = client.send(upstream).await?;
        if !self.accepts_status(resp.status) {
            return Err(RelayError::UpstreamStatus {
                status: resp.status,
                body: resp.body,
            });
        }
        let ack = self.parse_submit_response(&resp.body)?;

        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;
            let poll = self.fetch_task(&info.channel, &ack.task_id)?;
            let resp = match client.send(poll).await {
                Ok(resp) if self.accepts_status(resp.status) => resp,
                // A flaky poll inside the loop is not fatal; the next
                // attempt may answer.
                _ => continue,
            };
            let task_info = self.parse_task_result(&resp.body)?;
            if task_info.status.is_terminal() {
                return Ok(SubmitOutcome {
                    ack,
                    completed: Some(task_info),
                });
            }
            debug!(
                event = "kie_poll_pending",
                task_id = %ack.task_id,
                attempt,
                status = %task_info.status.as_str(),
            );
        }
        Err(RelayError::TaskTimeout {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use super::*;
    use taskgate_adaptor_core::{
        ChannelMeta, TaskStatus, UpstreamFailure, UpstreamHttpResponse,
    };

    struct ScriptedClient {
        responses: Mutex<Vec<UpstreamHttpResponse>>,
    }

    impl ScriptedClient {
        fn new(bodies: Vec<&'static str>) -> Self {
            Self {
                responses: Mutex::new(
                    bodies
                        .into_iter()
                        .rev()
                        .map(|body| UpstreamHttpResponse {
                            status: 200,
                            headers: Vec::new(),
                            body: Bytes::from_static(body.as_bytes()),
                        })
                        .collect(),
                ),
            }
        }
    }

    impl UpstreamClient for ScriptedClient {
        fn send<'a>(
            &'a self,
            _req: UpstreamHttpRequest,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a,
            >,
        > {
            Box::pin(async move {
                Ok(self
                    .responses
                    .lock()
                    .unwrap()
                    .pop()
                    .expect("script exhausted"))
            })
        }
    }

    fn adaptor() -> KieAdaptor {
        KieAdaptor {
            poll_interval: Duration::ZERO,
            max_attempts: 3,
        }
    }

    fn info() -> RelayInfo {
        RelayInfo::new(
            ChannelMeta {
                id: 3,
                platform: PLATFORM.to_string(),
                base_url: "https://kie.example".to_string(),
                api_key: "kk".to_string(),
                enabled: true,
                ..Default::default()
            },
            "veo3-fast",
        )
    }

    fn submit_req() -> TaskSubmitRequest {
        TaskSubmitRequest::from_json(br#"{"model":"veo3-fast","prompt":"a dog"}"#).unwrap()
    }

    #[tokio::test]
    async fn submit_polls_until_terminal() {
        let client = ScriptedClient::new(vec![
            r#"{"code":200,"data":{"taskId":"k-1"}}"#,
            r#"{"code":200,"data":{"taskId":"k-1","state":"generating"}}"#,
            r#"{"code":200,"data":{"taskId":"k-1","state":"success","resultJson":"{\"resultUrls\":[\"https://cdn.example/k.mp4\"]}"}}"#,
        ]);
        let outcome = adaptor()
            .submit(&client, &info(), &submit_req())
            .await
            .unwrap();
        assert_eq!(outcome.ack.task_id, "k-1");
        let completed = outcome.completed.unwrap();
        assert_eq!(completed.status, TaskStatus::Success);
        assert_eq!(completed.url.as_deref(), Some("https://cdn.example/k.mp4"));
    }

    #[tokio::test]
    async fn unknown_vendor_states_keep_polling_until_the_cap() {
        let client = ScriptedClient::new(vec![
            r#"{"code":200,"data":{"taskId":"k-2"}}"#,
            r#"{"code":200,"data":{"taskId":"k-2","state":"warming"}}"#,
            r#"{"code":200,"data":{"taskId":"k-2","state":"still-warming"}}"#,
            r#"{"code":200,"data":{"taskId":"k-2","state":"almost"}}"#,
        ]);
        let err = adaptor()
            .submit(&client, &info(), &submit_req())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TaskTimeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn failed_job_reports_reason() {
        let client = ScriptedClient::new(vec![
            r#"{"code":200,"data":{"taskId":"k-3"}}"#,
            r#"{"code":200,"data":{"taskId":"k-3","state":"fail","failMsg":"flagged"}}"#,
        ]);
        let outcome = adaptor()
            .submit(&client, &info(), &submit_req())
            .await
            .unwrap();
        let completed = outcome.completed.unwrap();
        assert_eq!(completed.status, TaskStatus::Failure);
        assert_eq!(completed.reason.as_deref(), Some("flagged"));
    }
}
