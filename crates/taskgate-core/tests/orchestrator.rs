use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use taskgate_adaptor_core::{
    ChannelMeta, TaskStatus, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use taskgate_common::GlobalConfig;
use taskgate_core::{AppState, PricingTable, fetch_task, submit_task, sweep_once};
use taskgate_storage::{AuthUser, MemoryStorage, QuotaLedger, TaskStore};

/// Pops pre-scripted responses in order and records every outbound request.
struct RecordingClient {
    responses: Mutex<Vec<UpstreamHttpResponse>>,
    requests: Mutex<Vec<UpstreamHttpRequest>>,
}

impl RecordingClient {
    fn new(bodies: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(
                bodies
                    .into_iter()
                    .rev()
                    .map(|body| UpstreamHttpResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: Bytes::copy_from_slice(body.as_bytes()),
                    })
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_auth(&self) -> Option<String> {
        self.requests.lock().unwrap().last().and_then(|r| {
            r.headers
                .iter()
                .find(|(k, _)| k == "Authorization")
                .map(|(_, v)| v.clone())
        })
    }
}

/// Every send fails at the transport layer.
struct UnreachableClient;

impl UpstreamClient for UnreachableClient {
    fn send<'a>(
        &'a self,
        _req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            Err(UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::Connect,
                message: "connection refused".to_string(),
            })
        })
    }
}

impl UpstreamClient for RecordingClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            self.requests.lock().unwrap().push(req);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("scripted client exhausted"))
        })
    }
}

fn sora_channel(id: i64, base_url: &str) -> ChannelMeta {
    ChannelMeta {
        id,
        platform: "sora".to_string(),
        name: format!("sora-{id}"),
        base_url: base_url.to_string(),
        api_key: format!("sk-chan-{id}"),
        enabled: true,
        ..Default::default()
    }
}

fn state_with(
    storage: Arc<MemoryStorage>,
    client: Arc<dyn UpstreamClient>,
) -> AppState {
    let mut pricing = PricingTable::new(0.1);
    pricing.set_model_price("sora-2", 0.1);
    AppState {
        config: Arc::new(GlobalConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            dsn: "sqlite::memory:".to_string(),
            proxy: None,
            upstream_timeout_secs: 30,
            sweep_interval_secs: 0,
        }),
        registry: Arc::new(taskgate_adaptor_impl::build_registry()),
        pricing: Arc::new(pricing),
        client,
        tasks: storage.clone(),
        ledger: storage.clone(),
        channels: storage.clone(),
        users: storage,
    }
}

fn user() -> AuthUser {
    AuthUser {
        id: 1,
        name: "tester".to_string(),
        using_group: "default".to_string(),
        quota: 0,
        enabled: true,
    }
}

const SUBMIT_BODY: &str =
    r#"{"model":"sora-2","prompt":"a cat riding a skateboard","seconds":"10","size":"720x1280"}"#;

#[tokio::test]
async fn submit_charges_exactly_the_computed_quota() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","object":"video","status":"queued"}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    let out = submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();

    // 0.1 model price * 1.0 group * 10 seconds * 1.0 size * 500_000.
    assert_eq!(out.quota, 500_000);
    assert_eq!(storage.balance(1).await.unwrap(), 500_000);

    let task = storage.get_task(1, "video_abc").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Submitted);
    assert_eq!(task.quota, 500_000);
    assert_eq!(task.properties.seconds.as_deref(), Some("10"));

    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["id"], "video_abc");
    assert_eq!(body["status"], "queued");
    // The client-requested duration is echoed back verbatim.
    assert_eq!(body["seconds"], "10");

    // One audit row per settlement, carrying the effective ratios.
    let entries = storage.usage_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].quota, 500_000);
    assert_eq!(entries[0].model, "sora-2");
    assert!(entries[0].detail.contains("seconds 10"));
}

#[tokio::test]
async fn short_balance_fails_before_any_upstream_call() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 100);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![]));
    let state = state_with(storage.clone(), client.clone());

    let err = submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap_err();
    assert_eq!(err.client_code(), "quota_not_enough");
    assert_eq!(err.status_code(), 403);
    assert_eq!(client.calls(), 0);
    assert_eq!(storage.balance(1).await.unwrap(), 100);
    assert!(storage.get_task_any_user("video_abc").await.unwrap().is_none());
}

#[tokio::test]
async fn two_submissions_cannot_overdraw_a_shared_balance() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 600_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_1","status":"queued"}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    let err = submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap_err();
    assert_eq!(err.client_code(), "quota_not_enough");
    assert_eq!(storage.balance(1).await.unwrap(), 100_000);
}

#[tokio::test]
async fn failed_job_fetch_records_reason_and_renders_failure() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        r#"{"id":"video_abc","status":"failed","error":{"message":"nsfw content"}}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    let out = fetch_task(&state, 1, "/v1/videos", "video_abc").await.unwrap();

    let task = storage.get_task(1, "video_abc").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failure);
    assert_eq!(task.fail_reason, "nsfw content");

    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"]["message"], "nsfw content");
}

#[tokio::test]
async fn terminal_tasks_are_served_without_polling_again() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    // One submit response and exactly one poll response: a second upstream
    // poll would exhaust the script and panic.
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        r#"{"id":"video_abc","status":"completed","remote_url":"https://cdn.example/v.mp4"}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    let first = fetch_task(&state, 1, "/v1/videos", "video_abc").await.unwrap();
    let second = fetch_task(&state, 1, "/v1/videos", "video_abc").await.unwrap();
    assert_eq!(first.body, second.body);
    assert_eq!(client.calls(), 2);

    let task = storage.get_task(1, "video_abc").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.result_ref, "https://cdn.example/v.mp4");
    assert_eq!(task.progress, "100%");
}

#[tokio::test]
async fn continuation_resumes_on_the_original_channel() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 10_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    storage.add_channel(sora_channel(2, "https://sora-b.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_b1","status":"queued"}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    // The original task lives on channel 2; routing would pick channel 1.
    let mut origin = taskgate_adaptor_core::Task {
        user_id: 1,
        channel_id: 2,
        platform: "sora".to_string(),
        task_id: "video_origin".to_string(),
        status: TaskStatus::Success,
        ..Default::default()
    };
    origin.id = storage.insert_task(&origin).await.unwrap();

    let body = r#"{"model":"sora-2","prompt":"same cat, new trick","seconds":"10","metadata":{"origin_task_id":"video_origin"}}"#;
    submit_task(&state, &user(), "/v1/videos", Bytes::from(body))
        .await
        .unwrap();

    let urls = client.request_urls();
    assert_eq!(urls, vec!["https://sora-b.example/v1/videos".to_string()]);
}

#[tokio::test]
async fn continuation_fails_when_the_original_channel_is_gone() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 10_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![]));
    let state = state_with(storage.clone(), client.clone());

    let mut origin = taskgate_adaptor_core::Task {
        user_id: 1,
        channel_id: 9,
        platform: "sora".to_string(),
        task_id: "video_origin".to_string(),
        status: TaskStatus::Success,
        ..Default::default()
    };
    origin.id = storage.insert_task(&origin).await.unwrap();

    let body = r#"{"model":"sora-2","prompt":"again","seconds":"10","metadata":{"origin_task_id":"video_origin"}}"#;
    let err = submit_task(&state, &user(), "/v1/videos", Bytes::from(body))
        .await
        .unwrap_err();
    assert_eq!(err.client_code(), "channel_disabled");
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn fetch_resumes_with_the_stored_credential_when_the_channel_is_deleted() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        r#"{"id":"video_abc","status":"in_progress","progress":10}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    storage.remove_channel(1);

    // The submit-time endpoint and key were frozen on the task; polling
    // keeps working without the channel row.
    let out = fetch_task(&state, 1, "/v1/videos", "video_abc").await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["status"], "in_progress");
    assert_eq!(client.calls(), 2);
    assert_eq!(client.last_auth().as_deref(), Some("Bearer sk-chan-1"));
    assert!(
        client.request_urls()[1].starts_with("https://sora-a.example/v1/videos/")
    );
}

#[tokio::test]
async fn fetch_without_a_stored_credential_serves_the_snapshot() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    let client = Arc::new(RecordingClient::new(vec![]));
    let state = state_with(storage.clone(), client.clone());

    // A row written before any credential was recorded, with its channel
    // long gone: nothing to poll with.
    let mut task = taskgate_adaptor_core::Task {
        user_id: 1,
        channel_id: 9,
        platform: "sora".to_string(),
        task_id: "video_old".to_string(),
        status: TaskStatus::Queued,
        progress: "0%".to_string(),
        ..Default::default()
    };
    task.id = storage.insert_task(&task).await.unwrap();

    let out = fetch_task(&state, 1, "/v1/videos", "video_old").await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["status"], "queued");
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn legacy_fetch_surface_renders_the_generic_envelope() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        r#"{"id":"video_abc","status":"completed","remote_url":"https://cdn.example/v.mp4"}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    let out = submit_task(&state, &user(), "/v1/task/submit", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    let ack: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(ack["code"], 0);
    assert_eq!(ack["data"]["id"], "video_abc");

    // Same task, legacy surface: the status envelope, never the video
    // object, no matter what the adaptor can render.
    let out = fetch_task(&state, 1, "/v1/task/fetch", "video_abc").await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["code"], "success");
    assert_eq!(body["data"]["task_id"], "video_abc");
    assert_eq!(body["data"]["status"], "SUCCESS");
    assert!(body.get("object").is_none());
    // The result location rides the fail_reason key on this surface.
    assert_eq!(body["data"]["fail_reason"], "https://cdn.example/v.mp4");
}

#[tokio::test]
async fn unclassifiable_poll_body_absorbs_the_task_into_unknown() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    // One submit, one garbage poll. A further poll would exhaust the script.
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        "<html>gateway error</html>",
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    fetch_task(&state, 1, "/v1/task/fetch", "video_abc").await.unwrap();

    let task = storage.get_task(1, "video_abc").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Unknown);
    assert!(!task.fail_reason.is_empty());

    // Absorbing state: terminal, so refetching serves the snapshot.
    let out = fetch_task(&state, 1, "/v1/task/fetch", "video_abc").await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["data"]["status"], "UNKNOWN");
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn degraded_poll_still_rewrites_the_row() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let mut task = taskgate_adaptor_core::Task {
        user_id: 1,
        channel_id: 1,
        platform: "sora".to_string(),
        task_id: "video_abc".to_string(),
        status: TaskStatus::Queued,
        ..Default::default()
    };
    task.id = storage.insert_task(&task).await.unwrap();
    let state = state_with(storage.clone(), Arc::new(UnreachableClient));

    let writes_before = storage.task_write_count();
    let out = fetch_task(&state, 1, "/v1/videos", "video_abc").await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    assert_eq!(body["status"], "queued");
    // The row is rewritten even though nothing changed, so the sweep sees
    // the attempt.
    assert_eq!(storage.task_write_count(), writes_before + 1);
}

#[tokio::test]
async fn sweep_advances_unfinished_tasks() {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user(1, "sk-test", "default", 1_000_000);
    storage.add_channel(sora_channel(1, "https://sora-a.example"));
    let client = Arc::new(RecordingClient::new(vec![
        r#"{"id":"video_abc","status":"queued"}"#,
        r#"{"id":"video_abc","status":"in_progress","progress":42}"#,
    ]));
    let state = state_with(storage.clone(), client.clone());

    submit_task(&state, &user(), "/v1/videos", Bytes::from(SUBMIT_BODY))
        .await
        .unwrap();
    let polled = sweep_once(&state).await;
    assert_eq!(polled, 1);

    let task = storage.get_task(1, "video_abc").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.progress, "42%");
    assert!(task.start_time > 0);
}
