use bytes::Bytes;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, warn};

use taskgate_adaptor_core::{
    AdaptorError, ChannelMeta, RelayError, RelayInfo, RelayKind, RelayResult, Task,
    TaskPrivateData, TaskStatus,
};
use taskgate_protocol::{
    CreateImageRequest, ImageResponse, OpenAIVideo, SubmitEnvelope, TaskDto, TaskEnvelope,
    TaskSubmitRequest,
};
use taskgate_storage::{AuthUser, UsageEntry};

use crate::dispatch::settle;
use crate::select::{platform_for_model, select_channel};
use crate::state::AppState;

const DEFAULT_SECONDS: &str = "4";
const SWEEP_BATCH: u64 = 100;

#[derive(Debug, Clone)]
pub struct SubmitOutput {
    pub body: Bytes,
    pub task_id: String,
    pub quota: i64,
}

#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub body: Bytes,
}

/// Drives one asynchronous task submission: validation, pricing, preflight
/// balance check, channel-failover continuation, upstream submit, task
/// persistence, quota settlement, and acknowledgment rendering.
pub async fn submit_task(
    state: &AppState,
    user: &AuthUser,
    path: &str,
    raw_body: Bytes,
) -> RelayResult<SubmitOutput> {
    let model = peek_model(&raw_body)?;
    let platform = platform_for_model(&model);
    let channel = select_channel(state.channels.as_ref(), platform).await?;

    let mut info = RelayInfo::new(channel, model);
    info.user_id = user.id;
    info.using_group = user.using_group.clone();
    info.request_url_path = path.to_string();
    info.action = "generate".to_string();

    let Some(adaptor) = state.registry.task(platform) else {
        // Providers that only speak the synchronous contract still serve
        // the async-facing endpoint; the job completes inline.
        return submit_via_sync_fallback(state, user, platform, info, &raw_body).await;
    };

    let req = adaptor
        .validate_request(&mut info, &raw_body)
        .map_err(|err| RelayError::invalid_request(err.to_string()))?;
    let (ratio, quota) = state
        .pricing
        .quota_for(&info.origin_model_name, &info.using_group, &info.price_data);

    // Preflight: fail before any upstream call when the balance is short.
    let balance = state
        .ledger
        .balance(user.id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;
    if balance < quota {
        return Err(RelayError::quota_not_enough());
    }

    resolve_continuation(state, user.id, &mut info, &req).await?;

    info!(
        event = "task_submit",
        channel_id = info.channel.id,
        platform = %platform,
        model = %info.resolved_model(),
        action = %info.action,
        quota,
        ratio,
    );

    let outcome = adaptor
        .submit(state.client.as_ref(), &info, &req)
        .await?;

    let now = OffsetDateTime::now_utc();
    let mut task = Task::init(platform, &info, now);
    task.task_id = outcome.ack.task_id.clone();
    task.status = TaskStatus::Submitted;
    task.quota = quota;
    task.data = serde_json::from_slice(&outcome.ack.raw).unwrap_or(Value::Null);
    task.properties.model = Some(info.origin_model_name.clone());
    task.properties.seconds = req.requested_seconds();
    if !req.size.is_empty() {
        task.properties.size = Some(req.size.clone());
    }
    task.properties.input_images = req.reference_urls();
    task.private_data.consumed_quota = quota;
    task.private_data.model_price = state.pricing.model_price(&info.origin_model_name);
    task.private_data.group_ratio = state.pricing.group_ratio(&info.using_group);
    task.private_data.other_ratios = info.price_data.other_ratios.clone();
    task.private_data.base_url = info.channel.base_url.clone();
    task.private_data.api_key = info.channel.api_key.clone();
    task.private_data.channel_type = info.channel.platform.clone();
    if let Some(completed) = &outcome.completed {
        task.apply_poll(completed, now);
    }

    task.id = state
        .tasks
        .insert_task(&task)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;

    // Settlement happens exactly once, after the task is durable. The amount
    // charged is the amount computed above; the task is never re-priced.
    settle(
        state,
        user.id,
        quota,
        usage_entry(user.id, &info, quota, ratio, &task.private_data),
    )
    .await;

    info!(
        event = "task_persisted",
        task_id = %task.task_id,
        status = %task.status.as_str(),
        quota,
    );

    let body = render_submit_ack(path, &info, &req, &task);
    Ok(SubmitOutput {
        body,
        task_id: task.task_id,
        quota,
    })
}

/// Client-initiated fetch. Terminal tasks are served from the stored
/// snapshot; live tasks are polled, folded, and persisted first. The
/// response shape follows the surface the caller came in on, not the
/// adaptor's capabilities.
pub async fn fetch_task(
    state: &AppState,
    user_id: i64,
    path: &str,
    task_id: &str,
) -> RelayResult<FetchOutput> {
    let mut task = state
        .tasks
        .get_task(user_id, task_id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?
        .ok_or_else(|| RelayError::local("task_not_found", format!("task {task_id} not found"), 404))?;

    if !task.status.is_terminal() {
        poll_and_apply(state, &mut task).await?;
    }

    let body = render_task(state, path, &task)?;
    Ok(FetchOutput { body })
}

/// One sweep pass over unfinished tasks, reusing the fetch poll path.
/// Returns how many tasks were polled.
pub async fn sweep_once(state: &AppState) -> usize {
    let tasks = match state.tasks.unfinished_tasks(SWEEP_BATCH).await {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(event = "sweep_load_failed", error = %err);
            return 0;
        }
    };
    let mut polled = 0;
    for mut task in tasks {
        match poll_and_apply(state, &mut task).await {
            Ok(true) => polled += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(event = "sweep_poll_failed", task_id = %task.task_id, error = %err);
            }
        }
    }
    polled
}

/// Polls upstream for one task and persists whatever came of it. Returns
/// false when the poll degraded to the stored snapshot (missing adaptor or
/// channel, or an unreachable/unhappy upstream); a degraded fetch is not an
/// error because the job may already be terminal server-side. Every path
/// rewrites the row so the sweep sees the task was looked at.
async fn poll_and_apply(state: &AppState, task: &mut Task) -> RelayResult<bool> {
    let Some(adaptor) = state.registry.task(&task.platform) else {
        touch(state, task).await;
        return Ok(false);
    };
    let channel = state
        .channels
        .get_channel(task.channel_id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;
    let channel = match channel {
        Some(channel) => channel,
        None => match resume_channel(task) {
            Some(channel) => {
                info!(event = "poll_channel_resumed", task_id = %task.task_id, channel_id = task.channel_id);
                channel
            }
            None => {
                warn!(event = "poll_channel_missing", task_id = %task.task_id, channel_id = task.channel_id);
                touch(state, task).await;
                return Ok(false);
            }
        },
    };

    let poll = adaptor.fetch_task(&channel, &task.task_id)?;
    let resp = match state.client.as_ref().send(poll).await {
        Ok(resp) => resp,
        Err(failure) => {
            warn!(event = "poll_transport_failed", task_id = %task.task_id, error = %RelayError::from(failure));
            touch(state, task).await;
            return Ok(false);
        }
    };
    if !adaptor.accepts_status(resp.status) {
        warn!(event = "poll_upstream_error", task_id = %task.task_id, status = resp.status);
        touch(state, task).await;
        return Ok(false);
    }

    // A body that cannot be classified must never be defaulted into SUCCESS
    // or FAILURE; the task is absorbed into UNKNOWN instead.
    let task_info = match adaptor.parse_task_result(&resp.body) {
        Ok(task_info) => task_info,
        Err(err) => {
            warn!(event = "poll_unclassifiable", task_id = %task.task_id, error = %err);
            task.status = TaskStatus::Unknown;
            task.fail_reason = "provider response could not be classified".to_string();
            if let Ok(value) = serde_json::from_slice::<Value>(&resp.body) {
                task.data = value;
            }
            state
                .tasks
                .update_task(task)
                .await
                .map_err(|err| RelayError::internal(err.to_string()))?;
            return Ok(true);
        }
    };
    task.apply_poll(&task_info, OffsetDateTime::now_utc());
    if let Ok(value) = serde_json::from_slice::<Value>(&resp.body) {
        task.data = value;
    }
    state
        .tasks
        .update_task(task)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;

    info!(
        event = "task_polled",
        task_id = %task.task_id,
        status = %task.status.as_str(),
        progress = %task.progress,
    );
    Ok(true)
}

/// Rebuilds a pollable channel from the credential frozen at submit time.
/// Returns None for rows written before any credential was recorded.
fn resume_channel(task: &Task) -> Option<ChannelMeta> {
    let keep = &task.private_data;
    if keep.base_url.is_empty() || keep.api_key.is_empty() {
        return None;
    }
    Some(ChannelMeta {
        id: task.channel_id,
        platform: if keep.channel_type.is_empty() {
            task.platform.clone()
        } else {
            keep.channel_type.clone()
        },
        base_url: keep.base_url.clone(),
        api_key: keep.api_key.clone(),
        enabled: true,
        ..Default::default()
    })
}

/// Rewrites the row unchanged so its update timestamp moves forward.
async fn touch(state: &AppState, task: &Task) {
    if let Err(err) = state.tasks.update_task(task).await {
        warn!(event = "task_touch_failed", task_id = %task.task_id, error = %err);
    }
}

/// Continuation requests resume on the channel that owns the original task,
/// not the one routing happened to pick.
async fn resolve_continuation(
    state: &AppState,
    user_id: i64,
    info: &mut RelayInfo,
    req: &TaskSubmitRequest,
) -> RelayResult<()> {
    let Some(origin_task_id) = req
        .metadata
        .get("origin_task_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
    else {
        return Ok(());
    };
    info.origin_task_id = Some(origin_task_id.to_string());

    let origin = state
        .tasks
        .get_task(user_id, origin_task_id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?
        .ok_or_else(|| {
            RelayError::local(
                "task_not_found",
                format!("origin task {origin_task_id} not found"),
                404,
            )
        })?;

    if origin.channel_id == info.channel.id {
        return Ok(());
    }
    let channel = state
        .channels
        .get_channel(origin.channel_id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?
        .filter(|c| c.enabled)
        .ok_or_else(|| {
            RelayError::local(
                "channel_disabled",
                "the channel that owns the original task is unavailable",
                503,
            )
        })?;
    info!(
        event = "task_continuation",
        origin_task_id = %origin_task_id,
        from_channel = info.channel.id,
        to_channel = channel.id,
    );
    info.adopt_channel(channel);
    Ok(())
}

/// Async-facing endpoint served by a provider that only implements the
/// synchronous contract: convert, call, and record an already-terminal task.
async fn submit_via_sync_fallback(
    state: &AppState,
    user: &AuthUser,
    platform: &str,
    mut info: RelayInfo,
    raw_body: &Bytes,
) -> RelayResult<SubmitOutput> {
    let adaptor = state.registry.sync(platform).ok_or_else(|| {
        RelayError::local(
            "no_adaptor",
            format!("platform {platform} has no adaptor"),
            503,
        )
    })?;
    let req = TaskSubmitRequest::from_json(raw_body)
        .map_err(|err| RelayError::invalid_request(format!("invalid submit request: {err}")))?;
    if req.prompt.is_empty() {
        return Err(RelayError::invalid_request("prompt is required"));
    }
    if !req.seconds.is_empty() || req.duration > 0 {
        info.price_data
            .set_ratio("seconds", f64::from(req.seconds_value()));
    }

    let (ratio, quota) = state
        .pricing
        .quota_for(&info.origin_model_name, &info.using_group, &info.price_data);
    let balance = state
        .ledger
        .balance(user.id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;
    if balance < quota {
        return Err(RelayError::quota_not_enough());
    }

    let image_req = CreateImageRequest {
        model: Some(info.origin_model_name.clone()),
        prompt: req.prompt.clone(),
        n: Some(1),
        size: if req.size.is_empty() {
            None
        } else {
            Some(req.size.clone())
        },
        quality: None,
        response_format: None,
    };
    let body = adaptor.convert_image_request(&info, &image_req)?;
    let resp = adaptor
        .do_request(state.client.as_ref(), &info, RelayKind::Image, body)
        .await?;
    let (canonical, _usage) = adaptor.do_response(&info, RelayKind::Image, &resp)?;

    let parsed: ImageResponse = serde_json::from_slice(&canonical)
        .map_err(|err| RelayError::response_parse(format!("image response: {err}")))?;
    let result_ref = parsed
        .data
        .first()
        .and_then(|item| item.url.clone())
        .unwrap_or_default();

    let now = OffsetDateTime::now_utc();
    let mut task = Task::init(platform, &info, now);
    task.task_id = format!("sync-{}", uuid::Uuid::new_v4());
    task.status = TaskStatus::Success;
    task.progress = "100%".to_string();
    task.start_time = now.unix_timestamp();
    task.finish_time = now.unix_timestamp();
    task.result_ref = result_ref;
    task.quota = quota;
    task.data = serde_json::from_slice(&canonical).unwrap_or(Value::Null);
    task.private_data.consumed_quota = quota;
    task.private_data.model_price = state.pricing.model_price(&info.origin_model_name);
    task.private_data.group_ratio = state.pricing.group_ratio(&info.using_group);
    task.private_data.other_ratios = info.price_data.other_ratios.clone();
    task.id = state
        .tasks
        .insert_task(&task)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;

    settle(
        state,
        user.id,
        quota,
        usage_entry(user.id, &info, quota, ratio, &task.private_data),
    )
    .await;

    info!(
        event = "task_sync_fallback",
        task_id = %task.task_id,
        platform = %platform,
        quota,
        ratio,
    );

    let body = envelope_body(&task);
    Ok(SubmitOutput {
        body,
        task_id: task.task_id,
        quota,
    })
}

/// Audit row for a settled submission, carrying the effective ratios the
/// charge was computed from.
fn usage_entry(
    user_id: i64,
    info: &RelayInfo,
    quota: i64,
    ratio: f64,
    keep: &TaskPrivateData,
) -> UsageEntry {
    let mut detail = format!(
        "ratio {ratio}, model price {}, group ratio {}",
        keep.model_price, keep.group_ratio
    );
    for (name, value) in &keep.other_ratios {
        detail.push_str(&format!(", {name} {value}"));
    }
    UsageEntry {
        user_id,
        model: info.origin_model_name.clone(),
        action: info.action.clone(),
        quota,
        prompt_tokens: 0,
        completion_tokens: 0,
        detail,
    }
}

fn peek_model(raw: &Bytes) -> RelayResult<String> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|err| RelayError::invalid_request(format!("invalid submit request: {err}")))?;
    let model = value
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if model.is_empty() {
        return Err(RelayError::invalid_request("model is required"));
    }
    Ok(model)
}

fn render_submit_ack(
    path: &str,
    info: &RelayInfo,
    req: &TaskSubmitRequest,
    task: &Task,
) -> Bytes {
    if path.starts_with("/v1/videos") {
        let mut video = OpenAIVideo::new(task.task_id.clone(), task.submit_time);
        video.status = task.status.to_video_status().to_string();
        video.model = info.origin_model_name.clone();
        video.seconds = req
            .requested_seconds()
            .unwrap_or_else(|| DEFAULT_SECONDS.to_string());
        if !req.size.is_empty() {
            video.size = req.size.clone();
        }
        return to_json_bytes(&video);
    }
    to_json_bytes(&SubmitEnvelope::success(task.task_id.clone()))
}

/// Renders a stored task for the surface the request came in on: the
/// canonical video object on the `/v1/videos` surface, the generic status
/// envelope everywhere else. Capable adaptors do not leak the video shape
/// onto the legacy surface.
fn render_task(state: &AppState, path: &str, task: &Task) -> RelayResult<Bytes> {
    if path.starts_with("/v1/videos") {
        if let Some(adaptor) = state.registry.task(&task.platform) {
            match adaptor.render_video(task) {
                Ok(body) => return Ok(body),
                Err(AdaptorError::Unsupported(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(envelope_body(task))
}

fn envelope_body(task: &Task) -> Bytes {
    to_json_bytes(&TaskEnvelope::success(task_dto(task)))
}

/// Client-visible snapshot. `private_data` never crosses this boundary. On
/// success the result location rides the `fail_reason` key; existing
/// consumers read it from there.
fn task_dto(task: &Task) -> TaskDto {
    let fail_reason = if task.status == TaskStatus::Success && !task.result_ref.is_empty() {
        task.result_ref.clone()
    } else {
        task.fail_reason.clone()
    };
    TaskDto {
        task_id: task.task_id.clone(),
        action: task.action.clone(),
        status: task.status.as_str().to_string(),
        fail_reason,
        submit_time: task.submit_time,
        start_time: task.start_time,
        finish_time: task.finish_time,
        progress: task.progress.clone(),
        data: if task.data.is_null() {
            None
        } else {
            Some(task.data.clone())
        },
    }
}

fn to_json_bytes<T: serde::Serialize>(value: &T) -> Bytes {
    match serde_json::to_vec(value) {
        Ok(body) => Bytes::from(body),
        Err(_) => Bytes::from_static(b"{}"),
    }
}
