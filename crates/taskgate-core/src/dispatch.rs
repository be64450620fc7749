use bytes::Bytes;
use tracing::{info, warn};

use taskgate_adaptor_core::{RelayError, RelayInfo, RelayKind, RelayResult};
use taskgate_protocol::{CreateChatCompletionRequest, CreateImageRequest, Usage};
use taskgate_storage::{AuthUser, UsageEntry};

use crate::select::{platform_for_model, select_channel};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct SyncRelayOutput {
    pub body: Bytes,
    pub usage: Usage,
    pub quota: i64,
    /// Human-readable cost description for the usage log.
    pub cost_line: String,
}

/// Drives one synchronous relay call end to end: model resolution, adaptor
/// selection, conversion, upstream call, response rewrite, usage extraction,
/// and quota settlement.
pub async fn relay_sync(
    state: &AppState,
    user: &AuthUser,
    kind: RelayKind,
    raw_body: Bytes,
) -> RelayResult<SyncRelayOutput> {
    let parsed = ParsedSync::from_body(kind, &raw_body)?;
    let platform = platform_for_model(&parsed.model);
    let channel = select_channel(state.channels.as_ref(), platform).await?;

    let mut info = RelayInfo::new(channel, parsed.model.clone());
    info.user_id = user.id;
    info.using_group = user.using_group.clone();
    info.action = match kind {
        RelayKind::Chat => "text-generate".to_string(),
        _ => "generate".to_string(),
    };

    let adaptor = state
        .registry
        .sync(platform)
        .ok_or_else(|| RelayError::local("no_adaptor", format!("platform {platform} has no synchronous adaptor"), 503))?;

    // Preflight: a drained account never reaches upstream.
    let balance = state
        .ledger
        .balance(user.id)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;
    if balance <= 0 {
        return Err(RelayError::quota_not_enough());
    }

    let outbound = if info.channel.passthrough {
        raw_body.clone()
    } else {
        match kind {
            RelayKind::Chat => {
                let req = parsed.chat.as_ref().ok_or_else(|| RelayError::internal("chat request missing"))?;
                adaptor.convert_chat_request(&info, req)?
            }
            RelayKind::Image => {
                let req = parsed.image.as_ref().ok_or_else(|| RelayError::internal("image request missing"))?;
                adaptor.convert_image_request(&info, req)?
            }
            RelayKind::Audio => adaptor.convert_audio_request(&info, &raw_body)?,
            RelayKind::Embedding => adaptor.convert_embedding_request(&info, &raw_body)?,
            RelayKind::Rerank => adaptor.convert_rerank_request(&info, &raw_body)?,
        }
    };

    info!(
        event = "upstream_request",
        channel_id = info.channel.id,
        platform = %platform,
        model = %info.resolved_model(),
        action = %info.action,
    );

    let resp = adaptor
        .do_request(state.client.as_ref(), &info, kind, outbound)
        .await?;
    let (body, mut usage) = adaptor.do_response(&info, kind, &resp)?;

    // A provider that reports no counters still gets billed for what the
    // client asked for.
    if usage.is_zero() {
        usage.backfill_from_item_count(parsed.item_count);
    }

    let mut price_data = info.price_data.clone();
    match kind {
        RelayKind::Chat => {
            price_data.set_ratio("tokens", (usage.total_tokens.max(1) as f64) / 1000.0);
        }
        _ => {
            price_data.set_ratio("n", parsed.item_count.max(1) as f64);
        }
    }
    let (ratio, quota) = state
        .pricing
        .quota_for(&info.origin_model_name, &info.using_group, &price_data);

    let cost_line = parsed.cost_line();
    settle(
        state,
        user.id,
        quota,
        UsageEntry {
            user_id: user.id,
            model: info.origin_model_name.clone(),
            action: info.action.clone(),
            quota,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            detail: format!("{cost_line}, ratio {ratio}"),
        },
    )
    .await;

    info!(
        event = "relay_settled",
        channel_id = info.channel.id,
        model = %info.origin_model_name,
        quota,
        ratio,
        total_tokens = usage.total_tokens,
    );

    Ok(SyncRelayOutput {
        body,
        usage,
        quota,
        cost_line,
    })
}

/// Post-paid settlement: the full computed amount is always charged. A
/// balance that no longer covers it goes negative, keeping charged equal to
/// what the preflight priced. Each settlement appends one usage row.
pub(crate) async fn settle(state: &AppState, user_id: i64, quota: i64, entry: UsageEntry) {
    if quota <= 0 {
        return;
    }
    match state.ledger.try_consume(user_id, quota).await {
        Ok(true) => {}
        Ok(false) => {
            if let Err(err) = state.ledger.consume_unchecked(user_id, quota).await {
                warn!(event = "quota_settle_failed", user_id, quota, error = %err);
            } else {
                warn!(event = "quota_shortfall", user_id, quota);
            }
        }
        Err(err) => {
            warn!(event = "quota_settle_failed", user_id, quota, error = %err);
        }
    }
    if let Err(err) = state.ledger.record_usage(&entry).await {
        warn!(event = "usage_log_failed", user_id, error = %err);
    }
}

struct ParsedSync {
    model: String,
    item_count: i64,
    chat: Option<CreateChatCompletionRequest>,
    image: Option<CreateImageRequest>,
}

impl ParsedSync {
    fn from_body(kind: RelayKind, raw: &Bytes) -> RelayResult<Self> {
        match kind {
            RelayKind::Chat => {
                let req: CreateChatCompletionRequest = serde_json::from_slice(raw)
                    .map_err(|err| RelayError::invalid_request(format!("invalid chat request: {err}")))?;
                if req.model.is_empty() {
                    return Err(RelayError::invalid_request("model is required"));
                }
                Ok(Self {
                    model: req.model.clone(),
                    item_count: i64::from(req.n.unwrap_or(1)),
                    chat: Some(req),
                    image: None,
                })
            }
            RelayKind::Image => {
                let req: CreateImageRequest = serde_json::from_slice(raw)
                    .map_err(|err| RelayError::invalid_request(format!("invalid image request: {err}")))?;
                let model = req.model.clone().unwrap_or_default();
                if model.is_empty() {
                    return Err(RelayError::invalid_request("model is required"));
                }
                if req.prompt.is_empty() {
                    return Err(RelayError::invalid_request("prompt is required"));
                }
                Ok(Self {
                    model,
                    item_count: req.item_count(),
                    chat: None,
                    image: Some(req),
                })
            }
            RelayKind::Audio | RelayKind::Embedding | RelayKind::Rerank => {
                let value: serde_json::Value = serde_json::from_slice(raw)
                    .map_err(|err| RelayError::invalid_request(format!("invalid request: {err}")))?;
                let model = value
                    .get("model")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if model.is_empty() {
                    return Err(RelayError::invalid_request("model is required"));
                }
                Ok(Self {
                    model,
                    item_count: 1,
                    chat: None,
                    image: None,
                })
            }
        }
    }

    fn cost_line(&self) -> String {
        if let Some(image) = &self.image {
            let size = image.size.as_deref().unwrap_or("default");
            let quality = image.quality.as_deref().unwrap_or("standard");
            return format!(
                "model {}, size {}, quality {}, n {}",
                self.model,
                size,
                quality,
                self.item_count
            );
        }
        format!("model {}, n {}", self.model, self.item_count)
    }
}
