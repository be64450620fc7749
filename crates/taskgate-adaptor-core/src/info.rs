use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One configured credential + endpoint instance for a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub id: i64,
    /// Provider family key; selects the Adaptor/TaskAdaptor pair.
    pub platform: String,
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub enabled: bool,
    /// Administrator mapping from client-facing model name to upstream name.
    #[serde(default)]
    pub model_mapping: BTreeMap<String, String>,
    /// Channel-level override; wins over `model_mapping`.
    #[serde(default)]
    pub model_override: Option<String>,
    /// Forward the raw inbound body verbatim instead of converting.
    #[serde(default)]
    pub passthrough: bool,
}

/// Accumulated pricing multipliers keyed by cost dimension ("seconds",
/// "size", ...). Entries equal to 1.0 are kept but skipped at multiply time.
#[derive(Debug, Clone, Default)]
pub struct PriceData {
    pub other_ratios: BTreeMap<String, f64>,
}

impl PriceData {
    pub fn set_ratio(&mut self, name: &str, value: f64) {
        self.other_ratios.insert(name.to_string(), value);
    }

    /// Product of every ratio that is not exactly 1.0.
    pub fn ratio_product(&self) -> f64 {
        self.other_ratios
            .values()
            .filter(|v| **v != 1.0)
            .product()
    }
}

/// Resolution multiplier for video-style outputs. High-resolution frames
/// carry a surcharge; everything else bills at the base rate.
pub fn size_ratio(size: &str) -> f64 {
    match size {
        "1024x1792" | "1792x1024" | "1080x1920" | "1920x1080" | "hd" => 1.666_667,
        _ => 1.0,
    }
}

/// Per-request context threaded through the relay pipeline. Built once per
/// request and passed by reference; never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct RelayInfo {
    pub user_id: i64,
    pub using_group: String,
    pub channel: ChannelMeta,
    /// What the client asked for.
    pub origin_model_name: String,
    /// Administrator-mapped upstream name; empty when no mapping applies.
    pub upstream_model_name: String,
    pub is_model_mapped: bool,
    pub request_url_path: String,
    pub action: String,
    /// A continuation/remix request referencing a previously submitted task.
    pub origin_task_id: Option<String>,
    pub price_data: PriceData,
}

impl RelayInfo {
    pub fn new(channel: ChannelMeta, origin_model_name: impl Into<String>) -> Self {
        let mut info = RelayInfo {
            channel,
            origin_model_name: origin_model_name.into(),
            ..Default::default()
        };
        info.apply_model_mapping();
        info
    }

    /// Applies the administrator mapping for the origin name, if any.
    pub fn apply_model_mapping(&mut self) {
        if let Some(mapped) = self.channel.model_mapping.get(&self.origin_model_name) {
            if !mapped.is_empty() && *mapped != self.origin_model_name {
                self.upstream_model_name = mapped.clone();
                self.is_model_mapped = true;
            }
        }
    }

    /// The single place where model-name precedence is decided:
    /// channel override, then admin mapping, then the origin name.
    pub fn resolved_model(&self) -> &str {
        if let Some(over) = self.channel.model_override.as_deref() {
            if !over.is_empty() {
                return over;
            }
        }
        if !self.upstream_model_name.is_empty() {
            return &self.upstream_model_name;
        }
        &self.origin_model_name
    }

    /// Replaces the active channel for the remainder of this request.
    /// Used by the failover continuation path.
    pub fn adopt_channel(&mut self, channel: ChannelMeta) {
        self.channel = channel;
    }
}

/// Authorization header value for a given platform. Providers disagree on
/// the scheme: the `grs` family takes the bare key, everything else expects
/// a bearer prefix. Failover must pick this by channel type, never assume.
pub fn auth_header_for(platform: &str, api_key: &str) -> String {
    match platform {
        "grs" => api_key.to_string(),
        _ => format!("Bearer {api_key}"),
    }
}
