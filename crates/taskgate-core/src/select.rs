use taskgate_adaptor_core::{ChannelMeta, RelayError, RelayResult};
use taskgate_storage::ChannelDirectory;

/// Maps a client-facing model name to the provider family serving it.
/// Unmatched names fall through to the generic OpenAI-compatible adaptor.
pub fn platform_for_model(model: &str) -> &'static str {
    if model.starts_with("sora") {
        return "sora";
    }
    if model.starts_with("veo") || model.starts_with("kie") {
        return "kie";
    }
    if model.starts_with("grs") {
        return "grs";
    }
    "openai"
}

/// Picks the first enabled channel for a platform, lowest id first.
pub async fn select_channel(
    channels: &dyn ChannelDirectory,
    platform: &str,
) -> RelayResult<ChannelMeta> {
    let candidates = channels
        .enabled_channels(platform)
        .await
        .map_err(|err| RelayError::internal(err.to_string()))?;
    candidates.into_iter().next().ok_or_else(|| {
        RelayError::local(
            "no_channel",
            format!("no enabled channel for platform {platform}"),
            503,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_prefixes_route_to_platforms() {
        assert_eq!(platform_for_model("sora-2-pro"), "sora");
        assert_eq!(platform_for_model("veo3-fast"), "kie");
        assert_eq!(platform_for_model("gpt-4o-mini"), "openai");
    }
}
