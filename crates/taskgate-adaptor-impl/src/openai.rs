use async_trait::async_trait;
use bytes::Bytes;

use taskgate_adaptor_core::{
    Adaptor, AdaptorError, Headers, RelayError, RelayInfo, RelayKind, RelayResult,
    UpstreamHttpResponse, auth_header_for, header_set,
};
use taskgate_protocol::openai::chat::is_canonical_chat_body;
use taskgate_protocol::{
    CreateChatCompletionRequest, CreateImageRequest, ImageResponse, Usage,
};

const PLATFORM: &str = "openai";

/// Generic OpenAI-compatible synchronous adaptor for chat and image
/// generation. Also the target of the orchestrator's fallback for async
/// endpoints served by sync-only providers.
#[derive(Default)]
pub struct OpenAIAdaptor;

#[async_trait]
impl Adaptor for OpenAIAdaptor {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    fn model_list(&self) -> Vec<&'static str> {
        vec!["gpt-4o-mini", "dall-e-3"]
    }

    fn build_request_url(
        &self,
        info: &RelayInfo,
        kind: RelayKind,
    ) -> Result<String, AdaptorError> {
        let base = info.channel.base_url.trim_end_matches('/');
        let path = match kind {
            RelayKind::Chat => "/v1/chat/completions",
            RelayKind::Image => "/v1/images/generations",
            RelayKind::Audio => "/v1/audio/speech",
            RelayKind::Embedding => "/v1/embeddings",
            RelayKind::Rerank => {
                return Err(AdaptorError::Unsupported("rerank"));
            }
        };
        Ok(format!("{base}{path}"))
    }

    fn build_request_header(
        &self,
        info: &RelayInfo,
        headers: &mut Headers,
    ) -> Result<(), AdaptorError> {
        header_set(
            headers,
            "Authorization",
            &auth_header_for(&info.channel.platform, &info.channel.api_key),
        );
        header_set(headers, "Content-Type", "application/json");
        Ok(())
    }

    fn convert_chat_request(
        &self,
        info: &RelayInfo,
        req: &CreateChatCompletionRequest,
    ) -> Result<Bytes, AdaptorError> {
        let mut outbound = req.clone();
        outbound.model = info.resolved_model().to_string();
        serde_json::to_vec(&outbound)
            .map(Bytes::from)
            .map_err(|err| AdaptorError::Other(err.to_string()))
    }

    fn convert_image_request(
        &self,
        info: &RelayInfo,
        req: &CreateImageRequest,
    ) -> Result<Bytes, AdaptorError> {
        let mut outbound = req.clone();
        outbound.model = Some(info.resolved_model().to_string());
        serde_json::to_vec(&outbound)
            .map(Bytes::from)
            .map_err(|err| AdaptorError::Other(err.to_string()))
    }

    fn convert_audio_request(
        &self,
        info: &RelayInfo,
        body: &Bytes,
    ) -> Result<Bytes, AdaptorError> {
        let mut value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| AdaptorError::Other(err.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "model".to_string(),
                serde_json::Value::String(info.resolved_model().to_string()),
            );
        }
        Ok(Bytes::from(value.to_string()))
    }

    fn convert_embedding_request(
        &self,
        info: &RelayInfo,
        body: &Bytes,
    ) -> Result<Bytes, AdaptorError> {
        let mut value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|err| AdaptorError::Other(err.to_string()))?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "model".to_string(),
                serde_json::Value::String(info.resolved_model().to_string()),
            );
        }
        Ok(Bytes::from(value.to_string()))
    }

    fn do_response(
        &self,
        _info: &RelayInfo,
        kind: RelayKind,
        resp: &UpstreamHttpResponse,
    ) -> RelayResult<(Bytes, Usage)> {
        match kind {
            RelayKind::Chat => {
                // Upstream already speaks the canonical dialect: pass the
                // body through untouched and lift the usage block out.
                if !is_canonical_chat_body(&resp.body) {
                    return Err(RelayError::response_parse(
                        "chat response is not a chat.completion object",
                    ));
                }
                let usage = serde_json::from_slice::<serde_json::Value>(&resp.body)
                    .ok()
                    .and_then(|v| v.get("usage").cloned())
                    .and_then(|u| serde_json::from_value::<Usage>(u).ok())
                    .unwrap_or_default();
                Ok((resp.body.clone(), usage))
            }
            RelayKind::Image => {
                let parsed: ImageResponse = serde_json::from_slice(&resp.body)
                    .map_err(|err| RelayError::response_parse(format!("image response: {err}")))?;
                if parsed.data.is_empty() {
                    return Err(RelayError::response_parse("image response has no data"));
                }
                Ok((resp.body.clone(), Usage::default()))
            }
            // Speech synthesis answers raw audio bytes; forwarded verbatim.
            RelayKind::Audio => Ok((resp.body.clone(), Usage::default())),
            RelayKind::Embedding => Ok((resp.body.clone(), Usage::default())),
            RelayKind::Rerank => Err(RelayError::not_implemented("rerank")),
        }
    }
}
