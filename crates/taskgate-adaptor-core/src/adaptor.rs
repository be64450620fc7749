use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{AdaptorError, RelayError, RelayResult};
use crate::headers::Headers;
use crate::http::{UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse};
use crate::info::{ChannelMeta, RelayInfo};
use crate::task::{Task, TaskInfo};
use taskgate_protocol::{CreateChatCompletionRequest, CreateImageRequest, TaskSubmitRequest, Usage};

/// Which relay surface a synchronous request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Chat,
    Image,
    Audio,
    Embedding,
    Rerank,
}

/// Provider acknowledgement for an asynchronous submit.
#[derive(Debug, Clone)]
pub struct SubmitAck {
    pub task_id: String,
    /// Raw provider response, stored verbatim on the task record.
    pub raw: Bytes,
}

/// Outcome of a submit. `completed` is set by providers whose submit path
/// blocks until the job finishes.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub ack: SubmitAck,
    pub completed: Option<TaskInfo>,
}

impl SubmitOutcome {
    pub fn pending(ack: SubmitAck) -> Self {
        SubmitOutcome {
            ack,
            completed: None,
        }
    }
}

/// Synchronous request/response contract. One implementation per provider
/// family. Every convert hook has a default `Unsupported` body so a provider
/// only implements the request kinds it can serve.
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Registry key. Matches `ChannelMeta::platform`.
    fn platform(&self) -> &'static str;

    fn channel_name(&self) -> &'static str {
        self.platform()
    }

    fn model_list(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn build_request_url(&self, info: &RelayInfo, kind: RelayKind)
    -> Result<String, AdaptorError>;

    fn build_request_header(
        &self,
        info: &RelayInfo,
        headers: &mut Headers,
    ) -> Result<(), AdaptorError>;

    fn convert_chat_request(
        &self,
        _info: &RelayInfo,
        _req: &CreateChatCompletionRequest,
    ) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("convert_chat_request"))
    }

    fn convert_image_request(
        &self,
        _info: &RelayInfo,
        _req: &CreateImageRequest,
    ) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("convert_image_request"))
    }

    fn convert_audio_request(
        &self,
        _info: &RelayInfo,
        _body: &Bytes,
    ) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("convert_audio_request"))
    }

    fn convert_embedding_request(
        &self,
        _info: &RelayInfo,
        _body: &Bytes,
    ) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("convert_embedding_request"))
    }

    fn convert_rerank_request(
        &self,
        _info: &RelayInfo,
        _body: &Bytes,
    ) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("convert_rerank_request"))
    }

    /// Status codes accepted as success. Providers whose creation semantics
    /// answer 201 widen this.
    fn accepts_status(&self, status: u16) -> bool {
        (200..300).contains(&status)
    }

    /// Executes the converted request through the shared client. The default
    /// body composes url + headers + send; providers with unusual transport
    /// needs override it.
    async fn do_request(
        &self,
        client: &dyn UpstreamClient,
        info: &RelayInfo,
        kind: RelayKind,
        body: Bytes,
    ) -> RelayResult<UpstreamHttpResponse> {
        let url = self.build_request_url(info, kind)?;
        let mut headers = Headers::new();
        self.build_request_header(info, &mut headers)?;
        let resp = client
            .send(UpstreamHttpRequest::post(url, headers, Some(body)))
            .await?;
        if !self.accepts_status(resp.status) {
            return Err(RelayError::UpstreamStatus {
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(resp)
    }

    /// Rewrites the fully buffered upstream body into the canonical shape
    /// and extracts usage. Bodies already in canonical shape pass through
    /// untouched.
    fn do_response(
        &self,
        info: &RelayInfo,
        kind: RelayKind,
        resp: &UpstreamHttpResponse,
    ) -> RelayResult<(Bytes, Usage)>;
}

/// Asynchronous task contract: submit now, poll later. The default `submit`
/// composes build + send + parse; providers whose upstream blocks until
/// completion override it and return a completed outcome.
#[async_trait]
pub trait TaskAdaptor: Send + Sync {
    fn platform(&self) -> &'static str;

    fn channel_name(&self) -> &'static str {
        self.platform()
    }

    /// Parses and validates the raw inbound body into the normalized submit
    /// shape, fixing `info.action` and the pricing multipliers. Must reject
    /// an empty prompt or model before anything is spent.
    fn validate_request(
        &self,
        info: &mut RelayInfo,
        raw: &[u8],
    ) -> Result<TaskSubmitRequest, AdaptorError>;

    fn build_submit(
        &self,
        info: &RelayInfo,
        req: &TaskSubmitRequest,
    ) -> Result<UpstreamHttpRequest, AdaptorError>;

    /// A missing provider task id is fatal; the task must not be persisted.
    fn parse_submit_response(&self, body: &Bytes) -> RelayResult<SubmitAck>;

    /// Builds the single poll call for a previously submitted task. The
    /// authorization scheme must follow the channel's type, not this
    /// adaptor's own: a continuation may have adopted a channel of a
    /// different family.
    fn fetch_task(
        &self,
        channel: &ChannelMeta,
        task_id: &str,
    ) -> Result<UpstreamHttpRequest, AdaptorError>;

    /// Pure and total: unrecognized provider states normalize to a running
    /// status instead of an error.
    fn parse_task_result(&self, body: &[u8]) -> RelayResult<TaskInfo>;

    /// See [`Adaptor::accepts_status`].
    fn accepts_status(&self, status: u16) -> bool {
        (200..300).contains(&status)
    }

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
        Ok(SubmitOutcome::pending(ack))
    }

    /// Renders the stored task as the provider-appropriate public object.
    /// Defaults to unsupported; the fetch surface then falls back to the
    /// generic status envelope.
    fn render_video(&self, _task: &Task) -> Result<Bytes, AdaptorError> {
        Err(AdaptorError::Unsupported("render_video"))
    }
}
