//! Thin HTTP boundary over the dispatcher and orchestrator. Routes,
//! bearer auth, and error envelope rendering live here; everything else
//! is `taskgate-core`.

use axum::Router;
use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::json;
use tracing::warn;

use taskgate_adaptor_core::{RelayError, RelayKind};
use taskgate_core::{AppState, auth, fetch_task, relay_sync, submit_task};
use taskgate_protocol::TaskSubmitRequest;
use taskgate_storage::AuthUser;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/videos", post(create_video))
        .route("/v1/videos/{task_id}", get(get_video))
        .route("/v1/task/submit", post(submit_generic))
        .route("/v1/task/fetch/{task_id}", get(fetch_generic))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/images/generations", post(image_generations))
        .route("/v1/audio/speech", post(audio_speech))
        .route("/v1/embeddings", post(embeddings))
        .layer(middleware::from_fn_with_state(state.clone(), require_user))
        .with_state(state)
}

/// Bearer auth for every relay route. The resolved user rides a request
/// extension; the raw key never reaches a handler.
async fn require_user(
    State(state): State<AppState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let user = match auth::authenticate(state.users.as_ref(), authorization.as_deref()).await {
        Ok(user) => user,
        Err(err) => return render_error(&err),
    };
    req.headers_mut().remove(header::AUTHORIZATION);
    req.extensions_mut().insert(user);
    next.run(req).await
}

async fn create_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match normalize_submit_body(&headers, body) {
        Ok(body) => body,
        Err(err) => return render_error(&err),
    };
    match submit_task(&state, &user, "/v1/videos", body).await {
        Ok(out) => json_response(StatusCode::OK, out.body),
        Err(err) => render_error(&err),
    }
}

async fn get_video(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> Response {
    match fetch_task(&state, user.id, "/v1/videos", &task_id).await {
        Ok(out) => json_response(StatusCode::OK, out.body),
        Err(err) => render_error(&err),
    }
}

async fn submit_generic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = match normalize_submit_body(&headers, body) {
        Ok(body) => body,
        Err(err) => return render_error(&err),
    };
    match submit_task(&state, &user, "/v1/task/submit", body).await {
        Ok(out) => json_response(StatusCode::OK, out.body),
        Err(err) => render_error(&err),
    }
}

async fn fetch_generic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> Response {
    match fetch_task(&state, user.id, "/v1/task/fetch", &task_id).await {
        Ok(out) => json_response(StatusCode::OK, out.body),
        Err(err) => render_error(&err),
    }
}

/// Form-encoded submissions are folded into the same JSON shape the
/// orchestrator parses; JSON bodies pass through untouched.
fn normalize_submit_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes, RelayError> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok(body);
    }
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&body)
        .map_err(|err| RelayError::invalid_request(format!("invalid form body: {err}")))?;
    let req =
        TaskSubmitRequest::from_form_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    serde_json::to_vec(&req)
        .map(Bytes::from)
        .map_err(|err| RelayError::internal(err.to_string()))
}

async fn chat_completions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    relay(state, user, RelayKind::Chat, body).await
}

async fn image_generations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    relay(state, user, RelayKind::Image, body).await
}

async fn audio_speech(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    relay(state, user, RelayKind::Audio, body).await
}

async fn embeddings(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Response {
    relay(state, user, RelayKind::Embedding, body).await
}

async fn relay(state: AppState, user: AuthUser, kind: RelayKind, body: Bytes) -> Response {
    match relay_sync(&state, &user, kind, body).await {
        Ok(out) => json_response(StatusCode::OK, out.body),
        Err(err) => render_error(&err),
    }
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// The client sees a code and a short message; upstream bodies and local
/// detail stay in the logs.
fn render_error(err: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !err.is_local() {
        warn!(event = "relay_failed", code = err.client_code(), error = %err);
    }
    let body = json!({
        "error": {
            "code": err.client_code(),
            "message": client_message(err),
        }
    });
    json_response(status, Bytes::from(body.to_string()))
}

fn client_message(err: &RelayError) -> String {
    match err {
        RelayError::Local { message, .. } => message.clone(),
        RelayError::UpstreamTransport { .. } => "upstream provider unreachable".to_string(),
        RelayError::UpstreamStatus { status, .. } => {
            format!("upstream provider returned status {status}")
        }
        RelayError::ResponseParse { .. } => "upstream provider returned an unusable response".to_string(),
        RelayError::TaskTimeout { attempts } => {
            format!("task did not finish within {attempts} polls")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_code_and_status() {
        let resp = render_error(&RelayError::quota_not_enough());
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn form_submissions_become_the_json_submit_shape() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let body = Bytes::from_static(b"model=sora-2&prompt=a+cat&seconds=10&watermark=1");
        let normalized = normalize_submit_body(&headers, body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&normalized).unwrap();
        assert_eq!(value["model"], "sora-2");
        assert_eq!(value["prompt"], "a cat");
        assert_eq!(value["seconds"], "10");
        assert_eq!(value["metadata"]["watermark"], 1);
    }

    #[test]
    fn json_submissions_pass_through_untouched() {
        let headers = HeaderMap::new();
        let body = Bytes::from_static(br#"{"model":"sora-2","prompt":"a cat"}"#);
        let normalized = normalize_submit_body(&headers, body.clone()).unwrap();
        assert_eq!(normalized, body);
    }

    #[test]
    fn upstream_bodies_never_reach_the_client_message() {
        let err = RelayError::UpstreamStatus {
            status: 500,
            body: Bytes::from_static(b"secret internal detail"),
        };
        assert!(!client_message(&err).contains("secret"));
    }
}
