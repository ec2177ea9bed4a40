//! Command API handlers.
//!
//! Send handlers check, in order: the account has a live session (404), the
//! session is authenticated (401), the request fields are valid (400). Only
//! then is the network called (500 on failure).

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State, rejection::JsonRejection},
        response::IntoResponse,
    },
    serde::{Deserialize, Serialize},
    serde_json::json,
    tracing::info,
    url::Url,
    wagate_common::{
        Error,
        types::{AuthState, OutboundMedia, PresenceAction, StructuredMessage},
    },
    wagate_sessions::{Session, SessionSummary},
};

use crate::{error::ApiResult, server::AppState};

type JsonBody<T> = Result<Json<T>, JsonRejection>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub account_id: Option<String>,
    #[serde(alias = "webhookURL")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub account_id: Option<String>,
    pub to: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest {
    pub account_id: Option<String>,
    pub to: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub media_base64: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStructuredRequest {
    pub account_id: Option<String>,
    pub to: Option<String>,
    pub kind: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub account_id: Option<String>,
    pub to: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
}

const SENT: SendResponse = SendResponse { success: true };

/// Pairing status of one account.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QrStatus {
    Scan {
        #[serde(rename = "qrImage")]
        qr_image: String,
    },
    Authenticated,
    AuthFailed,
    NotInitialized,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub account_id: String,
    pub auth_state: AuthState,
}

fn required(value: Option<String>, field: &str) -> Result<String, Error> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::invalid(format!("{field} is required")))
}

/// Resolve the session named by a request, then make sure it can send.
async fn sending_session(state: &AppState, account_id: Option<String>) -> ApiResult<Arc<Session>> {
    let account_id = required(account_id, "accountId")?;
    let session = state.registry.require(&account_id).await?;
    session.connection().ensure_authenticated()?;
    Ok(session)
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len().await,
    }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.list().await)
}

pub async fn start_session(
    State(state): State<AppState>,
    body: JsonBody<StartSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let account_id = required(req.account_id, "accountId")?;
    let webhook_url = req
        .webhook_url
        .filter(|u| !u.trim().is_empty())
        .map(|u| Url::parse(u.trim()))
        .transpose()
        .map_err(|e| Error::invalid(format!("invalid webhookUrl: {e}")))?;

    let session = state.registry.start_session(&account_id, webhook_url).await?;
    Ok(Json(json!({
        "status": "started",
        "accountId": session.account_id(),
        "authState": session.auth_state(),
    })))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.stop_session(&account_id).await?;
    Ok(Json(json!({ "status": "stopped" })))
}

pub async fn qr_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Json<QrStatus> {
    let Some(session) = state.registry.get(&account_id).await else {
        return Json(QrStatus::NotInitialized);
    };
    let snapshot = session.connection().state();
    let status = match snapshot.qr_image() {
        Some(qr) => QrStatus::Scan {
            qr_image: qr.to_data_url(),
        },
        None => match snapshot.auth_state() {
            AuthState::Authenticated => QrStatus::Authenticated,
            AuthState::AuthFailed => QrStatus::AuthFailed,
            AuthState::Uninitialized | AuthState::AwaitingScan | AuthState::Disconnected => {
                QrStatus::NotInitialized
            },
        },
    };
    Json(status)
}

pub async fn auth_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<AuthStatusResponse>> {
    let session = state.registry.require(&account_id).await?;
    Ok(Json(AuthStatusResponse {
        account_id: session.account_id().to_string(),
        auth_state: session.auth_state(),
    }))
}

pub async fn send_text(
    State(state): State<AppState>,
    body: JsonBody<SendTextRequest>,
) -> ApiResult<Json<SendResponse>> {
    let Json(req) = body?;
    let session = sending_session(&state, req.account_id).await?;
    let to = required(req.to, "to")?;
    let text = req
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::invalid("text is required"))?;

    session.connection().send_text(&to, &text).await?;
    info!(account_id = session.account_id(), to, "text sent");
    Ok(Json(SENT))
}

pub async fn send_media(
    State(state): State<AppState>,
    body: JsonBody<SendMediaRequest>,
) -> ApiResult<Json<SendResponse>> {
    let Json(req) = body?;
    let session = sending_session(&state, req.account_id).await?;
    let to = required(req.to, "to")?;
    let mime_type = required(req.mime_type, "mimeType")?;
    let data = required(req.media_base64, "mediaBase64")?;
    let media = OutboundMedia::from_base64(&mime_type, &data, req.filename, req.caption)?;

    session.connection().send_media(&to, &media).await?;
    info!(account_id = session.account_id(), to, mime_type, "media sent");
    Ok(Json(SENT))
}

pub async fn send_structured(
    State(state): State<AppState>,
    body: JsonBody<SendStructuredRequest>,
) -> ApiResult<Json<SendResponse>> {
    let Json(req) = body?;
    let session = sending_session(&state, req.account_id).await?;
    let to = required(req.to, "to")?;
    let kind = required(req.kind, "kind")?;
    let payload = req
        .payload
        .ok_or_else(|| Error::invalid("payload is required"))?;
    let message = StructuredMessage::from_parts(&kind, payload)?;

    session.connection().send_structured(&to, &message).await?;
    info!(account_id = session.account_id(), to, kind, "structured message sent");
    Ok(Json(SENT))
}

pub async fn send_presence(
    State(state): State<AppState>,
    body: JsonBody<PresenceRequest>,
) -> ApiResult<Json<SendResponse>> {
    let Json(req) = body?;
    let session = sending_session(&state, req.account_id).await?;
    let to = required(req.to, "to")?;
    let action: PresenceAction = required(req.action, "action")?.parse()?;

    session.connection().send_presence(&to, action).await?;
    Ok(Json(SENT))
}

#[cfg(feature = "prometheus")]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => crate::error::ApiError(Error::NotFound("metrics".into())).into_response(),
    }
}
