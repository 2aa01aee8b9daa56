//! Shared-secret-header provider callback (spec §6): whole-body JSON,
//! `X-Telegram-Bot-Api-Secret-Token` header.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use gate_core::notifier::AnyNotifier;
use gate_core::verifier;
use gate_core::verifier::RowCheckOutcome;
use gate_core::GateError;
use gate_protocol::provider::CallbackAction;
use gate_protocol::provider::TelegramUpdate;
use gate_protocol::Status;
use serde_json::json;
use tracing::warn;

use crate::response::ApiError;
use crate::state::AppState;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<TelegramUpdate>,
) -> Result<Response, ApiError> {
    let identifier = super::caller_identifier(&headers).unwrap_or_else(|| "unknown".to_string());
    verifier::check_rate_limit(state.store.as_ref(), &identifier).await?;

    let configured_secret = state
        .telegram_webhook_secret
        .as_deref()
        .ok_or_else(|| GateError::Config("TELEGRAM_WEBHOOK_SECRET not configured".to_string()))?;
    verifier::verify_shared_secret(
        headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok()),
        configured_secret,
    )?;

    let callback = update
        .callback_query
        .as_ref()
        .ok_or_else(|| GateError::InputMalformed("missing callback_query".to_string()))?;
    let (action, raw_id) = callback
        .parse_action()
        .ok_or_else(|| GateError::InputMalformed("unrecognized callback data".to_string()))?;
    let id = verifier::parse_request_id(raw_id)?;

    let outcome =
        verifier::fetch_and_check_row(state.store.as_ref(), id, state.machine_id_secret.as_deref(), 600)
            .await?;
    if matches!(outcome, RowCheckOutcome::AlreadyResolved(_)) {
        return Ok((StatusCode::OK, Json(json!({ "status": "already resolved" }))).into_response());
    }

    let new_status = match action {
        CallbackAction::Approve => Status::Approved,
        CallbackAction::Reject => Status::Rejected,
    };
    let actor = callback.from.handle();
    verifier::transition(state.store.as_ref(), id, new_status, actor.clone()).await?;

    if let AnyNotifier::Telegram(notifier) = state.messenger.as_ref() {
        let verb = match new_status {
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Pending | Status::Timeout => "updated",
        };
        if let Err(e) = notifier
            .answer_callback_query(&callback.id, &format!("Request {verb}"))
            .await
        {
            warn!("failed to answer telegram callback query: {e}");
        }
        if let Some(message) = callback.message.as_ref() {
            if let Err(e) = notifier
                .strip_keyboard(message.chat.id, message.message_id)
                .await
            {
                warn!("failed to strip telegram keyboard: {e}");
            }
        }
    }

    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))).into_response())
}
