//! Signed-body provider callback (spec §6): `payload=<json>` form field,
//! `X-Slack-Signature` / `X-Slack-Request-Timestamp` headers.

use axum::body::Bytes;
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
use gate_protocol::provider::SlackInteractionPayload;
use gate_protocol::Status;
use serde_json::json;
use tracing::warn;

use crate::response::ApiError;
use crate::state::AppState;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let identifier = super::caller_identifier(&headers).unwrap_or_else(|| "unknown".to_string());
    verifier::check_rate_limit(state.store.as_ref(), &identifier).await?;

    let signing_secret = state
        .slack_signing_secret
        .as_deref()
        .ok_or_else(|| GateError::Config("SLACK_SIGNING_SECRET not configured".to_string()))?;

    verifier::verify_signed_body(
        header_str(&headers, "x-slack-request-timestamp"),
        header_str(&headers, "x-slack-signature"),
        &body,
        signing_secret,
    )?;

    let form: std::collections::HashMap<String, String> =
        serde_urlencoded::from_bytes(&body).map_err(|e| GateError::InputMalformed(e.to_string()))?;
    let raw_payload = form
        .get("payload")
        .ok_or_else(|| GateError::InputMalformed("missing payload field".to_string()))?;
    let payload: SlackInteractionPayload =
        serde_json::from_str(raw_payload).map_err(GateError::from)?;

    let first_action = payload
        .actions
        .first()
        .ok_or_else(|| GateError::InputMalformed("missing action".to_string()))?;
    let action = first_action
        .callback_action()
        .ok_or_else(|| GateError::InputMalformed("unrecognized action".to_string()))?;
    let id = verifier::parse_request_id(&first_action.value)?;

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
    let actor = payload.user.handle();
    verifier::transition(state.store.as_ref(), id, new_status, actor.clone()).await?;

    if let (AnyNotifier::Slack(notifier), Some(response_url)) =
        (state.messenger.as_ref(), payload.response_url.as_deref())
    {
        let verb = match new_status {
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::Pending | Status::Timeout => "updated",
        };
        let text = format!("Request `{id}` {verb} by {actor}.");
        if let Err(e) = notifier.acknowledge_via_response_url(response_url, &text).await {
            warn!("failed to update slack message via response_url: {e}");
        }
    }

    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))).into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
