//! Sorted-params-MAC provider callback (spec §6): form-encoded body,
//! `X-Twilio-Signature` header, TwiML XML response.

use axum::body::Bytes;
use axum::extract::OriginalUri;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use gate_core::verifier;
use gate_core::verifier::RowCheckOutcome;
use gate_core::GateError;
use gate_protocol::provider::CallbackAction;
use gate_protocol::provider::TwilioInboundSms;
use gate_protocol::Status;

use crate::response::ApiError;
use crate::state::AppState;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let identifier = super::caller_identifier(&headers).unwrap_or_else(|| "unknown".to_string());
    verifier::check_rate_limit(state.store.as_ref(), &identifier).await?;

    let auth_token = state
        .twilio_auth_token
        .as_deref()
        .ok_or_else(|| GateError::Config("TWILIO_AUTH_TOKEN not configured".to_string()))?;

    let params: Vec<(String, String)> = serde_urlencoded::from_bytes(&body)
        .map_err(|e| GateError::InputMalformed(e.to_string()))?;

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let full_url = format!("https://{host}{uri}");

    verifier::verify_sorted_params_mac(
        &full_url,
        &params,
        headers.get("x-twilio-signature").and_then(|v| v.to_str().ok()),
        auth_token,
    )?;

    let sms: TwilioInboundSms = serde_urlencoded::from_bytes(&body)
        .map_err(|e| GateError::InputMalformed(e.to_string()))?;
    let (action, raw_id) = sms
        .parse_action()
        .ok_or_else(|| GateError::InputMalformed("unrecognized SMS body".to_string()))?;
    let id = verifier::parse_request_id(&raw_id)?;

    let outcome =
        verifier::fetch_and_check_row(state.store.as_ref(), id, state.machine_id_secret.as_deref(), 600)
            .await?;

    if matches!(outcome, RowCheckOutcome::AlreadyResolved(_)) {
        return Ok(twiml("This request was already resolved."));
    }

    let new_status = match action {
        CallbackAction::Approve => Status::Approved,
        CallbackAction::Reject => Status::Rejected,
    };
    verifier::transition(state.store.as_ref(), id, new_status, sms.from.clone()).await?;

    let message = match action {
        CallbackAction::Approve => "Approved.",
        CallbackAction::Reject => "Rejected.",
    };
    Ok(twiml(message))
}

fn twiml(message: &str) -> Response {
    let body = format!("<Response><Message>{message}</Message></Response>");
    (
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response()
}
