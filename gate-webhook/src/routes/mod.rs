pub mod slack;
pub mod telegram;
pub mod twilio;

use crate::state::AppState;
use axum::routing::post;
use axum::Router;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/callbacks/slack", post(slack::handle))
        .route("/callbacks/telegram", post(telegram::handle))
        .route("/callbacks/twilio", post(twilio::handle))
        .with_state(state)
}

/// Rate-limit identifier from the documented header preference order
/// (spec §4.7 step 2).
pub(crate) fn caller_identifier(headers: &axum::http::HeaderMap) -> Option<String> {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    gate_core::verifier::caller_identifier(
        header_str("cf-connecting-ip"),
        header_str("x-real-ip"),
        header_str("x-forwarded-for"),
    )
}
