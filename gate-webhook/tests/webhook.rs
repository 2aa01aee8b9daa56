//! In-process route tests driven through `tower::Service` rather than a
//! live socket (no network, no store round-trip — these exercise axum's own
//! method/path dispatch, which runs before any verifier logic).
#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use gate_core::notifier::AnyNotifier;
use gate_core::notifier::SlackConfig;
use gate_core::notifier::SlackNotifier;
use gate_core::store::RestStore;
use tower::ServiceExt;

fn test_router() -> axum::Router {
    let store = RestStore::new("https://example.invalid", "anon");
    let messenger = AnyNotifier::Slack(SlackNotifier::new(SlackConfig {
        bot_token: "xoxb-test".to_string(),
        channel_id: "C1".to_string(),
    }));
    let state = gate_webhook::state::AppState {
        store: std::sync::Arc::new(store),
        messenger: std::sync::Arc::new(messenger),
        slack_signing_secret: None,
        telegram_webhook_secret: None,
        twilio_auth_token: None,
        machine_id_secret: None,
    };
    gate_webhook::routes::router(state)
}

#[tokio::test]
async fn non_post_method_is_rejected() {
    let app = test_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/callbacks/slack")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let app = test_router();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/callbacks/unknown-provider")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

