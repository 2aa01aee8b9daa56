//! Shared state for the webhook's route handlers: the store handle plus the
//! per-provider secrets spec §6 requires, each env-preferred over the config
//! file the same way `gate-core::config` prefers env for the hook side.

use gate_core::config::GateConfig;
use gate_core::notifier::AnyNotifier;
use gate_core::store::RestStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RestStore>,
    pub messenger: Arc<AnyNotifier>,
    pub slack_signing_secret: Option<String>,
    pub telegram_webhook_secret: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub machine_id_secret: Option<String>,
}

impl AppState {
    pub fn from_config(config: &GateConfig, store: RestStore) -> gate_core::Result<Self> {
        let slack_signing_secret = std::env::var("SLACK_SIGNING_SECRET").ok();
        let telegram_webhook_secret = std::env::var("TELEGRAM_WEBHOOK_SECRET").ok();
        let twilio_auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok().or_else(|| {
            config
                .toml
                .messenger
                .twilio
                .as_ref()
                .map(|t| t.auth_token.clone())
        });

        Ok(Self {
            store: Arc::new(store),
            messenger: Arc::new(config.build_notifier()?),
            slack_signing_secret,
            telegram_webhook_secret,
            twilio_auth_token,
            machine_id_secret: config.machine_id_secret(),
        })
    }
}
