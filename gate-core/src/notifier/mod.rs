//! The notifier (spec §4.5): polymorphic over the three supported chat
//! providers, each implementing the same four operations.

mod slack;
mod telegram;
mod twilio;

pub use slack::SlackConfig;
pub use slack::SlackNotifier;
pub use telegram::TelegramConfig;
pub use telegram::TelegramNotifier;
pub use twilio::TwilioConfig;
pub use twilio::TwilioNotifier;

use chrono::DateTime;
use chrono::Utc;
use gate_protocol::Severity;
use std::future::Future;
use uuid::Uuid;

use crate::error::Result;

/// Everything a notifier needs to render the approval prompt (spec §4.5).
#[derive(Debug, Clone)]
pub struct NotificationPrompt {
    pub request_id: Uuid,
    pub severity: Severity,
    pub reason: String,
    pub masked_command: String,
    pub cwd: String,
    pub timestamp: DateTime<Utc>,
}

/// A display handle returned by a successful credential probe: bot name plus
/// an account-friendly name, shown to the operator so they know which
/// credentials are wired up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHandle {
    pub bot_name: String,
    pub account_name: String,
}

pub trait Notifier: Send + Sync {
    /// Sends the approval prompt with approve/reject affordances bound to
    /// `prompt.request_id`.
    fn send_notification(
        &self,
        prompt: &NotificationPrompt,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Sends a no-op-effect test message, to confirm delivery works.
    fn send_test(&self) -> impl Future<Output = Result<()>> + Send;

    /// Authenticates credentials against the provider and returns a display
    /// handle on success.
    fn probe_connection(&self) -> impl Future<Output = Result<ProbeHandle>> + Send;

    /// Purely structural check — no network calls.
    fn validate_config(&self) -> Result<()>;
}

/// Dispatches to whichever provider is configured. `gate-hook` holds one of
/// these rather than a trait object, since the set of variants is closed
/// and known at compile time.
pub enum AnyNotifier {
    Slack(SlackNotifier),
    Telegram(TelegramNotifier),
    Twilio(TwilioNotifier),
}

impl AnyNotifier {
    pub async fn send_notification(&self, prompt: &NotificationPrompt) -> Result<()> {
        match self {
            AnyNotifier::Slack(n) => n.send_notification(prompt).await,
            AnyNotifier::Telegram(n) => n.send_notification(prompt).await,
            AnyNotifier::Twilio(n) => n.send_notification(prompt).await,
        }
    }

    pub async fn send_test(&self) -> Result<()> {
        match self {
            AnyNotifier::Slack(n) => n.send_test().await,
            AnyNotifier::Telegram(n) => n.send_test().await,
            AnyNotifier::Twilio(n) => n.send_test().await,
        }
    }

    pub async fn probe_connection(&self) -> Result<ProbeHandle> {
        match self {
            AnyNotifier::Slack(n) => n.probe_connection().await,
            AnyNotifier::Telegram(n) => n.probe_connection().await,
            AnyNotifier::Twilio(n) => n.probe_connection().await,
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        match self {
            AnyNotifier::Slack(n) => n.validate_config(),
            AnyNotifier::Telegram(n) => n.validate_config(),
            AnyNotifier::Twilio(n) => n.validate_config(),
        }
    }
}
