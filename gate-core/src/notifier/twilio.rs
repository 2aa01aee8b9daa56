use std::time::Duration;

use crate::error::GateError;
use crate::error::Result;
use crate::mask::mask_secrets;

use super::NotificationPrompt;
use super::Notifier;
use super::ProbeHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Twilio is text-only: no inline buttons, so the prompt instructs the user
/// to reply with a verb and the request id (spec §4.5).
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

pub struct TwilioNotifier {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioNotifier {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn base_url(&self) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}",
            self.config.account_sid
        )
    }

    async fn send_sms(&self, body: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/Messages.json", self.base_url()))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("From", self.config.from_number.as_str()),
                ("To", self.config.to_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| GateError::Notify(mask_secrets(&e.to_string())))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GateError::Notify(format!(
                "twilio send failed with status {status}: {}",
                mask_secrets(&text)
            )));
        }
        Ok(())
    }
}

impl Notifier for TwilioNotifier {
    async fn send_notification(&self, prompt: &NotificationPrompt) -> Result<()> {
        let body = format!(
            "[{severity}] {cmd} (in {cwd}): {reason}\nReply APPROVE {id} or REJECT {id}",
            severity = format!("{:?}", prompt.severity).to_uppercase(),
            cmd = prompt.masked_command,
            cwd = prompt.cwd,
            reason = prompt.reason,
            id = prompt.request_id,
        );
        self.send_sms(&body).await
    }

    async fn send_test(&self) -> Result<()> {
        self.send_sms("test message from approval gate").await
    }

    async fn probe_connection(&self) -> Result<ProbeHandle> {
        let resp = self
            .client
            .get(format!("{}.json", self.base_url()))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| GateError::Notify(mask_secrets(&e.to_string())))?;

        if !resp.status().is_success() {
            return Err(GateError::Notify(format!(
                "twilio account probe failed with status {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GateError::Notify(mask_secrets(&e.to_string())))?;

        let account_name = value
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(ProbeHandle {
            bot_name: self.config.from_number.clone(),
            account_name,
        })
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.account_sid.trim().is_empty() || self.config.auth_token.trim().is_empty() {
            return Err(GateError::Config("twilio credentials are incomplete".to_string()));
        }
        if self.config.from_number.trim().is_empty() || self.config.to_number.trim().is_empty() {
            return Err(GateError::Config("twilio from/to numbers are incomplete".to_string()));
        }
        Ok(())
    }
}
