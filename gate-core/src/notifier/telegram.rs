use serde_json::json;
use std::time::Duration;

use crate::error::GateError;
use crate::error::Result;
use crate::mask::mask_secrets;

use super::NotificationPrompt;
use super::Notifier;
use super::ProbeHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.config.bot_token)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| GateError::Notify(mask_secrets(&e.to_string())))?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GateError::Notify(mask_secrets(&e.to_string())))?;

        if value.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let description = value
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown telegram error");
            return Err(GateError::Notify(format!("telegram {method} failed: {description}")));
        }
        Ok(value)
    }
}

impl Notifier for TelegramNotifier {
    async fn send_notification(&self, prompt: &NotificationPrompt) -> Result<()> {
        let text = format!(
            "[{severity}] approval requested for `{cmd}` in `{cwd}`\n{reason}",
            severity = format!("{:?}", prompt.severity).to_uppercase(),
            cmd = prompt.masked_command,
            cwd = prompt.cwd,
            reason = prompt.reason,
        );

        let keyboard = json!({
            "inline_keyboard": [[
                { "text": "Approve", "callback_data": format!("approve:{}", prompt.request_id) },
                { "text": "Reject", "callback_data": format!("reject:{}", prompt.request_id) },
            ]]
        });

        self.call(
            "sendMessage",
            json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "reply_markup": keyboard,
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_test(&self) -> Result<()> {
        self.call(
            "sendMessage",
            json!({ "chat_id": self.config.chat_id, "text": "test message from approval gate" }),
        )
        .await?;
        Ok(())
    }

    async fn probe_connection(&self) -> Result<ProbeHandle> {
        let value = self.call("getMe", json!({})).await?;
        let result = value.get("result").cloned().unwrap_or_default();
        let bot_name = result
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let account_name = result
            .get("first_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(ProbeHandle {
            bot_name,
            account_name,
        })
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.bot_token.trim().is_empty() {
            return Err(GateError::Config("telegram bot token is empty".to_string()));
        }
        if self.config.chat_id.trim().is_empty() {
            return Err(GateError::Config("telegram chat id is empty".to_string()));
        }
        Ok(())
    }
}

impl TelegramNotifier {
    /// Acknowledges the button tap itself (the small toast Telegram shows
    /// the user), per spec §4.7 step 9's user-acknowledgement requirement.
    pub async fn answer_callback_query(&self, callback_query_id: &str, text: &str) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_query_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    /// Strips the Approve/Reject keyboard from the original message so a
    /// second tap can't re-race an already-resolved row.
    pub async fn strip_keyboard(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.call(
            "editMessageReplyMarkup",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "reply_markup": { "inline_keyboard": [] },
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_token() {
        let n = TelegramNotifier::new(TelegramConfig {
            bot_token: "123:ABC".to_string(),
            chat_id: "1".to_string(),
        });
        assert_eq!(n.api_url("getMe"), "https://api.telegram.org/bot123:ABC/getMe");
    }

    #[test]
    fn validate_config_rejects_empty_chat_id() {
        let n = TelegramNotifier::new(TelegramConfig {
            bot_token: "123:ABC".to_string(),
            chat_id: String::new(),
        });
        assert!(n.validate_config().is_err());
    }
}
