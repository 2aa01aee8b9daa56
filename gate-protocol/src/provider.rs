//! Bit-exact wire shapes for the three supported chat provider callbacks
//! (spec §6). These are intentionally dumb data carriers; the verification
//! and business logic live in `gate_core::verifier`.

use serde::Deserialize;
use serde::Serialize;

/// Outcome the user picked in chat, before it is resolved to a `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Approve,
    Reject,
}

/// Slack-style `block_actions` interactive payload, delivered as the
/// `payload` field of an `application/x-www-form-urlencoded` POST body.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackInteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: SlackUser,
    pub actions: Vec<SlackAction>,
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    pub username: Option<String>,
    pub name: Option<String>,
    pub id: String,
}

impl SlackUser {
    /// Username, falling back to display name, falling back to the opaque
    /// member id (spec §4.7 step 8).
    pub fn handle(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackAction {
    pub action_id: String,
    pub value: String,
}

impl SlackAction {
    pub fn callback_action(&self) -> Option<CallbackAction> {
        match self.action_id.as_str() {
            "approve_command" => Some(CallbackAction::Approve),
            "reject_command" => Some(CallbackAction::Reject),
            _ => None,
        }
    }
}

/// Telegram-style bot API update, delivered as the whole JSON body.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn handle(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| self.first_name.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

impl TelegramCallbackQuery {
    /// Parses `"approve:<id>"` / `"reject:<id>"` out of `data`.
    pub fn parse_action(&self) -> Option<(CallbackAction, &str)> {
        let data = self.data.as_deref()?;
        let (prefix, id) = data.split_once(':')?;
        let action = match prefix {
            "approve" => CallbackAction::Approve,
            "reject" => CallbackAction::Reject,
            _ => return None,
        };
        Some((action, id))
    }
}

/// Twilio-style inbound SMS webhook, delivered form-encoded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwilioInboundSms {
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "From")]
    pub from: String,
}

impl TwilioInboundSms {
    /// Matches `^(APPROVE|REJECT)\s+<id>$` case-insensitively.
    pub fn parse_action(&self) -> Option<(CallbackAction, String)> {
        let trimmed = self.body.trim();
        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let verb = parts.next()?.to_ascii_uppercase();
        let id = parts.next()?.trim();
        if id.is_empty() {
            return None;
        }
        let action = match verb.as_str() {
            "APPROVE" => CallbackAction::Approve,
            "REJECT" => CallbackAction::Reject,
            _ => return None,
        };
        Some((action, id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slack_user_handle_prefers_username() {
        let u = SlackUser {
            username: Some("alice".into()),
            name: Some("Alice A".into()),
            id: "U123".into(),
        };
        assert_eq!(u.handle(), "alice");
    }

    #[test]
    fn slack_user_handle_falls_back_to_id() {
        let u = SlackUser {
            username: None,
            name: None,
            id: "U123".into(),
        };
        assert_eq!(u.handle(), "U123");
    }

    #[test]
    fn slack_action_maps_to_callback_action() {
        let a = SlackAction {
            action_id: "approve_command".into(),
            value: "req-1".into(),
        };
        assert_eq!(a.callback_action(), Some(CallbackAction::Approve));
    }

    #[test]
    fn telegram_parses_prefixed_data() {
        let q = TelegramCallbackQuery {
            id: "1".into(),
            from: TelegramUser {
                id: 1,
                first_name: "Bob".into(),
                last_name: None,
                username: None,
            },
            message: None,
            data: Some("reject:abc-123".into()),
        };
        assert_eq!(
            q.parse_action(),
            Some((CallbackAction::Reject, "abc-123"))
        );
    }

    #[test]
    fn twilio_parses_case_insensitive_body() {
        let sms = TwilioInboundSms {
            body: "approve abc-123".into(),
            from: "+15551234567".into(),
        };
        assert_eq!(
            sms.parse_action(),
            Some((CallbackAction::Approve, "abc-123".to_string()))
        );
    }

    #[test]
    fn twilio_rejects_malformed_body() {
        let sms = TwilioInboundSms {
            body: "please approve this".into(),
            from: "+15551234567".into(),
        };
        assert_eq!(sms.parse_action(), None);
    }
}
