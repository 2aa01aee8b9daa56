//! Configuration loading (spec §6's config table): a single TOML document,
//! merged with environment overrides, with the clamping/weakening guards
//! spec §4.6 and §6 require.

use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;

use crate::coordinator::DefaultAction;
use crate::coordinator::MIN_ENV_OVERRIDE_TIMEOUT_SECS;
use crate::coordinator::MIN_TIMEOUT_SECS;
use crate::error::GateError;
use crate::error::Result;
use crate::notifier::AnyNotifier;
use crate::notifier::SlackConfig;
use crate::notifier::SlackNotifier;
use crate::notifier::TelegramConfig;
use crate::notifier::TelegramNotifier;
use crate::notifier::TwilioConfig;
use crate::notifier::TwilioNotifier;
use crate::rules::DangerPattern;
use crate::rules::RuleSet;

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_HOME_ENV: &str = "GATE_HOME";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigToml {
    pub messenger: MessengerToml,
    pub store: StoreToml,
    #[serde(default)]
    pub rules: RulesToml,
    pub machine_id_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerToml {
    #[serde(rename = "type")]
    pub kind: String,
    pub slack: Option<SlackToml>,
    pub telegram: Option<TelegramToml>,
    pub twilio: Option<TwilioToml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackToml {
    pub bot_token: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramToml {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioToml {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreToml {
    pub url: String,
    pub anon_key: String,
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RulesToml {
    pub timeout_seconds: Option<u64>,
    pub default_action: Option<String>,
    #[serde(default)]
    pub custom_patterns: Vec<CustomPatternToml>,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomPatternToml {
    pub pattern: String,
    pub severity: String,
    pub reason: String,
}

/// Resolved, post-clamping configuration the coordinator and webhook use.
pub struct GateConfig {
    pub toml: ConfigToml,
    pub timeout_secs: u64,
    pub default_action: DefaultAction,
}

impl GateConfig {
    /// Locates and parses `config.toml` under `$GATE_HOME` (defaulting to
    /// `~/.codex-gate`), then applies environment overrides.
    pub fn load() -> Result<Self> {
        let home = gate_home();
        let path = home.join(CONFIG_FILE_NAME);
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("reading {}: {e}", path.display())))?;
        let toml: ConfigToml = toml::from_str(&contents)
            .map_err(|e| GateError::Config(format!("parsing {}: {e}", path.display())))?;
        Self::from_toml(toml)
    }

    pub fn from_toml(toml: ConfigToml) -> Result<Self> {
        let configured_timeout = toml.rules.timeout_seconds.unwrap_or(60);
        let env_timeout = std::env::var("GATE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        let timeout_secs = match env_timeout {
            Some(v) => v.max(MIN_ENV_OVERRIDE_TIMEOUT_SECS),
            None => configured_timeout.max(MIN_TIMEOUT_SECS),
        };

        let configured_default_action = match toml.rules.default_action.as_deref() {
            Some("allow") => DefaultAction::Allow,
            _ => DefaultAction::Deny,
        };

        let env_default_action = std::env::var("GATE_DEFAULT_ACTION").ok().map(|v| {
            if v == "allow" {
                DefaultAction::Allow
            } else {
                DefaultAction::Deny
            }
        });

        let (default_action, refused) = crate::coordinator::apply_default_action_override(
            configured_default_action,
            env_default_action,
        );
        if refused {
            tracing::warn!(
                "GATE_DEFAULT_ACTION=allow refused: environment overrides cannot weaken deny to allow"
            );
        }

        Ok(Self {
            toml,
            timeout_secs,
            default_action,
        })
    }

    /// Builds the configured notifier variant (factory keyed on
    /// `messenger.type`, spec §9).
    pub fn build_notifier(&self) -> Result<AnyNotifier> {
        match self.toml.messenger.kind.as_str() {
            "slack" => {
                let cfg = self
                    .toml
                    .messenger
                    .slack
                    .as_ref()
                    .ok_or_else(|| GateError::Config("messenger.slack is required".to_string()))?;
                Ok(AnyNotifier::Slack(SlackNotifier::new(SlackConfig {
                    bot_token: env_or(
                        "SLACK_BOT_TOKEN",
                        &cfg.bot_token,
                    ),
                    channel_id: cfg.channel_id.clone(),
                })))
            }
            "telegram" => {
                let cfg = self.toml.messenger.telegram.as_ref().ok_or_else(|| {
                    GateError::Config("messenger.telegram is required".to_string())
                })?;
                Ok(AnyNotifier::Telegram(TelegramNotifier::new(TelegramConfig {
                    bot_token: env_or("TELEGRAM_BOT_TOKEN", &cfg.bot_token),
                    chat_id: cfg.chat_id.clone(),
                })))
            }
            "twilio" => {
                let cfg = self
                    .toml
                    .messenger
                    .twilio
                    .as_ref()
                    .ok_or_else(|| GateError::Config("messenger.twilio is required".to_string()))?;
                Ok(AnyNotifier::Twilio(TwilioNotifier::new(TwilioConfig {
                    account_sid: cfg.account_sid.clone(),
                    auth_token: env_or("TWILIO_AUTH_TOKEN", &cfg.auth_token),
                    from_number: cfg.from_number.clone(),
                    to_number: cfg.to_number.clone(),
                })))
            }
            other => Err(GateError::Config(format!("unknown messenger.type: {other}"))),
        }
    }

    /// The HMAC secret shared with the webhook for machine-identity
    /// signing, preferring `MACHINE_ID_SECRET` over the config file value.
    pub fn machine_id_secret(&self) -> Option<String> {
        std::env::var("MACHINE_ID_SECRET")
            .ok()
            .or_else(|| self.toml.machine_id_secret.clone())
    }

    /// Store URL, preferring `GATE_STORE_URL` over the config file value
    /// (spec §6's "Environment overrides (webhook)" row).
    pub fn store_url(&self) -> String {
        env_or("GATE_STORE_URL", &self.toml.store.url)
    }

    /// Store service-role credential, preferring `GATE_STORE_SERVICE_KEY`
    /// over the config file value.
    pub fn store_service_key(&self) -> Option<String> {
        std::env::var("GATE_STORE_SERVICE_KEY")
            .ok()
            .or_else(|| self.toml.store.service_key.clone())
    }

    pub fn build_rule_set(&self) -> RuleSet {
        let custom_patterns = self
            .toml
            .rules
            .custom_patterns
            .iter()
            .map(|p| {
                let severity = match p.severity.to_ascii_lowercase().as_str() {
                    "critical" => gate_protocol::Severity::Critical,
                    "high" => gate_protocol::Severity::High,
                    "medium" => gate_protocol::Severity::Medium,
                    _ => gate_protocol::Severity::Low,
                };
                DangerPattern::new(&p.pattern, severity, &p.reason)
            })
            .collect();
        RuleSet::new(custom_patterns, self.toml.rules.whitelist.clone())
    }
}

fn gate_home() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_HOME_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codex-gate")
}

/// Secrets are read preferentially from the named environment variable,
/// falling back to the config-file value (spec §6, §13).
fn env_or(env_var: &str, fallback: &str) -> String {
    std::env::var(env_var).unwrap_or_else(|_| fallback.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_toml() -> ConfigToml {
        toml::from_str(
            r#"
            [messenger]
            type = "slack"
            [messenger.slack]
            botToken = "xoxb-test"
            channelId = "C1"
            [store]
            url = "https://example.supabase.co"
            anonKey = "anon"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn default_timeout_respects_minimum_floor() {
        let cfg = GateConfig::from_toml(sample_toml()).unwrap();
        assert!(cfg.timeout_secs >= MIN_TIMEOUT_SECS);
    }

    #[test]
    fn default_action_defaults_to_deny() {
        let cfg = GateConfig::from_toml(sample_toml()).unwrap();
        assert_eq!(cfg.default_action, DefaultAction::Deny);
    }

    #[test]
    fn build_notifier_selects_configured_variant() {
        let cfg = GateConfig::from_toml(sample_toml()).unwrap();
        assert!(matches!(cfg.build_notifier().unwrap(), AnyNotifier::Slack(_)));
    }

    #[test]
    fn build_notifier_errors_on_missing_section() {
        let mut toml = sample_toml();
        toml.messenger.slack = None;
        let cfg = GateConfig::from_toml(toml).unwrap();
        assert!(cfg.build_notifier().is_err());
    }
}
