//! The approval coordinator (spec §4.6): the hook-side state machine.
//! `parse_input → classify → persist_request → notify_user → await_verdict`
//! racing remote/local/deadline, falling through to `default_action` on any
//! failure along the way.
//!
//! The three-way race mirrors the teacher's `exec.rs` `tokio::select!`
//! between a process wait and a ctrl-c `Notify`, generalized to a third arm.

use chrono::Utc;
use gate_protocol::ApprovalRequest;
use gate_protocol::Decision;
use gate_protocol::HookEvent;
use gate_protocol::HookOutput;
use gate_protocol::Status;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;

use crate::identity;
use crate::mask::mask_secrets;
use crate::notifier::AnyNotifier;
use crate::notifier::NotificationPrompt;
use crate::rules::Classification;
use crate::rules::RuleSet;
use crate::store::StatusPatch;
use crate::store::Store;

/// Minimum coordinator deadline, and the higher floor enforced when the
/// timeout comes from an environment override (spec §4.6, §6).
pub const MIN_TIMEOUT_SECS: u64 = 10;
pub const MIN_ENV_OVERRIDE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Allow,
    Deny,
}

impl DefaultAction {
    fn into_decision(self, reason: impl Into<String>) -> HookOutput {
        match self {
            DefaultAction::Allow => HookOutput::allow_with_reason(reason),
            DefaultAction::Deny => HookOutput::deny(reason),
        }
    }
}

pub struct CoordinatorConfig {
    pub timeout: Duration,
    pub default_action: DefaultAction,
    pub machine_id_secret: Option<String>,
    pub cwd: String,
}

/// Runs one full coordinator invocation for `event`, producing exactly one
/// `HookOutput`. `rules` classifies, `store` persists/subscribes, `notifier`
/// sends the prompt; `terminal` opens the process-controlling TTY for the
/// local wait (kept as a trait object so tests can substitute a fake one).
pub async fn run<S: Store>(
    event: &HookEvent,
    rules: &RuleSet,
    store: &S,
    notifier: &AnyNotifier,
    terminal: &dyn TerminalSource,
    config: &CoordinatorConfig,
) -> HookOutput {
    // Covers both "not the shell tool" and "command absent" — spec §4.6
    // treats them identically (trivial allow).
    let Some(command) = event.shell_command() else {
        return HookOutput::allow();
    };

    if command.trim().is_empty() {
        return HookOutput::deny("empty command");
    }

    let classification = rules.classify(command);
    let (severity, reason) = match classification {
        Classification::Safe { .. } => return HookOutput::allow(),
        Classification::Dangerous { severity, reason, .. } => (severity, reason),
    };

    let masked_command = mask_secrets(command);

    let row = match persist_request(store, &masked_command, &reason, severity, config).await {
        Ok(row) => row,
        Err(err) => {
            warn!(error = %err, "failed to persist approval request");
            return config
                .default_action
                .into_decision(format!("persist_request failed: {err}"));
        }
    };

    let prompt = NotificationPrompt {
        request_id: row.id,
        severity,
        reason: reason.clone(),
        masked_command: masked_command.clone(),
        cwd: config.cwd.clone(),
        timestamp: row.created_at,
    };

    if let Err(err) = notifier.send_notification(&prompt).await {
        warn!(error = %err, "failed to notify user");
        return config
            .default_action
            .into_decision(format!("notify_user failed: {err}"));
    }

    await_verdict(store, terminal, row.id, config).await
}

async fn persist_request<S: Store>(
    store: &S,
    masked_command: &str,
    danger_reason: &str,
    severity: gate_protocol::Severity,
    config: &CoordinatorConfig,
) -> crate::error::Result<ApprovalRequest> {
    let fingerprint = identity::fingerprint();
    let signed = config
        .machine_id_secret
        .as_deref()
        .map(|secret| identity::sign(&fingerprint, secret))
        .transpose()?;

    let row = ApprovalRequest::new_pending(
        uuid::Uuid::new_v4(),
        masked_command.to_string(),
        danger_reason.to_string(),
        severity,
        config.cwd.clone(),
        fingerprint,
        Utc::now(),
    );

    store.insert(&row, signed.as_deref()).await?;
    Ok(row)
}

/// Source of the process-controlling terminal for the local wait. Kept as a
/// trait so unit tests can simulate "no TTY available" / scripted input
/// without a real pty.
pub trait TerminalSource: Send + Sync {
    fn open(&self) -> Option<Box<dyn tokio::io::AsyncRead + Unpin + Send>>;
}

/// Opens `/dev/tty`, the process's controlling terminal — distinct from the
/// already-consumed stdin, which carries the hook event (spec §4.6).
pub struct RealTerminal;

impl TerminalSource for RealTerminal {
    fn open(&self) -> Option<Box<dyn tokio::io::AsyncRead + Unpin + Send>> {
        std::fs::OpenOptions::new()
            .read(true)
            .open("/dev/tty")
            .ok()
            .map(|f| {
                let async_file = tokio::fs::File::from_std(f);
                Box::new(async_file) as Box<dyn tokio::io::AsyncRead + Unpin + Send>
            })
    }
}

async fn await_verdict<S: Store>(
    store: &S,
    terminal: &dyn TerminalSource,
    id: uuid::Uuid,
    config: &CoordinatorConfig,
) -> HookOutput {
    let remote_wait = async {
        match store.subscribe(id).await {
            Ok(mut stream) => {
                use futures::StreamExt;
                while let Some(row) = stream.next().await {
                    if row.status != Status::Pending {
                        return Some(row.status);
                    }
                }
                None
            }
            Err(err) => {
                warn!(error = %err, "remote subscription failed, continuing without it");
                // Never resolves; local/timeout still race.
                std::future::pending::<Option<Status>>().await
            }
        }
    };

    let local_wait = async {
        match terminal.open() {
            Some(reader) => read_local_verdict(reader).await,
            None => {
                info!("no controlling terminal available, local wait will not participate");
                std::future::pending::<Option<Status>>().await
            }
        }
    };

    let deadline = tokio::time::sleep(config.timeout);

    tokio::pin!(remote_wait);
    tokio::pin!(local_wait);
    tokio::pin!(deadline);

    tokio::select! {
        Some(status) = &mut remote_wait => {
            decision_for(status, config, "resolved via remote approval")
        }
        Some(status) = &mut local_wait => {
            decision_for(status, config, "resolved via local terminal")
        }
        _ = &mut deadline => {
            mark_timeout_best_effort(store, id).await;
            config.default_action.into_decision("coordinator deadline reached")
        }
    }
}

fn decision_for(status: Status, config: &CoordinatorConfig, reason: &str) -> HookOutput {
    match status {
        Status::Approved => HookOutput::allow_with_reason(reason),
        Status::Rejected | Status::Timeout => HookOutput::deny(reason),
        Status::Pending => config.default_action.into_decision("unexpected pending status"),
    }
}

async fn mark_timeout_best_effort<S: Store>(store: &S, id: uuid::Uuid) {
    let patch = StatusPatch {
        status: Status::Timeout,
        resolved_at: Utc::now(),
        resolved_by: None,
    };
    if let Err(err) = store.update_where(id, Status::Pending, patch).await {
        warn!(error = %err, "failed to mark row as timed out (best effort)");
    }
}

async fn read_local_verdict(
    reader: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
) -> Option<Status> {
    eprintln!("Approve this command? [y/n]: ");
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim().to_ascii_lowercase();
                match trimmed.as_str() {
                    "y" | "yes" => return Some(Status::Approved),
                    "n" | "no" => return Some(Status::Rejected),
                    _ => {
                        eprintln!("Please answer y[es] or n[o]: ");
                        continue;
                    }
                }
            }
            Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

/// Clamps a configured timeout to the floors spec §4.6/§6 require.
/// `from_env` raises the floor to `MIN_ENV_OVERRIDE_TIMEOUT_SECS`.
pub fn clamp_timeout_secs(requested: u64, from_env: bool) -> u64 {
    let floor = if from_env {
        MIN_ENV_OVERRIDE_TIMEOUT_SECS
    } else {
        MIN_TIMEOUT_SECS
    };
    requested.max(floor)
}

/// Applies the "weakening refused" rule for `default_action`: an env
/// override from `deny` to `allow` is rejected and the configured value is
/// kept. Returns `(effective, was_refused)`.
pub fn apply_default_action_override(
    configured: DefaultAction,
    env_override: Option<DefaultAction>,
) -> (DefaultAction, bool) {
    match env_override {
        Some(DefaultAction::Allow) if configured == DefaultAction::Deny => (DefaultAction::Deny, true),
        Some(other) => (other, false),
        None => (configured, false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    /// Stands in for the realtime subscription half of the race.
    enum RemoteBehavior {
        Resolves { after: Duration, status: Status },
        NeverResolves,
    }

    struct FakeStore {
        remote: RemoteBehavior,
        update_where_calls: Arc<AtomicU64>,
    }

    fn sample_row(id: uuid::Uuid, status: Status) -> ApprovalRequest {
        ApprovalRequest {
            id,
            command: "rm -rf /".to_string(),
            danger_reason: "test".to_string(),
            severity: gate_protocol::Severity::Critical,
            cwd: "/tmp".to_string(),
            status,
            created_at: Utc::now(),
            resolved_at: Some(Utc::now()),
            resolved_by: Some("tester".to_string()),
            machine_id: "a".repeat(16),
        }
    }

    impl Store for FakeStore {
        async fn insert(
            &self,
            _row: &ApprovalRequest,
            _signed_identity: Option<&str>,
        ) -> crate::error::Result<()> {
            unreachable!("await_verdict tests never insert")
        }

        async fn update_where(
            &self,
            _id: uuid::Uuid,
            _expected_status: Status,
            _patch: StatusPatch,
        ) -> crate::error::Result<u64> {
            self.update_where_calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn select_single(&self, _id: uuid::Uuid) -> crate::error::Result<ApprovalRequest> {
            unreachable!("await_verdict tests never select")
        }

        async fn subscribe(
            &self,
            id: uuid::Uuid,
        ) -> crate::error::Result<Pin<Box<dyn Stream<Item = ApprovalRequest> + Send>>> {
            match self.remote {
                RemoteBehavior::Resolves { after, status } => {
                    let row = sample_row(id, status);
                    let stream = futures::stream::once(async move {
                        tokio::time::sleep(after).await;
                        row
                    });
                    Ok(Box::pin(stream))
                }
                RemoteBehavior::NeverResolves => Ok(Box::pin(futures::stream::pending())),
            }
        }

        async fn record_rate_limit_event(
            &self,
            _identifier: &str,
            _window: Duration,
        ) -> crate::error::Result<u64> {
            unreachable!("await_verdict tests never rate-limit")
        }

        async fn cleanup_expired(&self, _retention: Duration) -> crate::error::Result<u64> {
            unreachable!("await_verdict tests never clean up")
        }
    }

    /// Stands in for the controlling TTY half of the race. `unavailable`
    /// mirrors "no /dev/tty"; `scripted` feeds a canned y/n answer through
    /// `tokio_test`'s mock reader.
    struct FakeTerminal {
        reader: std::sync::Mutex<Option<Box<dyn tokio::io::AsyncRead + Unpin + Send>>>,
    }

    impl FakeTerminal {
        fn unavailable() -> Self {
            Self {
                reader: std::sync::Mutex::new(None),
            }
        }

        fn scripted(input: &'static [u8]) -> Self {
            let mock = tokio_test::io::Builder::new().read(input).build();
            Self {
                reader: std::sync::Mutex::new(Some(Box::new(mock))),
            }
        }
    }

    impl TerminalSource for FakeTerminal {
        fn open(&self) -> Option<Box<dyn tokio::io::AsyncRead + Unpin + Send>> {
            self.reader.lock().unwrap().take()
        }
    }

    fn test_config(timeout: Duration, default_action: DefaultAction) -> CoordinatorConfig {
        CoordinatorConfig {
            timeout,
            default_action,
            machine_id_secret: None,
            cwd: "/tmp".to_string(),
        }
    }

    #[tokio::test]
    async fn await_verdict_remote_resolution_wins_the_race() {
        let store = FakeStore {
            remote: RemoteBehavior::Resolves {
                after: Duration::from_millis(10),
                status: Status::Approved,
            },
            update_where_calls: Arc::new(AtomicU64::new(0)),
        };
        let terminal = FakeTerminal::unavailable();
        let config = test_config(Duration::from_secs(2), DefaultAction::Deny);

        let out = await_verdict(&store, &terminal, uuid::Uuid::new_v4(), &config).await;

        assert_eq!(out.decision, Decision::Allow);
        assert_eq!(store.update_where_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn await_verdict_local_resolution_wins_the_race() {
        let store = FakeStore {
            remote: RemoteBehavior::NeverResolves,
            update_where_calls: Arc::new(AtomicU64::new(0)),
        };
        let terminal = FakeTerminal::scripted(b"y\n");
        let config = test_config(Duration::from_secs(2), DefaultAction::Deny);

        let out = await_verdict(&store, &terminal, uuid::Uuid::new_v4(), &config).await;

        assert_eq!(out.decision, Decision::Allow);
        assert_eq!(store.update_where_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn await_verdict_local_rejection_wins_the_race() {
        let store = FakeStore {
            remote: RemoteBehavior::NeverResolves,
            update_where_calls: Arc::new(AtomicU64::new(0)),
        };
        let terminal = FakeTerminal::scripted(b"n\n");
        let config = test_config(Duration::from_secs(2), DefaultAction::Allow);

        let out = await_verdict(&store, &terminal, uuid::Uuid::new_v4(), &config).await;

        assert_eq!(out.decision, Decision::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn await_verdict_deadline_wins_and_marks_timeout() {
        let store = FakeStore {
            remote: RemoteBehavior::NeverResolves,
            update_where_calls: Arc::new(AtomicU64::new(0)),
        };
        let terminal = FakeTerminal::unavailable();
        let config = test_config(Duration::from_secs(5), DefaultAction::Allow);

        let out = await_verdict(&store, &terminal, uuid::Uuid::new_v4(), &config).await;

        assert_eq!(out.decision, Decision::Allow);
        assert_eq!(store.update_where_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clamp_timeout_enforces_default_floor() {
        assert_eq!(clamp_timeout_secs(1, false), MIN_TIMEOUT_SECS);
        assert_eq!(clamp_timeout_secs(100, false), 100);
    }

    #[test]
    fn clamp_timeout_enforces_env_floor() {
        assert_eq!(clamp_timeout_secs(30, true), MIN_ENV_OVERRIDE_TIMEOUT_SECS);
        assert_eq!(clamp_timeout_secs(120, true), 120);
    }

    #[test]
    fn default_action_override_refuses_weakening() {
        let (effective, refused) =
            apply_default_action_override(DefaultAction::Deny, Some(DefaultAction::Allow));
        assert_eq!(effective, DefaultAction::Deny);
        assert!(refused);
    }

    #[test]
    fn default_action_override_allows_strengthening() {
        let (effective, refused) =
            apply_default_action_override(DefaultAction::Allow, Some(DefaultAction::Deny));
        assert_eq!(effective, DefaultAction::Deny);
        assert!(!refused);
    }

    #[test]
    fn default_action_no_override_keeps_configured() {
        let (effective, refused) = apply_default_action_override(DefaultAction::Allow, None);
        assert_eq!(effective, DefaultAction::Allow);
        assert!(!refused);
    }

    #[test]
    fn decision_for_approved_allows() {
        let config = CoordinatorConfig {
            timeout: Duration::from_secs(10),
            default_action: DefaultAction::Deny,
            machine_id_secret: None,
            cwd: "/tmp".to_string(),
        };
        let out = decision_for(Status::Approved, &config, "test");
        assert_eq!(out.decision, Decision::Allow);
    }

    #[test]
    fn decision_for_timeout_denies() {
        let config = CoordinatorConfig {
            timeout: Duration::from_secs(10),
            default_action: DefaultAction::Allow,
            machine_id_secret: None,
            cwd: "/tmp".to_string(),
        };
        let out = decision_for(Status::Timeout, &config, "test");
        assert_eq!(out.decision, Decision::Deny);
    }
}
