//! Wire and persisted-state types shared between `gate-hook` and
//! `gate-webhook`. No behavior lives here — see `gate_core` for the rule
//! engine, masker, identity signing, store adapter, notifier, and the two
//! state machines built on top of these types.

pub mod hook;
pub mod provider;
pub mod row;

pub use hook::Decision;
pub use hook::HookEvent;
pub use hook::HookOutput;
pub use row::ApprovalRequest;
pub use row::RateLimitEvent;
pub use row::Severity;
pub use row::Status;
