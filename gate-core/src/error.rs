use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

/// Error kinds from spec §7. Each variant maps to exactly one coordinator
/// policy and one verifier HTTP status; the mapping lives at the call site
/// (`coordinator::default_action` / `gate-webhook`'s `IntoResponse` impls)
/// rather than on the enum itself, since the same `GateError` can surface to
/// either side depending on which process hit it.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("malformed input: {0}")]
    InputMalformed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("invalid machine identity signature")]
    IdentityInvalid,

    #[error("request not found")]
    NotFound,

    #[error("request expired")]
    Expired,

    #[error("lost race to another callback")]
    RaceLost,

    #[error("rate limited")]
    RateLimited,

    #[error("store error: {0}")]
    Store(String),

    #[error("notifier error: {0}")]
    Notify(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::InputMalformed(err.to_string())
    }
}
