//! The callback verifier (spec §4.7): the webhook-side pipeline shared by
//! all three provider callbacks. `gate-webhook`'s route handlers call these
//! functions in order and translate the result into an HTTP response; the
//! pipeline itself is transport-agnostic.

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use gate_protocol::ApprovalRequest;
use gate_protocol::Status;
use hmac::Hmac;
use hmac::Mac;
use sha1::Sha1;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::GateError;
use crate::error::Result;
use crate::identity;
use crate::store::StatusPatch;
use crate::store::Store;

/// Rolling rate-limit window and per-window budget (spec §4.7 step 2).
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_BUDGET: u64 = 30;

/// Signed-body provider freshness window for the timestamp header
/// (spec §4.7 step 3).
pub const SIGNED_BODY_FRESHNESS_SECS: i64 = 300;

/// Row freshness bound independent of the store's own SELECT policy
/// (spec §4.7 step 6).
pub const ROW_FRESHNESS_SECS: i64 = 3600;

/// Derives the caller identifier used for rate limiting, preferring
/// provider/edge-origin IP headers in the documented order.
pub fn caller_identifier(
    cf_connecting_ip: Option<&str>,
    x_real_ip: Option<&str>,
    x_forwarded_for: Option<&str>,
) -> Option<String> {
    if let Some(ip) = cf_connecting_ip {
        return Some(ip.to_string());
    }
    if let Some(ip) = x_real_ip {
        return Some(ip.to_string());
    }
    x_forwarded_for
        .and_then(|xff| xff.split(',').next_back())
        .map(|s| s.trim().to_string())
}

/// Checks the rate limit for `identifier`, recording one event. Fail-open on
/// store errors (service availability preferred over limit strictness).
pub async fn check_rate_limit<S: Store>(store: &S, identifier: &str) -> Result<()> {
    match store
        .record_rate_limit_event(identifier, RATE_LIMIT_WINDOW)
        .await
    {
        Ok(count) if count > RATE_LIMIT_BUDGET => Err(GateError::RateLimited),
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "rate limit store check failed, failing open");
            Ok(())
        }
    }
}

/// *Signed-body provider* authentication (spec §4.7 step 3, first variant):
/// `HMAC_SHA256(signing_secret, "v0:" || timestamp || ":" || raw_body)`,
/// formatted `v0=<hex>`, compared to the signature header in constant time.
pub fn verify_signed_body(
    timestamp_header: Option<&str>,
    signature_header: Option<&str>,
    raw_body: &[u8],
    signing_secret: &str,
) -> Result<()> {
    let (Some(timestamp_str), Some(signature)) = (timestamp_header, signature_header) else {
        return Err(GateError::AuthFailed("missing timestamp or signature header".to_string()));
    };

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| GateError::AuthFailed("malformed timestamp header".to_string()))?;

    let now = Utc::now().timestamp();
    if (now - timestamp).abs() > SIGNED_BODY_FRESHNESS_SECS {
        return Err(GateError::AuthFailed("stale timestamp".to_string()));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .map_err(|e| GateError::Internal(e.to_string()))?;
    mac.update(b"v0:");
    mac.update(timestamp_str.as_bytes());
    mac.update(b":");
    mac.update(raw_body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        Ok(())
    } else {
        Err(GateError::AuthFailed("signature mismatch".to_string()))
    }
}

/// *Shared-secret-header provider* authentication (spec §4.7 step 3, second
/// variant): constant-time comparison of a header token to a configured
/// secret.
pub fn verify_shared_secret(header_token: Option<&str>, configured_secret: &str) -> Result<()> {
    let Some(token) = header_token else {
        return Err(GateError::AuthFailed("missing secret header".to_string()));
    };
    if bool::from(token.as_bytes().ct_eq(configured_secret.as_bytes())) {
        Ok(())
    } else {
        Err(GateError::AuthFailed("secret mismatch".to_string()))
    }
}

/// *Sorted-params-MAC provider* authentication (spec §4.7 step 3, third
/// variant): `HMAC_SHA1(auth_token, url || sorted (key‖value) pairs)`,
/// base64-encoded, compared constant-time.
pub fn verify_sorted_params_mac(
    full_url: &str,
    params: &[(String, String)],
    signature_header: Option<&str>,
    auth_token: &str,
) -> Result<()> {
    let Some(signature) = signature_header else {
        return Err(GateError::AuthFailed("missing signature header".to_string()));
    };

    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut data = full_url.to_string();
    for (key, value) in &sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes())
        .map_err(|e| GateError::Internal(e.to_string()))?;
    mac.update(data.as_bytes());
    use base64::Engine;
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        Ok(())
    } else {
        Err(GateError::AuthFailed("signature mismatch".to_string()))
    }
}

/// Validates a request_id string is a canonical v4 UUID (spec §4.7 step 4).
pub fn parse_request_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| GateError::InputMalformed("invalid request id".to_string()))
}

/// Outcome of fetching and checking the row before transition.
pub enum RowCheckOutcome {
    /// Row is pending, fresh, and identity-valid: proceed to transition.
    ProceedToTransition(ApprovalRequest),
    /// Row already resolved: respond 200 "already resolved", no transition.
    AlreadyResolved(ApprovalRequest),
}

/// Spec §4.7 steps 5–7: fetch the row, check freshness, check machine
/// identity.
pub async fn fetch_and_check_row<S: Store>(
    store: &S,
    id: Uuid,
    machine_id_secret: Option<&str>,
    freshness_window_secs: i64,
) -> Result<RowCheckOutcome> {
    let row = store.select_single(id).await?;

    if !row.invariant_holds() {
        return Err(GateError::Store(format!(
            "row {id} violates the pending/resolved invariant"
        )));
    }

    if row.status != Status::Pending {
        return Ok(RowCheckOutcome::AlreadyResolved(row));
    }

    let age = Utc::now() - row.created_at;
    if age > ChronoDuration::seconds(ROW_FRESHNESS_SECS) {
        return Err(GateError::Expired);
    }

    if let Some(secret) = machine_id_secret {
        if !row.machine_id.is_empty() {
            identity::verify(&row.machine_id, Some(secret), freshness_window_secs)
                .map_err(|_| GateError::IdentityInvalid)?;
        }
    }

    Ok(RowCheckOutcome::ProceedToTransition(row))
}

/// Spec §4.7 step 8: atomically transitions a pending row to its verdict.
/// Zero affected rows means another callback won the race first.
pub async fn transition<S: Store>(
    store: &S,
    id: Uuid,
    new_status: Status,
    resolved_by: String,
) -> Result<()> {
    let patch = StatusPatch {
        status: new_status,
        resolved_at: Utc::now(),
        resolved_by: Some(resolved_by),
    };
    let affected = store.update_where(id, Status::Pending, patch).await?;
    if affected == 0 {
        return Err(GateError::RaceLost);
    }
    Ok(())
}
