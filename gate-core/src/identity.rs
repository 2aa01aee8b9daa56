//! Machine identity (spec §4.3): a stable per-machine fingerprint, and an
//! HMAC-signed, timestamped token derived from it that the webhook side can
//! verify without a shared database.

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use subtle::ConstantTimeEq;

use crate::error::GateError;
use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for a signed identity token, in seconds.
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 600;

/// Derives the stable 32-hex-character machine fingerprint described in
/// spec §4.3: a SHA-256 of hostname, username, platform, machine-id (where
/// readable), hardware UUID (where readable), and home directory, truncated
/// to 32 hex characters.
pub fn fingerprint() -> String {
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let platform = format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH);
    let machine_id = read_machine_id().unwrap_or_default();
    let hardware_uuid = read_hardware_uuid().unwrap_or_default();
    let home = dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let material = format!("{hostname}|{username}|{platform}|{machine_id}|{hardware_uuid}|{home}");

    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

fn read_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn read_hardware_uuid() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(|s| s.to_string())
}

#[cfg(not(target_os = "macos"))]
fn read_hardware_uuid() -> Option<String> {
    std::fs::read_to_string("/sys/class/dmi/id/product_uuid")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Signs `fingerprint` with shared secret `secret`, stamping it with the
/// current Unix time: `fingerprint:unix_seconds:truncated_16_hex_mac`.
pub fn sign(fingerprint: &str, secret: &str) -> Result<String> {
    let unix_seconds = now_unix_seconds();
    let tag = mac_hex(fingerprint, unix_seconds, secret)?;
    Ok(format!("{fingerprint}:{unix_seconds}:{}", &tag[..16]))
}

/// Verifies a signed identity token produced by [`sign`].
///
/// `secret` of `None` degrades to a format-only check (32 hex characters in
/// the fingerprint position) per spec §4.3's explicit compatibility
/// fallback — callers must treat this mode as weaker and log accordingly.
pub fn verify(signed: &str, secret: Option<&str>, freshness_window_secs: i64) -> Result<String> {
    let mut parts = signed.splitn(3, ':');
    let (Some(fp), Some(ts_str), Some(tag)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(GateError::IdentityInvalid);
    };
    if parts.next().is_some() {
        return Err(GateError::IdentityInvalid);
    }

    let Some(secret) = secret else {
        return if is_hex32(fp) {
            Ok(fp.to_string())
        } else {
            Err(GateError::IdentityInvalid)
        };
    };

    let timestamp: i64 = ts_str.parse().map_err(|_| GateError::IdentityInvalid)?;
    let now = now_unix_seconds();
    if (now - timestamp).abs() > freshness_window_secs {
        return Err(GateError::Expired);
    }

    let expected = mac_hex(fp, timestamp, secret)?;
    let expected_truncated = &expected[..16];

    if bool::from(expected_truncated.as_bytes().ct_eq(tag.as_bytes())) {
        Ok(fp.to_string())
    } else {
        Err(GateError::IdentityInvalid)
    }
}

fn mac_hex(fingerprint: &str, unix_seconds: i64, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GateError::Internal(e.to_string()))?;
    mac.update(format!("{fingerprint}:{unix_seconds}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn is_hex32(s: &str) -> bool {
    s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_calls() {
        assert_eq!(fingerprint(), fingerprint());
    }

    #[test]
    fn fingerprint_is_32_hex_chars() {
        assert!(is_hex32(&fingerprint()));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let fp = fingerprint();
        let signed = sign(&fp, "shared-secret").unwrap();
        let verified = verify(&signed, Some("shared-secret"), 600).unwrap();
        assert_eq!(verified, fp);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let fp = fingerprint();
        let signed = sign(&fp, "correct-secret").unwrap();
        let err = verify(&signed, Some("wrong-secret"), 600).unwrap_err();
        assert!(matches!(err, GateError::IdentityInvalid));
    }

    #[test]
    fn verify_rejects_malformed_token() {
        let err = verify("not-enough-parts", Some("secret"), 600).unwrap_err();
        assert!(matches!(err, GateError::IdentityInvalid));
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let fp = fingerprint();
        let tag = mac_hex(&fp, 0, "secret").unwrap();
        let stale = format!("{fp}:0:{}", &tag[..16]);
        let err = verify(&stale, Some("secret"), 600).unwrap_err();
        assert!(matches!(err, GateError::Expired));
    }

    #[test]
    fn verify_without_secret_degrades_to_format_check() {
        let signed = format!("{}:1234567890:deadbeefdeadbeef", "a".repeat(32));
        assert!(verify(&signed, None, 600).is_ok());
    }

    #[test]
    fn verify_without_secret_rejects_non_hex_fingerprint() {
        let signed = "not-hex:1234567890:deadbeefdeadbeef";
        assert!(verify(signed, None, 600).is_err());
    }
}
