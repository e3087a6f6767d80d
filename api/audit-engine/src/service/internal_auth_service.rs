use crate::app::AppState;
use crate::module::error::AppError;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign_internal_payload(payload: &str, secret: &str) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("hmac init failed: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_internal_signature(
    payload: &str,
    signature_hex: &str,
    secret: &str,
) -> Result<(), String> {
    let signature =
        hex::decode(signature_hex.trim()).map_err(|e| format!("invalid signature hex: {e}"))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("hmac init failed: {e}"))?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| "signature verification failed".to_string())
}

/// Checks `x-internal-signature` against the JSON form of `payload` when
/// internal auth is enabled. Shared by the audit and rule catalog writes.
pub fn verify_write_auth<T: serde::Serialize>(
    state: &AppState,
    headers: &HeaderMap,
    payload: &T,
) -> Result<(), AppError> {
    if !state.config.internal_auth_enabled {
        return Ok(());
    }
    let secret = state
        .config
        .internal_auth_secret
        .as_deref()
        .ok_or_else(|| AppError::internal("AUTH_CONFIG_ERROR", "internal auth secret missing"))?;
    let sig = headers
        .get("x-internal-signature")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::unauthorized("AUTH_MISSING_SIGNATURE", "missing x-internal-signature")
        })?;
    let canonical = serde_json::to_string(payload).map_err(|e| {
        AppError::internal(
            "AUTH_SERIALIZE_ERROR",
            format!("auth payload serialization failed: {e}"),
        )
    })?;
    verify_internal_signature(&canonical, sig, secret)
        .map_err(|e| AppError::unauthorized("AUTH_INVALID_SIGNATURE", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tampered_payload_fails_verification() {
        let sig = sign_internal_payload("{\"approved\":true}", "reviewer-secret").unwrap();
        assert!(verify_internal_signature("{\"approved\":true}", &sig, "reviewer-secret").is_ok());
        assert!(verify_internal_signature("{\"approved\":false}", &sig, "reviewer-secret").is_err());
    }

    #[test]
    fn signature_with_one_flipped_byte_is_rejected() {
        let payload = "{\"approved\":true}";
        let sig = sign_internal_payload(payload, "reviewer-secret").unwrap();
        let mut bytes = hex::decode(&sig).unwrap();
        bytes[7] ^= 0x01;
        let flipped = hex::encode(bytes);
        assert!(verify_internal_signature(payload, &flipped, "reviewer-secret").is_err());
        assert!(verify_internal_signature(payload, "zz-not-hex", "reviewer-secret").is_err());
    }
}
