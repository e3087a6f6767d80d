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
