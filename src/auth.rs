//! Bearer token verification only — the core never issues tokens (§1
//! "Out of scope": that's the external authentication service). Grounded
//! on the Zobbo reference backend's HMAC-SHA256 signed-token scheme
//! (`issue_token`/`verify_token`/`hmac_sha256`), minus issuance.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
}

/// Verifies `token.payload.signature` against the configured secret and
/// that the signed subject equals `claimed_user_id` (§4.6
/// "Authentication"). On any mismatch the caller must close the
/// connection silently (§7 "Authentication failure").
pub fn verify_token(secret: &[u8], token: &str, claimed_user_id: &str) -> Result<(), SessionError> {
    let mut parts = token.splitn(2, '.');
    let payload_b64 = parts.next().ok_or(SessionError::AuthFailed)?;
    let sig_b64 = parts.next().ok_or(SessionError::AuthFailed)?;

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| SessionError::AuthFailed)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| SessionError::AuthFailed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SessionError::AuthFailed)?;
    mac.update(&payload);
    mac.verify_slice(&sig).map_err(|_| SessionError::AuthFailed)?;

    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| SessionError::AuthFailed)?;
    if claims.sub != claimed_user_id {
        return Err(SessionError::AuthFailed);
    }
    Ok(())
}

/// Test/dev helper mirroring how the external auth service would sign a
/// token; production token issuance lives outside this crate.
#[cfg(test)]
pub fn sign_for_tests(secret: &[u8], user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        iat: 0,
    };
    let payload = serde_json::to_vec(&claims).unwrap();
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(&payload);
    let sig = mac.finalize().into_bytes();
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(sig)
    )
}
