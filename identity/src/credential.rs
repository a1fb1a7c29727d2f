//! Signed cookie credentials.
//!
//! The cookie value is `base64url(json-claims) . hex(hmac-sha256(payload))`
//! under the server signing key. The credential is only ever minted and
//! verified by this gateway, so a keyed signature over the serialized
//! claims is all that is needed.

use crate::resolver::AuthError;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
}

fn sign(signing_key: &str, payload: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac
}

/// Serialize and sign claims into a cookie value.
pub fn seal(signing_key: &str, claims: &Claims) -> String {
    let json = serde_json::to_vec(claims).expect("claims serialize to JSON");
    let payload = URL_SAFE_NO_PAD.encode(&json);
    let signature = hex::encode(sign(signing_key, payload.as_bytes()).finalize().into_bytes());
    format!("{payload}.{signature}")
}

/// Verify a cookie value and deserialize its claims.
pub fn open(signing_key: &str, value: &str) -> Result<Claims, AuthError> {
    let (payload, signature) = value
        .split_once('.')
        .ok_or_else(|| AuthError::MalformedCredential("missing signature".into()))?;
    let signature = hex::decode(signature)
        .map_err(|e| AuthError::MalformedCredential(format!("bad signature encoding: {e}")))?;

    sign(signing_key, payload.as_bytes())
        .verify_slice(&signature)
        .map_err(|_| AuthError::InvalidSignature)?;

    let json = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| AuthError::MalformedCredential(format!("bad payload encoding: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| AuthError::MalformedCredential(format!("bad payload: {e}")))
}
