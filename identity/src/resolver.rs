//! Request-time identity resolution.
//!
//! An [`Identity`] is reconstructed on every request from whichever
//! credential the caller supplied and discarded when the request ends.
//! Nothing is persisted server-side.

use crate::{credential, token};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("invalid credential signature")]
    InvalidSignature,

    #[error("malformed credential: {0}")]
    MalformedCredential(String),
}

/// A resolved user identity, valid for the duration of one request.
#[derive(Clone, Debug)]
pub struct Identity {
    pub email: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    token: Vec<u8>,
}

impl Identity {
    /// Build an identity for `email`, deriving its token under `secret`.
    pub fn from_email(secret: &str, email: &str) -> Self {
        Identity {
            email: email.to_string(),
            uid: None,
            gid: None,
            given_name: None,
            family_name: None,
            token: token::derive_token(secret, email),
        }
    }

    /// The derived token, hex-encoded for use in upstream query parameters.
    pub fn token_hex(&self) -> String {
        hex::encode(&self.token)
    }

    /// Claims for sealing this identity into a signed cookie.
    pub fn to_claims(&self) -> credential::Claims {
        credential::Claims {
            email: self.email.clone(),
            uid: self.uid,
            gid: self.gid,
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
        }
    }
}

/// Credential material extracted from an inbound request.
#[derive(Debug)]
pub enum Credentials {
    /// Explicit `email` + hex `token` query parameters.
    Pair { email: String, token: String },
    /// The signed `token` cookie value.
    Cookie(String),
    /// No credential supplied.
    Anonymous,
}

/// Resolve credentials into an identity.
///
/// An explicit pair that fails verification is a hard error. A cookie that
/// fails verification is logged and treated as no identity, so routes that
/// allow anonymous access can fall through.
pub fn resolve(
    secret: &str,
    signing_key: &str,
    credentials: Credentials,
) -> Result<Option<Identity>, AuthError> {
    match credentials {
        Credentials::Pair { email, token } => {
            let supplied = hex::decode(&token).map_err(|_| AuthError::InvalidToken)?;
            if !token::verify_token(secret, &email, &supplied) {
                return Err(AuthError::InvalidToken);
            }
            tracing::info!(email, "authenticated by token");
            Ok(Some(Identity::from_email(secret, &email)))
        }
        Credentials::Cookie(value) => match credential::open(signing_key, &value) {
            Ok(claims) => {
                tracing::info!(email = claims.email, "authenticated by cookie");
                let mut identity = Identity::from_email(secret, &claims.email);
                identity.uid = claims.uid;
                identity.gid = claims.gid;
                identity.given_name = claims.given_name;
                identity.family_name = claims.family_name;
                Ok(Some(identity))
            }
            Err(error) => {
                tracing::warn!(%error, "cookie authentication failed");
                Ok(None)
            }
        },
        Credentials::Anonymous => Ok(None),
    }
}
