use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use identity::AuthError;
use identity::oauth::OAuthError;
use serde::Serialize;
use thiserror::Error;

/// Failure of a single upstream cluster call.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("cluster {cluster} is unreachable: {reason}")]
    Unreachable { cluster: String, reason: String },

    #[error("cluster {cluster} responded {status}")]
    Status {
        cluster: String,
        status: u16,
        body: String,
    },

    #[error("cluster {cluster} returned an invalid payload: {reason}")]
    Payload { cluster: String, reason: String },
}

/// Errors surfaced to the HTTP caller.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication required")]
    Unauthenticated,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("login failed: {0}")]
    Login(#[from] OAuthError),

    #[error("{0} is not found")]
    NotFound(&'static str),

    #[error("invalid request: {0}")]
    Validation(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error_message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Unauthenticated
            | GatewayError::Auth(_)
            | GatewayError::Login(_) => StatusCode::FORBIDDEN,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorBody {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_statuses() {
        let cases = [
            (GatewayError::Unauthenticated, StatusCode::FORBIDDEN),
            (
                GatewayError::Auth(AuthError::InvalidToken),
                StatusCode::FORBIDDEN,
            ),
            (
                GatewayError::Upstream(UpstreamError::Unreachable {
                    cluster: "universe".to_string(),
                    reason: "connect refused".to_string(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (GatewayError::NotFound("log"), StatusCode::NOT_FOUND),
            (
                GatewayError::Validation("bad status".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
