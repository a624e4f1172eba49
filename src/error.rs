//! Error taxonomy for the ingestion pipeline.
//!
//! Failures that would contaminate the durable record are fatal to the
//! request ([`IngestError`]). Failures in best-effort side channels
//! ([`ExtractionError`], [`PublishError`]) are logged by their callers and
//! never turn into a response status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization header")]
    Unauthorized,

    #[error("authorization token does not match")]
    Forbidden,

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("unreadable webhook body: {0}")]
    BadRequest(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::InvalidSignature(_) | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed tlv boostagram: {0}")]
    Tlv(serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("failed to fetch rss payment url: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("{0} header not found")]
    MissingHeader(String),

    #[error("failed to decode {header} header: {reason}")]
    Decode { header: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to serialize boost: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to build event: {0}")]
    Event(String),

    #[error("failed to connect to relay: {0}")]
    Connect(String),

    #[error("relay rejected event: {0}")]
    Rejected(String),

    #[error("timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum TokenError {
    /// The provider rejected the access token. Retried once after a refresh.
    #[error("invalid token")]
    InvalidToken,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("credential store error: {0}")]
    Store(String),
}

/// Fatal outcomes of one ingestion request.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Auth(err) => err.status(),
            IngestError::Parse(_) => StatusCode::BAD_REQUEST,
            IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Token(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        self.status().into_response()
    }
}
