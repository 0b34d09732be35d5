//! Response envelope shared by every core endpoint.
//!
//! Bodies are `{ "data": <payload>, ...metadata }`, pretty-printed with
//! sorted keys so responses are byte-for-byte reproducible.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Map, Value};
use testament_registry::LedgerError;
use testament_types::Unresolved;
use tracing::warn;

/// Message returned when a required `public_key` is absent.
pub const MISSING_PUBLIC_KEY: &str = "Missing public_key";
/// Message returned when witness signing lacks one of its parameters.
pub const MISSING_SIGN_PARAMS: &str = "Missing public_key and/or witness param";
/// Message returned when a witness is not part of the will.
pub const WITNESS_NOT_LISTED: &str = "Witness is not found in this will";

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    status: StatusCode,
    body: Map<String, Value>,
}

impl Envelope {
    /// Envelope without `data`, answered to methods a route does not serve.
    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            body: Map::new(),
        }
    }

    pub fn data<T: Serialize>(payload: &T) -> Result<Self, ApiError> {
        let data = serde_json::to_value(payload)
            .map_err(|err| ApiError::internal(format!("failed to encode response: {err}")))?;
        let mut envelope = Self::empty();
        envelope.body.insert("data".to_string(), data);
        Ok(envelope)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.body.insert(key.to_string(), value);
        self
    }

    /// Attach the entries a listing had to skip, if there were any.
    pub fn with_unresolved(self, unresolved: &[Unresolved]) -> Self {
        if unresolved.is_empty() {
            return self;
        }
        let value = serde_json::to_value(unresolved).unwrap_or(Value::Null);
        self.with_metadata("unresolved", value)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Rendered JSON text. `serde_json::Map` keeps keys sorted.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| "{}".to_string())
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.render()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::Validation(_) => Self::bad_request(err.to_string()),
            LedgerError::WitnessNotListed { .. } => Self::bad_request(WITNESS_NOT_LISTED),
            LedgerError::KeyNotFound { .. } | LedgerError::WillNotFound { .. } => {
                Self::not_found(err.to_string())
            }
            LedgerError::TestatorNotApproved { .. } => {
                Self::new(StatusCode::FORBIDDEN, err.to_string())
            }
            LedgerError::Client(_) => {
                warn!("ledger client failure: {}", err);
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            LedgerError::CorruptRecord { .. } | LedgerError::Encode(_) => {
                warn!("ledger record failure: {}", err);
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({
            "success": false,
            "error": self.message,
        });
        let mut envelope = Envelope::empty().with_status(self.status);
        envelope.body.insert("data".to_string(), payload);
        envelope.into_response()
    }
}
