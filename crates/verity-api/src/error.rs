//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Engine errors keep their stable code; the body is always
//! `{"error": <message>, "code": <code>}`.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use verity_core::{ServiceError, store::StoreError};

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// A failure reported by the truth layer, with its error code.
  #[error("{message}")]
  Service { code: &'static str, message: String },
}

impl ApiError {
  pub fn code(&self) -> &'static str {
    match self {
      Self::NotFound(_) => "not_found",
      Self::BadRequest(_) => "bad_request",
      Self::Service { code, .. } => code,
    }
  }

  fn status(&self) -> StatusCode {
    match self.code() {
      "not_found" | "entity_not_found" | "unknown_schema" | "field_not_resolved" => {
        StatusCode::NOT_FOUND
      }
      "bad_request" | "invalid_id" | "registry_parse" | "serialization" => {
        StatusCode::BAD_REQUEST
      }
      "malformed_value"
      | "unknown_field_policy"
      | "producer_validation"
      | "invalid_schema"
      | "incompatible_schema" => StatusCode::UNPROCESSABLE_ENTITY,
      "schema_conflict" => StatusCode::CONFLICT,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl<E: StoreError> From<ServiceError<E>> for ApiError {
  fn from(e: ServiceError<E>) -> Self {
    Self::Service { code: e.code(), message: e.to_string() }
  }
}

impl From<verity_core::Error> for ApiError {
  fn from(e: verity_core::Error) -> Self {
    Self::Service { code: e.code(), message: e.to_string() }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(code = self.code(), error = %self, "request failed");
    }
    let body = json!({ "error": self.to_string(), "code": self.code() });
    (status, Json(body)).into_response()
  }
}
