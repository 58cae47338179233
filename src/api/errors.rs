use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{
    permissions::Denial,
    store::StoreError,
    validation::{add_error, FieldErrors},
};

pub const INVALID_HYPERLINK: &str = "Invalid hyperlink - Object does not exist.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input.")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found() -> Self {
        Self::NotFound("Not found.".to_owned())
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        add_error(&mut errors, field, message);
        Self::Validation(errors)
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        Self::Forbidden(denial.message().to_owned())
    }
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match self {
            AppError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                "Invalid input.".to_owned(),
                Some(fields),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Store(StoreError::Conflict { field }) => {
                let mut errors = FieldErrors::new();
                add_error(
                    &mut errors,
                    field,
                    format!("A user with that {field} already exists."),
                );
                (StatusCode::BAD_REQUEST, "Invalid input.".to_owned(), Some(errors))
            }
            AppError::Store(StoreError::MissingParent { field }) => {
                let mut errors = FieldErrors::new();
                add_error(&mut errors, field, INVALID_HYPERLINK);
                (StatusCode::BAD_REQUEST, "Invalid input.".to_owned(), Some(errors))
            }
            AppError::Store(err @ StoreError::Database(_)) => {
                error!(error = %err, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error.".to_owned(),
                    None,
                )
            }
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error.".to_owned(),
                    None,
                )
            }
        };

        let body = match fields {
            Some(fields) => json!({ "error": message, "fields": fields }),
            None => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        let cases = [
            (AppError::field("name", "bad"), StatusCode::BAD_REQUEST),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (Denial::NotAuthenticated.into(), StatusCode::FORBIDDEN),
            (AppError::not_found(), StatusCode::NOT_FOUND),
            (
                StoreError::Conflict { field: "username" }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                StoreError::MissingParent { field: "hydroponics" }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                anyhow::anyhow!("boom").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
