//! Crate-wide error type.
//!
//! Library operations return [`Result`]; HTTP handlers turn an [`Error`]
//! into a status code plus a plain-text body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::CellType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("path escapes notebook directory: {0}")]
    PathEscape(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid contents model: {0}")]
    InvalidModel(String),

    #[error("malformed base64 data URI")]
    InvalidDataUri,

    #[error("inline images can only be inserted into markdown cells, not {0}")]
    NotMarkdown(CellType),

    #[error("image insertion is disabled for the selected cell")]
    ImageInsertDisabled,

    #[error("no cell at index {0}")]
    NoSuchCell(usize),

    #[error("version history unavailable: {0}")]
    Git(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) | Error::NoSuchCell(_) => StatusCode::NOT_FOUND,
            Error::PathEscape(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadRequest(_)
            | Error::Json(_)
            | Error::InvalidDataUri
            | Error::NotMarkdown(_)
            | Error::ImageInsertDisabled => StatusCode::BAD_REQUEST,
            Error::InvalidModel(_) | Error::Io(_) | Error::Git(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
