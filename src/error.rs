use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{model::ModelError, preprocess::PreprocessError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("File provided is not an image.")]
    NotAnImage,
    #[error("Field required: file")]
    MissingFile,
    #[error("Failed to read multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Model not loaded.")]
    ModelNotLoaded,
    #[error("{0}")]
    Preprocess(#[from] PreprocessError),
    #[error("{0}")]
    Inference(#[from] ModelError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotAnImage => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ModelNotLoaded
            | ApiError::Preprocess(_)
            | ApiError::Inference(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
