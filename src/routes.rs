use axum::{
    body::Bytes,
    extract::{Multipart, State},
    response::{Html, IntoResponse, Redirect},
    Json,
};
use candle_core::Device;
use serde::Serialize;

use crate::{
    app::AppState,
    error::ApiError,
    metrics::MetricsSnapshot,
    model::Prediction,
    preprocess::preprocess_image,
};

const DOCS_PAGE: &str = include_str!("docs.html");

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
    model_loaded: bool,
    model_source: Option<&'static str>,
    model_path: Option<String>,
}

struct Upload {
    filename: String,
    data: Bytes,
}

pub async fn redirect_to_docs() -> Redirect {
    Redirect::temporary("/docs")
}

pub async fn docs() -> impl IntoResponse {
    Html(DOCS_PAGE)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        model_loaded: state.model.is_some(),
        model_source: state.model.as_ref().map(|model| model.source.as_str()),
        model_path: state
            .model
            .as_ref()
            .and_then(|model| model.source.path())
            .map(|path| path.display().to_string()),
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Pulls the `file` field out of the form. Only the declared content type is
/// checked here; the bytes themselves are validated when decoded.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let is_image = field
            .content_type()
            .map(|content_type| content_type.starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            return Err(ApiError::NotAnImage);
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;

        return Ok(Upload { filename, data });
    }

    Err(ApiError::MissingFile)
}

pub async fn predict_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
    let Upload { filename, data } = read_upload(&mut multipart).await?;
    tracing::debug!("Received {} ({} bytes)", filename, data.len());

    // held by the blocking task so a dropped request still occupies its slot
    let permit = state
        .inference_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let model = state.model.clone();
    let probability = tokio::task::spawn_blocking(move || -> Result<f32, ApiError> {
        let _permit = permit;
        let batch = preprocess_image(&data, &Device::Cpu)?;
        let model = model.ok_or(ApiError::ModelNotLoaded)?;
        Ok(model.classifier.predict(&batch)?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(Prediction::from_probability(filename, probability)))
}
