//! Route handlers

use super::{
    response::{ApiError, ApiResponse, HealthResponse},
    AppState,
};
use crate::{
    error::InpaintError,
    processor::{InpaintRequest, MaskSource},
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Html,
    Json,
};
use tracing::{debug, info};

/// Multipart field carrying the photograph (a file part)
pub const IMAGE_FIELD: &str = "image";
/// Multipart field carrying the mask (a data URL text part)
pub const MASK_FIELD: &str = "mask";

/// `GET /`
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.index_html.as_ref().clone())
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let processor = state.processor.clone();
    let (initialized, models) = tokio::task::spawn_blocking(move || {
        let models = processor
            .model_info()
            .into_iter()
            .map(|info| format!("{}:{}", info.stage, info.name))
            .collect::<Vec<_>>();
        (processor.is_initialized(), models)
    })
    .await
    .unwrap_or((false, Vec::new()));

    Json(HealthResponse {
        status: if initialized { "ok" } else { "unavailable" },
        initialized,
        checkpoint: state.processor.checkpoint().name.clone(),
        backend: state.processor.config().backend.to_string(),
        models,
    })
}

/// `POST /inpaint`
///
/// Expects multipart form data with an `image` file and a `mask` data URL.
/// Responds with the composited result as a PNG data URL.
pub async fn inpaint(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse, ApiError> {
    let multipart = multipart.map_err(|rejection| {
        InpaintError::invalid_input(format!("Expected multipart form data: {rejection}"))
    })?;
    let request = read_request(multipart).await?;

    let processor = state.processor.clone();
    let outcome = tokio::task::spawn_blocking(move || processor.process(&request)).await??;

    info!(
        request_id = %outcome.request_id,
        total_ms = outcome.timings.total_ms,
        "Inpainting finished ({}x{})",
        outcome.image.width(),
        outcome.image.height()
    );

    let data_url = tokio::task::spawn_blocking(move || outcome.to_data_url()).await??;
    Ok(ApiResponse::image(data_url))
}

/// Collect the `image` and `mask` fields; other fields are ignored
async fn read_request(mut multipart: Multipart) -> Result<InpaintRequest, InpaintError> {
    let mut image = None;
    let mut mask = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InpaintError::invalid_input(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            IMAGE_FIELD => {
                let bytes = field.bytes().await.map_err(|e| {
                    InpaintError::invalid_input(format!("Failed to read image upload: {e}"))
                })?;
                image = Some(bytes.to_vec());
            },
            MASK_FIELD => {
                let text = field.text().await.map_err(|e| {
                    InpaintError::invalid_input(format!("Failed to read mask field: {e}"))
                })?;
                mask = Some(text);
            },
            other => debug!("Ignoring multipart field '{other}'"),
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| InpaintError::missing_field("image (uploaded image file)"))?;
    let mask = mask.ok_or_else(|| InpaintError::missing_field("mask (mask data)"))?;

    Ok(InpaintRequest {
        image,
        mask: MaskSource::DataUrl(mask),
    })
}
