#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # EdgeConnect Web
//!
//! Two-stage, edge-guided image inpainting served over HTTP.
//!
//! A user uploads a photograph and paints a binary mask over the region to
//! repair. The service extracts a grayscale image and a Canny edge map, lets an
//! *edge model* hallucinate the missing edges, lets an *inpainting model* fill
//! the masked pixels guided by those edges, and composites the result so that
//! unmasked pixels are returned untouched.
//!
//! ## Features
//!
//! - **Two backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Exported checkpoints**: a directory with `config.json` plus `edge.onnx` and `inpaint.onnx`
//! - **HTTP service**: axum router with the drawing page, `POST /inpaint` and `GET /health`
//! - **CLI**: `serve`, offline `inpaint`, `providers` (enable with the `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgeconnect_web::{InpaintProcessor, InpaintRequest, MaskSource, ServiceConfig};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder()
//!     .checkpoint_dir("checkpoints/celeba")
//!     .build()?;
//! let processor = InpaintProcessor::from_config(config)?;
//! processor.initialize()?;
//!
//! let request = InpaintRequest {
//!     image: std::fs::read("photo.jpg")?,
//!     mask: MaskSource::Bytes(std::fs::read("mask.png")?),
//! };
//! let outcome = processor.process(&request)?;
//! std::fs::write("result.png", outcome.to_png_bytes()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `server` (default): axum HTTP surface
//! - `cli` (default): command-line interface and subscriber setup
//! - `webp-support` (default): WebP uploads
//! - `tracing-json`: JSON log output

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod utils;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use config::{ArtifactOptions, ExecutionProvider, ServiceConfig, ServiceConfigBuilder};
pub use error::{InpaintError, Result};
pub use inference::InferenceBackend;
pub use models::{CheckpointConfig, CheckpointSet, ModelFile, ModelInfo, ModelStage};
pub use processor::{
    BackendFactory, BackendType, DefaultBackendFactory, InpaintOutcome, InpaintProcessor,
    InpaintRequest, MaskSource, ProcessingTimings,
};
pub use services::{ArtifactStore, ImageCodec};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
pub use utils::{
    canny, composite, tensor_to_rgb, CannyOptions, ImagePreprocessor, ModelValidator,
    PreparedInputs, PreprocessingOptions, ResizePolicy, TensorValidator,
};

/// Inpaint an encoded image with an encoded mask in one call
///
/// Loads the models, runs a single request and releases them again. Services
/// that handle more than one request should keep an [`InpaintProcessor`] instead.
///
/// ```rust,no_run
/// use edgeconnect_web::{inpaint_bytes, ServiceConfig};
///
/// # async fn example(photo: Vec<u8>, mask: Vec<u8>) -> anyhow::Result<()> {
/// let config = ServiceConfig::default();
/// let outcome = inpaint_bytes(photo, mask, config).await?;
/// let data_url = outcome.to_data_url()?;
/// # Ok(())
/// # }
/// ```
pub async fn inpaint_bytes(
    image_bytes: Vec<u8>,
    mask_bytes: Vec<u8>,
    config: ServiceConfig,
) -> Result<InpaintOutcome> {
    tokio::task::spawn_blocking(move || {
        let processor = InpaintProcessor::from_config(config)?;
        processor.initialize()?;
        let outcome = processor.process(&InpaintRequest {
            image: image_bytes,
            mask: MaskSource::Bytes(mask_bytes),
        });
        processor.shutdown();
        outcome
    })
    .await
    .map_err(|e| InpaintError::internal(format!("Inpainting task failed: {e}")))?
}

/// Inpaint an image read from an async stream
pub async fn inpaint_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    mask_bytes: Vec<u8>,
    config: ServiceConfig,
) -> Result<InpaintOutcome> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    inpaint_bytes(buffer, mask_bytes, config).await
}
