//! Inpainting processor
//!
//! [`InpaintProcessor`] is the service object shared by the HTTP server and the
//! CLI. It owns both models for the lifetime of the process: they are loaded
//! once by [`InpaintProcessor::initialize`], reused by every request, and
//! released by [`InpaintProcessor::shutdown`].

use crate::{
    config::ServiceConfig,
    error::{InpaintError, Result},
    inference::InferenceBackend,
    models::{CheckpointSet, ModelInfo, ModelStage},
    services::{ArtifactStore, ImageCodec},
    tracing_config::{events, spans},
    utils::{composite, tensor_to_rgb, ImagePreprocessor, PreparedInputs, TensorValidator},
};
use image::{DynamicImage, RgbImage};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// Deterministic stand-in that needs no model files
    Mock,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = InpaintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            "mock" => Ok(Self::Mock),
            other => Err(InpaintError::invalid_config(format!(
                "Unknown backend '{other}' (expected onnx, tract or mock)"
            ))),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the specified type for one stage
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(
        &self,
        backend_type: BackendType,
        stage: ModelStage,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Backend factory for the backends compiled into this build
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        stage: ModelStage,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            BackendType::Mock => Ok(Box::new(crate::backends::MockBackend::new(stage))),
            #[allow(unreachable_patterns)]
            other => Err(InpaintError::invalid_config(format!(
                "Backend '{other}' is not available in this build (enable the '{other}' feature)"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends.push(BackendType::Mock);
        backends
    }
}

/// Where the mask comes from
#[derive(Debug, Clone)]
pub enum MaskSource {
    /// `data:image/png;base64,...` as drawn by the front-end canvas (or bare base64)
    DataUrl(String),
    /// Encoded image bytes, e.g. a mask file on disk
    Bytes(Vec<u8>),
}

/// One inpainting request in its wire form
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    /// Encoded photograph
    pub image: Vec<u8>,
    pub mask: MaskSource,
}

/// Stage timings for one request, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub preprocessing_ms: u64,
    pub edge_inference_ms: u64,
    pub inpaint_inference_ms: u64,
    pub postprocessing_ms: u64,
    pub total_ms: u64,
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct InpaintOutcome {
    /// Composited result at the upload's size (or the model size if restoring is disabled)
    pub image: RgbImage,
    pub request_id: Uuid,
    pub timings: ProcessingTimings,
}

impl InpaintOutcome {
    /// Encode the result as PNG
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        ImageCodec::encode_png(&self.image)
    }

    /// Encode the result as a `data:image/png;base64,...` URL
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn to_data_url(&self) -> Result<String> {
        ImageCodec::png_data_url(&self.image)
    }
}

struct ModelPair {
    edge: Box<dyn InferenceBackend>,
    inpaint: Box<dyn InferenceBackend>,
}

impl ModelPair {
    fn ready(&self) -> bool {
        self.edge.is_initialized() && self.inpaint.is_initialized()
    }
}

/// The inpainting service object
pub struct InpaintProcessor {
    config: ServiceConfig,
    checkpoint: CheckpointSet,
    models: Mutex<ModelPair>,
    artifacts: ArtifactStore,
}

impl std::fmt::Debug for InpaintProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InpaintProcessor")
            .field("checkpoint", &self.checkpoint.name)
            .field("backend", &self.config.backend)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl InpaintProcessor {
    /// Create a processor around two uninitialized backends
    pub fn new(
        config: ServiceConfig,
        checkpoint: CheckpointSet,
        edge_backend: Box<dyn InferenceBackend>,
        inpaint_backend: Box<dyn InferenceBackend>,
    ) -> Self {
        let artifacts = ArtifactStore::from_options(&config.artifacts);
        if artifacts.enabled() {
            info!("Writing request artifacts under {}", artifacts.root().display());
        }
        Self {
            config,
            checkpoint,
            models: Mutex::new(ModelPair {
                edge: edge_backend,
                inpaint: inpaint_backend,
            }),
            artifacts,
        }
    }

    /// Create a processor whose backends come from a factory
    ///
    /// # Errors
    /// - The factory cannot create the configured backend type
    pub fn with_factory(
        config: ServiceConfig,
        checkpoint: CheckpointSet,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let edge = factory.create_backend(config.backend, ModelStage::Edge)?;
        let inpaint = factory.create_backend(config.backend, ModelStage::Inpaint)?;
        Ok(Self::new(config, checkpoint, edge, inpaint))
    }

    /// Create a processor from configuration alone
    ///
    /// Reads the checkpoint directory, except for the mock backend, which
    /// needs no model files.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Checkpoint directory or its `config.json` invalid
    /// - Backend not available in this build
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let checkpoint = if config.backend == BackendType::Mock {
            CheckpointSet::placeholder("mock")
        } else {
            CheckpointSet::from_dir(&config.checkpoint_dir)?
        };
        if config.backend != BackendType::Mock
            && (checkpoint.edge.sha256.is_none() || checkpoint.inpaint.sha256.is_none())
        {
            events::warning_with_recommendation(
                &format!("checkpoint '{}' does not pin model checksums", checkpoint.name),
                "add a sha256 entry for each model in config.json",
            );
        }
        Self::with_factory(config, checkpoint, &DefaultBackendFactory)
    }

    fn lock_models(&self) -> Result<MutexGuard<'_, ModelPair>> {
        self.models
            .lock()
            .map_err(|_| InpaintError::internal("model lock poisoned by an earlier panic"))
    }

    /// Load both models; calling again after success is a no-op
    ///
    /// # Errors
    /// - Either model fails to load
    pub fn initialize(&self) -> Result<()> {
        let span = spans::model_loading(&self.checkpoint.name, &self.config.backend.to_string());
        let _guard = span.enter();

        let mut models = self.lock_models()?;
        if models.ready() {
            return Ok(());
        }

        let start = Instant::now();
        let pair = &mut *models;
        for (backend, stage) in [
            (&mut pair.edge, ModelStage::Edge),
            (&mut pair.inpaint, ModelStage::Inpaint),
        ] {
            let file = self.checkpoint.file(stage);
            if let Some(load_time) = backend.initialize(file, &self.config)? {
                debug!(
                    stage = %stage,
                    load_ms = %load_time.as_millis(),
                    "Loaded {}",
                    file.display_name()
                );
            }
        }

        info!(
            checkpoint = %self.checkpoint.name,
            backend = %self.config.backend,
            "Models initialized in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// Whether both models are loaded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.models.lock().map(|m| m.ready()).unwrap_or(false)
    }

    /// Information about the loaded models (empty before initialization)
    #[must_use]
    pub fn model_info(&self) -> Vec<ModelInfo> {
        let Ok(models) = self.models.lock() else {
            return Vec::new();
        };
        [models.edge.model_info(), models.inpaint.model_info()]
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Release both models; later requests fail with `NotInitialized`
    pub fn shutdown(&self) {
        match self.models.lock() {
            Ok(mut models) => {
                models.edge.shutdown();
                models.inpaint.shutdown();
                info!("Models released");
            },
            Err(_) => tracing::warn!("Model lock poisoned; skipping shutdown"),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointSet {
        &self.checkpoint
    }

    /// Run the pipeline on a request in its wire form
    ///
    /// # Errors
    /// - Undecodable image or mask
    /// - Models not initialized
    /// - Any preprocessing, inference or encoding failure
    pub fn process(&self, request: &InpaintRequest) -> Result<InpaintOutcome> {
        let request_id = Uuid::new_v4();
        let span = spans::request(&request_id);
        let _guard = span.enter();

        let total_start = Instant::now();
        let decode_start = Instant::now();
        let image = ImageCodec::load_image_bytes(&request.image)?;
        let mask = match &request.mask {
            MaskSource::DataUrl(url) => ImageCodec::load_data_url_image(url)?,
            MaskSource::Bytes(bytes) => ImageCodec::load_image_bytes(bytes)?,
        };
        let mut timings = ProcessingTimings {
            decode_ms: decode_start.elapsed().as_millis() as u64,
            ..ProcessingTimings::default()
        };

        self.artifacts.save_upload(request_id, &request.image);

        let image = self.run_pipeline(request_id, &image, &mask, &mut timings)?;
        timings.total_ms = total_start.elapsed().as_millis() as u64;
        Ok(InpaintOutcome {
            image,
            request_id,
            timings,
        })
    }

    /// Run the pipeline on already decoded images
    ///
    /// # Errors
    /// - Models not initialized
    /// - Any preprocessing, inference or encoding failure
    pub fn process_images(&self, image: &DynamicImage, mask: &DynamicImage) -> Result<InpaintOutcome> {
        let request_id = Uuid::new_v4();
        let span = spans::request(&request_id);
        let _guard = span.enter();

        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let image = self.run_pipeline(request_id, image, mask, &mut timings)?;
        timings.total_ms = total_start.elapsed().as_millis() as u64;
        Ok(InpaintOutcome {
            image,
            request_id,
            timings,
        })
    }

    fn run_pipeline(
        &self,
        request_id: Uuid,
        image: &DynamicImage,
        mask: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<RgbImage> {
        let options = &self.config.preprocessing;

        let preprocess_start = Instant::now();
        let prepared = {
            let span = spans::preprocessing((image.width(), image.height()));
            let _guard = span.enter();
            ImagePreprocessor::prepare(image, mask, options)?
        };
        self.artifacts.save_debug(request_id, &prepared);
        let tensors = prepared.to_tensors();
        timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;

        let inpainted = self.run_models(request_id, &prepared, &tensors, timings)?;

        let postprocess_start = Instant::now();
        let span = spans::postprocessing("composite");
        let _guard = span.enter();

        let merged = composite(&inpainted, &tensors.image, &tensors.mask)?;
        let mut result = tensor_to_rgb(&merged)?;

        let (orig_w, orig_h) = prepared.original_size();
        if options.restore_original_size && result.dimensions() != (orig_w, orig_h) {
            result = ImagePreprocessor::resize_rgb(&result, orig_w, orig_h);
        }
        self.artifacts.save_result(request_id, &result);

        timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
        events::performance_metric("postprocessing", timings.postprocessing_ms);
        Ok(result)
    }

    /// Edge completion followed by inpainting, under the model lock
    fn run_models(
        &self,
        request_id: Uuid,
        prepared: &PreparedInputs,
        tensors: &crate::utils::ModelTensors,
        timings: &mut ProcessingTimings,
    ) -> Result<ndarray::Array4<f32>> {
        let mut models = self.lock_models()?;
        if !models.ready() {
            return Err(InpaintError::not_initialized(
                "models are not loaded (call initialize, or the service is shutting down)",
            ));
        }

        let dims = prepared.dimensions();

        let edge_start = Instant::now();
        let predicted_edges = {
            let span = spans::inference("edge", dims);
            let _guard = span.enter();
            models
                .edge
                .infer(&[&tensors.gray, &tensors.edges, &tensors.mask])?
        };
        TensorValidator::validate_model_output(
            "edge",
            &predicted_edges,
            ModelStage::Edge.output_channels(),
            &tensors.gray,
        )?;
        timings.edge_inference_ms = edge_start.elapsed().as_millis() as u64;
        self.artifacts.save_predicted_edges(request_id, &predicted_edges);

        let inpaint_start = Instant::now();
        let inpainted = {
            let span = spans::inference("inpaint", dims);
            let _guard = span.enter();
            models
                .inpaint
                .infer(&[&tensors.image, &predicted_edges, &tensors.mask])?
        };
        TensorValidator::validate_model_output(
            "inpaint",
            &inpainted,
            ModelStage::Inpaint.output_channels(),
            &tensors.image,
        )?;
        timings.inpaint_inference_ms = inpaint_start.elapsed().as_millis() as u64;

        debug!(
            edge_ms = timings.edge_inference_ms,
            inpaint_ms = timings.inpaint_inference_ms,
            "Inference finished at {}x{}",
            dims.0,
            dims.1
        );
        Ok(inpainted)
    }
}
