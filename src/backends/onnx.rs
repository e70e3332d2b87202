//! ONNX Runtime backend implementation for the inpainting models
//!
//! Runs one exported network with ONNX Runtime, with support for multiple
//! execution providers (CPU, CUDA, CoreML).

use crate::config::{ExecutionProvider, ServiceConfig};
use crate::error::{InpaintError, Result};
use crate::inference::{expect_stage_inputs, InferenceBackend};
use crate::models::{ModelFile, ModelInfo};
use log;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use ort::{self, value::Value};

/// ONNX Runtime backend for running one pipeline stage
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_info: Option<ModelInfo>,
    initialized: bool,
}

impl OnnxBackend {
    /// List all ONNX Runtime execution providers with availability status and descriptions
    ///
    /// Returns `(name, available, description)` tuples.
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {os}/{arch}, CPU cores: {cores}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            cores = std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        );

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the requested execution provider, falling back to CPU when unavailable
    fn with_provider(
        session_builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let cuda_available =
            || OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available = || {
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false)
        };

        let providers = match provider {
            ExecutionProvider::Auto => {
                // Auto-detect: try CUDA > CoreML > CPU
                let mut providers = Vec::new();
                if cuda_available() {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available() {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::warn!("No hardware acceleration available, falling back to CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    log::info!("Using CUDA execution provider");
                    vec![CUDAExecutionProvider::default().build()]
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    log::info!("Using CoreML execution provider (explicitly requested)");
                    vec![CoreMLExecutionProvider::default().with_subgraphs(true).build()]
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Vec::new()
                }
            },
        };

        if providers.is_empty() {
            return Ok(session_builder);
        }
        session_builder
            .with_execution_providers(providers)
            .map_err(|e| {
                InpaintError::inference(format!("Failed to set execution providers: {e}"))
            })
    }

    /// Thread counts, auto-detected when configured as 0
    fn thread_counts(config: &ServiceConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    /// Load and initialize the ONNX model
    fn load_model(
        &mut self,
        model: &ModelFile,
        config: &ServiceConfig,
    ) -> Result<std::time::Duration> {
        let model_load_start = std::time::Instant::now();
        let model_data = model.load_bytes()?;

        let session_builder = Session::builder()
            .map_err(|e| {
                InpaintError::inference(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                InpaintError::inference(format!("Failed to set optimization level: {e}"))
            })?;
        let session_builder = Self::with_provider(session_builder, config.execution_provider)?;

        let (intra_threads, inter_threads) = Self::thread_counts(config);
        let session = session_builder
            .with_parallel_execution(true)
            .map_err(|e| InpaintError::inference(format!("Failed to enable parallel execution: {e}")))?
            .with_intra_threads(intra_threads)
            .map_err(|e| InpaintError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| InpaintError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                InpaintError::model_error_with_context(
                    "load",
                    &model.path,
                    &e.to_string(),
                    &["verify the file is an ONNX export of the network"],
                )
            })?;

        log::debug!(
            "{} session: provider {}, {intra_threads} intra-op / {inter_threads} inter-op threads",
            model.stage,
            config.execution_provider
        );

        self.session = Some(session);
        self.model_info = Some(ModelInfo {
            name: model.display_name(),
            stage: model.stage,
            backend: self.name().to_string(),
            size_bytes: model_data.len(),
        });
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "{} model loaded in {:.0}ms ({:.2} MB)",
            model.stage,
            model_load_time.as_secs_f64() * 1000.0,
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn initialize(
        &mut self,
        model: &ModelFile,
        config: &ServiceConfig,
    ) -> Result<Option<std::time::Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(model, config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, inputs: &[&Array4<f32>]) -> Result<Array4<f32>> {
        use std::time::Instant;

        if !self.initialized {
            return Err(InpaintError::not_initialized("ONNX backend not initialized"));
        }
        let [first, second, third] = expect_stage_inputs(self.name(), inputs)?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| InpaintError::not_initialized("ONNX session not loaded"))?;

        let inference_start = Instant::now();
        log::debug!(
            "Starting inference with input shapes: {:?}, {:?}, {:?}",
            first.dim(),
            second.dim(),
            third.dim()
        );

        let to_value = |tensor: &Array4<f32>| {
            Value::from_array(tensor.clone()).map_err(|e| {
                InpaintError::processing(format!("Failed to convert input tensor: {e}"))
            })
        };
        let (first, second, third) = (to_value(first)?, to_value(second)?, to_value(third)?);

        // Positional inputs, so exported tensor names do not matter
        let outputs = session
            .run(ort::inputs![first, second, third])
            .map_err(|e| InpaintError::inference(format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| InpaintError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| InpaintError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    InpaintError::inference(format!("Failed to extract output tensor: {e}"))
                })?
                .to_owned()
        };

        let output_rank = output_tensor.ndim();
        let result = output_tensor.into_dimensionality::<Ix4>().map_err(|_| {
            InpaintError::inference(format!("Expected 4D output tensor, got {output_rank}D"))
        })?;

        log::debug!(
            "Inference complete: {:.2}ms, output shape {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            result.dim()
        );

        Ok(result)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.model_info
            .clone()
            .ok_or_else(|| InpaintError::not_initialized("ONNX backend has no model loaded"))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shutdown(&mut self) {
        if self.session.take().is_some() {
            log::debug!("Released ONNX session");
        }
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelStage;

    #[test]
    fn test_list_providers_always_includes_cpu() {
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers
            .iter()
            .any(|(name, available, _)| name == "CPU" && *available));
    }

    #[test]
    fn test_thread_counts() {
        let config = ServiceConfig::builder().num_threads(6).build().unwrap();
        assert_eq!(OnnxBackend::thread_counts(&config), (6, 3));

        let (intra, inter) = OnnxBackend::thread_counts(&ServiceConfig::default());
        assert!(intra >= 1);
        assert!(inter >= 1);
    }

    #[test]
    fn test_uninitialized_backend() {
        let mut backend = OnnxBackend::new();
        assert!(!backend.is_initialized());
        assert!(backend.model_info().is_err());

        let t = Array4::<f32>::zeros((1, 1, 8, 8));
        assert!(matches!(
            backend.infer(&[&t, &t, &t]),
            Err(InpaintError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_initialize_rejects_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.onnx");
        std::fs::write(&path, b"not an onnx graph").unwrap();

        let mut backend = OnnxBackend::new();
        let model = ModelFile::new(ModelStage::Edge, &path);
        let config = ServiceConfig::builder()
            .execution_provider(ExecutionProvider::Cpu)
            .build()
            .unwrap();
        assert!(backend.initialize(&model, &config).is_err());
        assert!(!backend.is_initialized());

        let missing = ModelFile::new(ModelStage::Edge, dir.path().join("missing.onnx"));
        assert!(backend.initialize(&missing, &config).is_err());
    }
}
