//! Configuration types for the inpainting service

use crate::error::{InpaintError, Result};
use crate::processor::BackendType;
use crate::utils::{CannyOptions, PreprocessingOptions, ResizePolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = InpaintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(InpaintError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Where per-request files are written, if at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactOptions {
    /// Root directory; each request gets its own `<request-id>/` subdirectory
    pub upload_dir: PathBuf,
    /// Persist the uploaded image and the final result
    pub save_uploads: bool,
    /// Persist `image.png`, `mask.png`, `edges.png` and `gray_image.png`
    pub debug_images: bool,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            save_uploads: false,
            debug_images: false,
        }
    }
}

impl ArtifactOptions {
    /// Whether any file is written at all
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.save_uploads || self.debug_images
    }
}

/// Complete service configuration
///
/// Loaded from a JSON document with [`ServiceConfig::from_file`]; every field is
/// optional in the file and falls back to [`ServiceConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the HTTP server listens on
    pub bind_address: SocketAddr,

    /// Directory holding `config.json` plus the two exported models
    pub checkpoint_dir: PathBuf,

    /// Inference backend used for both models
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Resizing, binarization and edge extraction settings
    pub preprocessing: PreprocessingOptions,

    /// Optional on-disk copies of inputs, results and intermediates
    pub artifacts: ArtifactOptions,

    /// Directory served under `/static`; its `index.html` replaces the built-in page
    pub static_dir: Option<PathBuf>,

    /// Maximum accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5000)),
            checkpoint_dir: PathBuf::from("checkpoints/celeba"),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0, // Auto-detect optimal intra-op threads
            inter_threads: 0, // Auto-detect optimal inter-op threads
            preprocessing: PreprocessingOptions::default(),
            artifacts: ArtifactOptions::default(),
            static_dir: None,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Load and validate a configuration file
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this schema
    /// - Values fail [`ServiceConfig::validate`]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| InpaintError::file_io_error("read service config", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            InpaintError::invalid_config(format!(
                "Failed to parse service config '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Fixed resize targets must be at least 1x1 and at most 16384 per side
    /// - Multiple-of alignment must be at least 1
    /// - Mask threshold must leave room for a foreground value (0-254)
    /// - Canny sigma must be positive and finite; thresholds satisfy 0 <= low <= high
    /// - Upload limit must be non-zero
    ///
    /// # Errors
    /// - Any rule above is violated
    pub fn validate(&self) -> Result<()> {
        match self.preprocessing.resize_policy {
            ResizePolicy::Fixed { width, height } => {
                crate::utils::TensorValidator::validate_image_dimensions(width, height)?;
            },
            ResizePolicy::MultipleOf { multiple } => {
                if multiple == 0 {
                    return Err(InpaintError::config_value_error(
                        "resize multiple",
                        multiple,
                        ">= 1",
                        Some(8),
                    ));
                }
            },
        }

        if self.preprocessing.mask_threshold == u8::MAX {
            return Err(InpaintError::config_value_error(
                "mask threshold",
                self.preprocessing.mask_threshold,
                "0-254",
                Some(127),
            ));
        }

        validate_canny(&self.preprocessing.canny)?;

        if self.max_upload_bytes == 0 {
            return Err(InpaintError::invalid_config(
                "max_upload_bytes must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn validate_canny(canny: &CannyOptions) -> Result<()> {
    if !canny.sigma.is_finite() || canny.sigma <= 0.0 {
        return Err(InpaintError::config_value_error(
            "canny sigma",
            canny.sigma,
            "> 0",
            Some(1.0),
        ));
    }
    if !(canny.low_threshold.is_finite() && canny.high_threshold.is_finite())
        || canny.low_threshold < 0.0
        || canny.low_threshold > canny.high_threshold
    {
        return Err(InpaintError::invalid_config(format!(
            "Invalid canny thresholds: low {} / high {} (expected 0 <= low <= high)",
            canny.low_threshold, canny.high_threshold
        )));
    }
    Ok(())
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Start from an existing configuration, e.g. one loaded from a file
    #[must_use]
    pub fn from_config(config: ServiceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn bind_address(mut self, address: SocketAddr) -> Self {
        self.config.bind_address = address;
        self
    }

    #[must_use]
    pub fn checkpoint_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.checkpoint_dir = dir.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (inter = threads/2, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    #[must_use]
    pub fn resize_policy(mut self, policy: ResizePolicy) -> Self {
        self.config.preprocessing.resize_policy = policy;
        self
    }

    #[must_use]
    pub fn restore_original_size(mut self, restore: bool) -> Self {
        self.config.preprocessing.restore_original_size = restore;
        self
    }

    #[must_use]
    pub fn mask_threshold(mut self, threshold: u8) -> Self {
        self.config.preprocessing.mask_threshold = threshold;
        self
    }

    #[must_use]
    pub fn canny(mut self, canny: CannyOptions) -> Self {
        self.config.preprocessing.canny = canny;
        self
    }

    #[must_use]
    pub fn upload_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.artifacts.upload_dir = dir.into();
        self
    }

    #[must_use]
    pub fn save_uploads(mut self, save: bool) -> Self {
        self.config.artifacts.save_uploads = save;
        self
    }

    #[must_use]
    pub fn debug_images(mut self, debug: bool) -> Self {
        self.config.artifacts.debug_images = debug;
        self
    }

    #[must_use]
    pub fn static_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.config.static_dir = dir.map(Into::into);
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule in [`ServiceConfig::validate`] is violated
    pub fn build(self) -> Result<ServiceConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
