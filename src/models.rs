//! Checkpoint configuration and model file management
//!
//! A checkpoint directory (e.g. `checkpoints/celeba`) holds the two exported
//! networks and a `config.json` naming them:
//!
//! ```json
//! {
//!   "name": "celeba",
//!   "edge": { "file": "edge.onnx", "sha256": "<64 hex chars>" },
//!   "inpaint": { "file": "inpaint.onnx" }
//! }
//! ```

use crate::{
    error::{InpaintError, Result},
    utils::ModelValidator,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the checkpoint description inside a checkpoint directory
pub const CHECKPOINT_CONFIG_FILE: &str = "config.json";

/// The two networks of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStage {
    /// Completes the edge map inside the masked region
    Edge,
    /// Fills colour and texture guided by the completed edges
    Inpaint,
}

impl ModelStage {
    /// Channels of the stage's output tensor
    #[must_use]
    pub fn output_channels(self) -> usize {
        match self {
            Self::Edge => 1,
            Self::Inpaint => 3,
        }
    }

    /// Channels of each of the stage's three input tensors, in call order
    #[must_use]
    pub fn input_channels(self) -> [usize; 3] {
        match self {
            // gray, edges, mask
            Self::Edge => [1, 1, 1],
            // image, predicted edges, mask
            Self::Inpaint => [3, 1, 1],
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edge => write!(f, "edge"),
            Self::Inpaint => write!(f, "inpaint"),
        }
    }
}

/// One model entry of `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Path relative to the checkpoint directory
    pub file: String,
    /// Expected SHA-256 of the file, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Parsed `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub name: String,
    pub edge: ModelEntry,
    pub inpaint: ModelEntry,
}

impl CheckpointConfig {
    /// Parse and validate a checkpoint description
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            InpaintError::invalid_config(format!("Invalid checkpoint configuration: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ModelValidator::validate_checkpoint_name(&self.name)?;
        for entry in [&self.edge, &self.inpaint] {
            ModelValidator::validate_model_file_name(&entry.file)?;
            if let Some(digest) = &entry.sha256 {
                ModelValidator::validate_sha256(digest)?;
            }
        }
        Ok(())
    }
}

/// A model file on disk with its optional integrity checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
    pub stage: ModelStage,
    pub path: PathBuf,
    pub sha256: Option<String>,
}

impl ModelFile {
    pub fn new<P: Into<PathBuf>>(stage: ModelStage, path: P) -> Self {
        Self {
            stage,
            path: path.into(),
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// SHA256 of `data` as lowercase hex
    #[must_use]
    pub fn calculate_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Read the model file, verifying its checksum when one is configured
    ///
    /// # Errors
    /// - File cannot be read
    /// - Checksum does not match
    pub fn load_bytes(&self) -> Result<Vec<u8>> {
        let data = fs::read(&self.path)
            .map_err(|e| InpaintError::file_io_error("read model file", &self.path, &e))?;
        self.verify_bytes(&data)?;
        Ok(data)
    }

    /// Check `data` against the configured checksum
    ///
    /// # Errors
    /// - Checksum does not match
    pub fn verify_bytes(&self, data: &[u8]) -> Result<()> {
        let Some(expected) = &self.sha256 else {
            return Ok(());
        };

        let actual = Self::calculate_hash(data);
        if actual.eq_ignore_ascii_case(expected) {
            log::debug!("Checksum verified for {}", self.path.display());
            Ok(())
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                self.path.display(),
                expected,
                actual
            );
            Err(InpaintError::model_error_with_context(
                "verify",
                &self.path,
                &format!("SHA-256 mismatch (expected {expected}, got {actual})"),
                &["re-export the model", "update the checksum in config.json"],
            ))
        }
    }

    /// File name for logs
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Model information and metadata reported by a loaded backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub stage: ModelStage,
    pub backend: String,
    pub size_bytes: usize,
}

/// The resolved pair of models for one checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSet {
    pub name: String,
    pub edge: ModelFile,
    pub inpaint: ModelFile,
}

impl CheckpointSet {
    pub fn new<S: Into<String>>(name: S, edge: ModelFile, inpaint: ModelFile) -> Self {
        Self {
            name: name.into(),
            edge,
            inpaint,
        }
    }

    /// Load a checkpoint directory
    ///
    /// Parses `config.json`, resolves both model paths against the directory and
    /// checks that the files exist. Checksums are verified when the models are
    /// read by a backend.
    ///
    /// # Errors
    /// - Directory or `config.json` missing or unreadable
    /// - Invalid configuration document
    /// - A referenced model file does not exist
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        ModelValidator::validate_checkpoint_dir(dir)?;

        let config_path = dir.join(CHECKPOINT_CONFIG_FILE);
        let content = fs::read_to_string(&config_path).map_err(|e| {
            InpaintError::file_io_error("read checkpoint configuration", &config_path, &e)
        })?;
        let config = CheckpointConfig::from_json(&content)?;

        let resolve = |stage: ModelStage, entry: &ModelEntry| -> Result<ModelFile> {
            let path = dir.join(&entry.file);
            if !path.is_file() {
                let hint = format!("check '{}' in {}", entry.file, config_path.display());
                return Err(InpaintError::model_error_with_context(
                    "locate",
                    &path,
                    &format!("{stage} model file does not exist"),
                    &[hint.as_str()],
                ));
            }
            Ok(ModelFile {
                stage,
                path,
                sha256: entry.sha256.clone(),
            })
        };

        let edge = resolve(ModelStage::Edge, &config.edge)?;
        let inpaint = resolve(ModelStage::Inpaint, &config.inpaint)?;

        log::info!(
            "Loaded checkpoint '{}' from {} (edge: {}, inpaint: {})",
            config.name,
            dir.display(),
            edge.display_name(),
            inpaint.display_name()
        );

        Ok(Self::new(config.name, edge, inpaint))
    }

    /// Placeholder set for backends that never read model files
    #[must_use]
    pub fn placeholder<S: Into<String>>(name: S) -> Self {
        Self::new(
            name,
            ModelFile::new(ModelStage::Edge, "edge.onnx"),
            ModelFile::new(ModelStage::Inpaint, "inpaint.onnx"),
        )
    }

    /// Model file for a stage
    #[must_use]
    pub fn file(&self, stage: ModelStage) -> &ModelFile {
        match stage {
            ModelStage::Edge => &self.edge,
            ModelStage::Inpaint => &self.inpaint,
        }
    }
}
