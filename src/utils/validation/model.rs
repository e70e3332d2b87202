//! Checkpoint validation utilities
//!
//! Checks applied to checkpoint `config.json` documents before any model file
//! is opened.

use crate::error::{InpaintError, Result};
use std::path::Path;

/// Validator for checkpoint directories and their model entries
pub struct ModelValidator;

impl ModelValidator {
    /// Validate a checkpoint directory exists and is a directory
    pub fn validate_checkpoint_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(InpaintError::model_error_with_context(
                "locate",
                path,
                "checkpoint directory does not exist",
                &["pass --checkpoint <DIR>", "set EDGECONNECT_CHECKPOINT"],
            ));
        }
        if !path.is_dir() {
            return Err(InpaintError::invalid_config(format!(
                "Checkpoint path must be a directory: {}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Validate a checkpoint name (letters, digits, `-`, `_`)
    pub fn validate_checkpoint_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(InpaintError::invalid_config("Checkpoint name cannot be empty"));
        }

        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InpaintError::invalid_config(format!(
                "Invalid characters in checkpoint name: {}",
                name
            )));
        }

        Ok(())
    }

    /// Validate a model file name stays inside its checkpoint directory
    pub fn validate_model_file_name(file: &str) -> Result<()> {
        if file.trim().is_empty() {
            return Err(InpaintError::invalid_config("Model file name cannot be empty"));
        }

        let path = Path::new(file);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(InpaintError::invalid_config(format!(
                "Model file must be relative to the checkpoint directory: {}",
                file
            )));
        }

        Ok(())
    }

    /// Validate a SHA-256 digest string (64 hex characters)
    pub fn validate_sha256(digest: &str) -> Result<()> {
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InpaintError::invalid_config(format!(
                "Invalid SHA-256 digest '{}' (expected 64 hex characters)",
                digest
            )));
        }
        Ok(())
    }
}
