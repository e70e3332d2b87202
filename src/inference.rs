//! Inference backend abstraction

use crate::{
    config::ServiceConfig,
    error::{InpaintError, Result},
    models::{ModelFile, ModelInfo},
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// One backend instance runs one model. Both pipeline stages take three NCHW
/// tensors in a fixed order and return a single NCHW tensor.
pub trait InferenceBackend: Send {
    /// Short backend identifier used in logs and model info
    fn name(&self) -> &'static str;

    /// Load the model
    ///
    /// Returns the load time, or `None` when the backend was already initialized.
    ///
    /// # Errors
    /// - Model file missing, unreadable or failing its checksum
    /// - Model graph rejected by the runtime
    fn initialize(&mut self, model: &ModelFile, config: &ServiceConfig)
        -> Result<Option<Duration>>;

    /// Run inference on the input tensors
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Wrong number of inputs
    /// - Model inference failures
    fn infer(&mut self, inputs: &[&Array4<f32>]) -> Result<Array4<f32>>;

    /// Get model information for this backend
    ///
    /// # Errors
    /// - Backend not initialized
    fn model_info(&self) -> Result<ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Release the loaded model; later calls to `infer` fail until re-initialized
    fn shutdown(&mut self);
}

/// Number of tensors every stage consumes
pub const STAGE_INPUTS: usize = 3;

/// Check an input slice has the stage arity and return it as an array
pub(crate) fn expect_stage_inputs<'a>(
    backend: &str,
    inputs: &[&'a Array4<f32>],
) -> Result<[&'a Array4<f32>; STAGE_INPUTS]> {
    match *inputs {
        [a, b, c] => Ok([a, b, c]),
        _ => Err(InpaintError::invalid_input(format!(
            "{backend} backend expects {STAGE_INPUTS} input tensors, got {}",
            inputs.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;
    use crate::models::ModelStage;

    #[test]
    fn test_expect_stage_inputs() {
        let t = Array4::<f32>::zeros((1, 1, 2, 2));
        assert!(expect_stage_inputs("test", &[&t, &t, &t]).is_ok());

        let err = expect_stage_inputs("test", &[&t, &t]).unwrap_err();
        assert!(err.to_string().contains("expects 3 input tensors, got 2"));
        assert!(expect_stage_inputs("test", &[]).is_err());
    }

    #[test]
    fn test_backend_trait_object_lifecycle() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new(ModelStage::Edge));
        let model = ModelFile::new(ModelStage::Edge, "edge.onnx");
        let config = ServiceConfig::default();

        assert!(!backend.is_initialized());
        assert!(backend.model_info().is_err());

        assert!(backend.initialize(&model, &config).unwrap().is_some());
        // Second call is a no-op
        assert!(backend.initialize(&model, &config).unwrap().is_none());
        assert_eq!(backend.model_info().unwrap().stage, ModelStage::Edge);

        backend.shutdown();
        assert!(!backend.is_initialized());
        let t = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(matches!(
            backend.infer(&[&t, &t, &t]),
            Err(InpaintError::NotInitialized(_))
        ));
    }
}
