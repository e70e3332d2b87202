//! Deterministic in-process backend
//!
//! Needs no model files. Used by the test suite and by `--mock-models` dry runs
//! to exercise the whole request path without ONNX Runtime or Tract.
//!
//! - Edge stage: returns the incoming edge map unchanged.
//! - Inpaint stage: fills every pixel with the mean colour of the unmasked area.

use crate::{
    config::ServiceConfig,
    error::{InpaintError, Result},
    inference::{expect_stage_inputs, InferenceBackend},
    models::{ModelFile, ModelInfo, ModelStage},
};
use instant::Duration;
use ndarray::{s, Array4};
use std::sync::{Arc, Mutex};

/// Mock backend for one pipeline stage
#[derive(Debug, Clone)]
pub struct MockBackend {
    stage: ModelStage,
    /// Whether the backend has been initialized
    initialized: bool,
    model_info: Option<ModelInfo>,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    /// Whether to simulate initialization failure
    should_fail_init: bool,
    /// Whether to simulate inference failure
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new(stage: ModelStage) -> Self {
        Self {
            stage,
            initialized: false,
            model_info: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init(stage: ModelStage) -> Self {
        let mut backend = Self::new(stage);
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference(stage: ModelStage) -> Self {
        let mut backend = Self::new(stage);
        backend.should_fail_inference = true;
        backend
    }

    /// Get the call history for verification in tests
    ///
    /// Clones share one history, so a clone kept by a test observes the calls
    /// made through a boxed copy handed to the processor.
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Mean colour of the pixels where the mask is 0 (0.5 grey if everything is masked)
    fn unmasked_mean(image: &Array4<f32>, mask: &Array4<f32>) -> [f32; 3] {
        let mut sums = [0.0_f64; 3];
        let mut count = 0_usize;
        let (_, _, height, width) = image.dim();

        #[allow(clippy::indexing_slicing)]
        // Safe: loop bounds come from the image tensor and the mask shares its size
        for y in 0..height {
            for x in 0..width {
                if mask[[0, 0, y, x]] < 0.5 {
                    for (channel, sum) in sums.iter_mut().enumerate() {
                        *sum += f64::from(image[[0, channel, y, x]]);
                    }
                    count += 1;
                }
            }
        }

        if count == 0 {
            return [0.5; 3];
        }
        sums.map(|sum| (sum / count as f64) as f32)
    }
}

impl InferenceBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&mut self, model: &ModelFile, _config: &ServiceConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(InpaintError::model(format!(
                "Mock {} backend initialization failed",
                self.stage
            )));
        }
        if self.initialized {
            return Ok(None);
        }

        self.model_info = Some(ModelInfo {
            name: model.display_name(),
            stage: self.stage,
            backend: self.name().to_string(),
            size_bytes: 0,
        });
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, inputs: &[&Array4<f32>]) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(InpaintError::not_initialized(format!(
                "Mock {} backend not initialized",
                self.stage
            )));
        }
        if self.should_fail_inference {
            return Err(InpaintError::inference(format!(
                "Mock {} backend inference failed",
                self.stage
            )));
        }

        let [first, second, third] = expect_stage_inputs(self.name(), inputs)?;
        let (_, _, height, width) = first.dim();
        let channels = [first.dim().1, second.dim().1, third.dim().1];
        if channels != self.stage.input_channels()
            || second.dim().2 != height
            || second.dim().3 != width
            || third.dim() != (1, 1, height, width)
        {
            return Err(InpaintError::invalid_input(format!(
                "Mock {} backend received misaligned inputs: {:?}, {:?}, {:?}",
                self.stage,
                first.shape(),
                second.shape(),
                third.shape()
            )));
        }

        match self.stage {
            // (gray, edges, mask) -> edges
            ModelStage::Edge => Ok(second.slice(s![.., 0..1, .., ..]).to_owned()),
            // (image, edges, mask) -> flat fill
            ModelStage::Inpaint => {
                let mean = Self::unmasked_mean(first, third);
                let mut output = Array4::<f32>::zeros((1, 3, height, width));
                for (channel, value) in mean.iter().enumerate() {
                    output.slice_mut(s![0, channel, .., ..]).fill(*value);
                }
                Ok(output)
            },
        }
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.record_call("model_info");
        self.model_info
            .clone()
            .ok_or_else(|| InpaintError::not_initialized("Mock backend has no model loaded"))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shutdown(&mut self) {
        self.record_call("shutdown");
        self.initialized = false;
        self.model_info = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(stage: ModelStage) -> MockBackend {
        let mut backend = MockBackend::new(stage);
        backend
            .initialize(&ModelFile::new(stage, "model.onnx"), &ServiceConfig::default())
            .unwrap();
        backend
    }

    #[test]
    fn test_edge_stage_echoes_edges() {
        let mut backend = ready(ModelStage::Edge);
        let gray = Array4::<f32>::from_elem((1, 1, 4, 6), 0.3);
        let mut edges = Array4::<f32>::zeros((1, 1, 4, 6));
        edges[[0, 0, 2, 3]] = 1.0;
        let mask = Array4::<f32>::zeros((1, 1, 4, 6));

        let output = backend.infer(&[&gray, &edges, &mask]).unwrap();
        assert_eq!(output, edges);
    }

    #[test]
    fn test_inpaint_stage_fills_with_unmasked_mean() {
        let mut backend = ready(ModelStage::Inpaint);
        let mut image = Array4::<f32>::zeros((1, 3, 2, 2));
        image.slice_mut(s![0, 0, .., ..]).fill(0.2);
        image.slice_mut(s![0, 1, .., ..]).fill(0.4);
        image[[0, 2, 0, 0]] = 1.0; // masked pixel, ignored
        let edges = Array4::<f32>::zeros((1, 1, 2, 2));
        let mut mask = Array4::<f32>::zeros((1, 1, 2, 2));
        mask[[0, 0, 0, 0]] = 1.0;

        let output = backend.infer(&[&image, &edges, &mask]).unwrap();
        assert_eq!(output.dim(), (1, 3, 2, 2));
        assert!((output[[0, 0, 1, 1]] - 0.2).abs() < 1e-6);
        assert!((output[[0, 1, 0, 0]] - 0.4).abs() < 1e-6);
        assert!(output[[0, 2, 0, 1]].abs() < 1e-6);

        // Fully masked input falls back to grey
        let full = Array4::<f32>::ones((1, 1, 2, 2));
        let output = backend.infer(&[&image, &edges, &full]).unwrap();
        assert!(output.iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_failure_modes() {
        let model = ModelFile::new(ModelStage::Edge, "edge.onnx");
        let config = ServiceConfig::default();

        let mut failing = MockBackend::new_failing_init(ModelStage::Edge);
        assert!(failing.initialize(&model, &config).is_err());
        assert!(!failing.is_initialized());

        let mut failing = MockBackend::new_failing_inference(ModelStage::Edge);
        failing.initialize(&model, &config).unwrap();
        let t = Array4::<f32>::zeros((1, 1, 2, 2));
        assert!(matches!(
            failing.infer(&[&t, &t, &t]),
            Err(InpaintError::Inference(_))
        ));

        let mut backend = ready(ModelStage::Edge);
        let wrong = Array4::<f32>::zeros((1, 1, 3, 2));
        assert!(backend.infer(&[&t, &t, &wrong]).is_err());
        assert!(backend.infer(&[&t, &t]).is_err());
        let rgb = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(backend.infer(&[&rgb, &t, &t]).is_err());
    }

    #[test]
    fn test_call_history_is_shared_between_clones() {
        let backend = MockBackend::new(ModelStage::Inpaint);
        let observer = backend.clone();
        let mut boxed: Box<dyn InferenceBackend> = Box::new(backend);

        boxed
            .initialize(&ModelFile::new(ModelStage::Inpaint, "i.onnx"), &ServiceConfig::default())
            .unwrap();
        boxed.shutdown();
        assert_eq!(observer.call_history(), vec!["initialize", "shutdown"]);
    }
}
