//! Tract backend implementation for the inpainting models
//!
//! Pure Rust inference with no native runtime to install. Tract optimizes a
//! graph for concrete input shapes, so the decoded graph is kept and runnable
//! plans are built per set of input shapes. Only the most recently used
//! [`MAX_CACHED_PLANS`] plans stay alive.

use crate::config::ServiceConfig;
use crate::error::{InpaintError, Result};
use crate::inference::{expect_stage_inputs, InferenceBackend, STAGE_INPUTS};
use crate::models::{ModelFile, ModelInfo};
use log;
use ndarray::Array4;
use std::collections::VecDeque;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Shapes of the three stage inputs
type ShapeKey = [[usize; 4]; STAGE_INPUTS];

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Optimized plans kept per backend; each one holds a full copy of the weights
pub const MAX_CACHED_PLANS: usize = 4;

/// Plans ordered from most to least recently used
#[derive(Debug)]
struct PlanCache<T> {
    capacity: usize,
    entries: VecDeque<(ShapeKey, T)>,
}

impl<T> Default for PlanCache<T> {
    fn default() -> Self {
        Self::with_capacity(MAX_CACHED_PLANS)
    }
}

impl<T> PlanCache<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Move a cached plan to the front, or build one and evict the oldest
    fn get_or_try_insert_with<F>(&mut self, key: ShapeKey, build: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        match self.entries.iter().position(|(cached, _)| *cached == key) {
            Some(0) => {}
            Some(index) => {
                if let Some(entry) = self.entries.remove(index) {
                    self.entries.push_front(entry);
                }
            }
            None => {
                let plan = build()?;
                self.entries.truncate(self.capacity - 1);
                self.entries.push_front((key, plan));
            }
        }
        self.entries
            .front()
            .map(|(_, plan)| plan)
            .ok_or_else(|| InpaintError::internal("Tract plan missing after insertion"))
    }
}

/// Tract backend for running one pipeline stage using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    graph: Option<InferenceModel>,
    plans: PlanCache<TractModel>,
    model_info: Option<ModelInfo>,
    initialized: bool,
}

impl TractBackend {
    /// List all Tract execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Tract backend on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        // CPU is the only execution provider for Tract (pure Rust implementation)
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Create a new uninitialized Tract backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of optimized plans currently held
    #[must_use]
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Decode the ONNX graph; optimization is deferred until shapes are known
    fn load_model(&mut self, model: &ModelFile) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = model.load_bytes()?;
        let size_bytes = model_data.len();

        let graph = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| {
                InpaintError::model_error_with_context(
                    "parse",
                    &model.path,
                    &e.to_string(),
                    &["verify the file is an ONNX export of the network"],
                )
            })?;

        self.graph = Some(graph);
        self.plans.clear();
        self.model_info = Some(ModelInfo {
            name: model.display_name(),
            stage: model.stage,
            backend: self.name().to_string(),
            size_bytes,
        });
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "{} model decoded by Tract in {}ms ({:.2} MB)",
            model.stage,
            model_load_time.as_millis(),
            size_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(model_load_time)
    }

    /// Fetch or build the runnable plan for these input shapes
    fn plan_for(&mut self, key: ShapeKey) -> Result<&TractModel> {
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| InpaintError::not_initialized("Tract model not loaded"))?;
        self.plans
            .get_or_try_insert_with(key, || build_plan(graph, &key))
    }

    fn to_tensor(array: &Array4<f32>) -> Result<Tensor> {
        let data: Vec<f32> = array.iter().copied().collect();
        Tensor::from_shape(array.shape(), &data)
            .map_err(|e| InpaintError::processing(format!("Failed to convert input tensor: {e}")))
    }
}

fn build_plan(graph: &InferenceModel, key: &ShapeKey) -> Result<TractModel> {
    let build_start = Instant::now();
    let mut model = graph.clone();
    for (index, shape) in key.iter().enumerate() {
        model = model
            .with_input_fact(index, f32::fact(*shape).into())
            .map_err(|e| InpaintError::model(format!("Failed to set input {index} shape: {e}")))?;
    }
    let plan = model
        .into_optimized()
        .map_err(|e| InpaintError::model(format!("Failed to optimize model: {e}")))?
        .into_runnable()
        .map_err(|e| InpaintError::model(format!("Failed to create runnable model: {e}")))?;

    log::debug!(
        "Built Tract plan for input shapes {:?} in {}ms",
        key,
        build_start.elapsed().as_millis()
    );
    Ok(plan)
}

fn shape_of(array: &Array4<f32>) -> [usize; 4] {
    let (n, c, h, w) = array.dim();
    [n, c, h, w]
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn initialize(&mut self, model: &ModelFile, _config: &ServiceConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(model)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, inputs: &[&Array4<f32>]) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(InpaintError::not_initialized("Tract backend not initialized"));
        }
        let [first, second, third] = expect_stage_inputs(self.name(), inputs)?;

        let key = [shape_of(first), shape_of(second), shape_of(third)];
        let tensors: TVec<TValue> = tvec![
            Self::to_tensor(first)?.into(),
            Self::to_tensor(second)?.into(),
            Self::to_tensor(third)?.into(),
        ];

        let inference_start = Instant::now();
        let plan = self.plan_for(key)?;
        let outputs = plan
            .run(tensors)
            .map_err(|e| InpaintError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| InpaintError::inference("No output tensor found"))?
            .into_tensor();

        let output_shape = output_tensor.shape().to_vec();
        let [n, c, h, w] = output_shape[..] else {
            return Err(InpaintError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_data = output_tensor.as_slice::<f32>().map_err(|e| {
            InpaintError::inference(format!("Failed to convert output tensor: {e}"))
        })?;
        let output_array = Array4::from_shape_vec((n, c, h, w), output_data.to_vec())
            .map_err(|e| InpaintError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output_array.shape()
        );

        Ok(output_array)
    }

    fn model_info(&self) -> Result<ModelInfo> {
        self.model_info
            .clone()
            .ok_or_else(|| InpaintError::not_initialized("Tract backend has no model loaded"))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn shutdown(&mut self) {
        self.graph = None;
        self.plans.clear();
        self.initialized = false;
        log::debug!("Released Tract model");
    }
}
