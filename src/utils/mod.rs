//! Image and tensor utilities shared by the processor, CLI and server

pub mod compositing;
pub mod edges;
pub mod preprocessing;
pub mod validation;

pub use compositing::{composite, tensor_to_rgb};
pub use edges::{canny, CannyOptions};
pub use preprocessing::{
    ImagePreprocessor, ModelTensors, PreparedInputs, PreprocessingOptions, ResizePolicy,
};
pub use validation::{ModelValidator, TensorValidator};
