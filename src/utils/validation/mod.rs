//! Input and configuration validation

pub mod model;
pub mod tensor;

pub use model::ModelValidator;
pub use tensor::{TensorValidator, MAX_DIMENSION, MIN_DIMENSION};
