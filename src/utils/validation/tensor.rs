//! Tensor and raster validation utilities
//!
//! Shape checks for the NCHW tensors exchanged with the models, plus the
//! dimension bounds applied to uploads and resize targets.

use crate::error::{InpaintError, Result};
use ndarray::Array4;

/// Smallest accepted side length, in pixels
pub const MIN_DIMENSION: u32 = 1;

/// Largest accepted side length, in pixels (16K)
pub const MAX_DIMENSION: u32 = 16384;

/// Validator for tensor operations and shape validation
pub struct TensorValidator;

impl TensorValidator {
    /// Validate tensor shape matches expected dimensions
    pub fn validate_tensor_shape(
        tensor: &Array4<f32>,
        expected_shape: (usize, usize, usize, usize),
    ) -> Result<()> {
        let actual = tensor.dim();
        if actual != expected_shape {
            let (batch, channels, height, width) = expected_shape;
            return Err(InpaintError::processing(format!(
                "Tensor shape mismatch. Expected [{}, {}, {}, {}], got [{}, {}, {}, {}]",
                batch, channels, height, width, actual.0, actual.1, actual.2, actual.3
            )));
        }
        Ok(())
    }

    /// Validate a model output against the spatial size of the model input
    ///
    /// Outputs must be a single batch with `channels` channels and the same
    /// height and width as `reference`.
    pub fn validate_model_output(
        stage: &str,
        output: &Array4<f32>,
        channels: usize,
        reference: &Array4<f32>,
    ) -> Result<()> {
        let (_, _, height, width) = reference.dim();
        Self::validate_tensor_shape(output, (1, channels, height, width))
            .and_then(|()| Self::validate_finite(output))
            .map_err(|e| {
                InpaintError::inference(format!("{stage} model returned an unexpected output: {e}"))
            })
    }

    /// Validate image dimensions are within reasonable bounds
    pub fn validate_image_dimensions(width: u32, height: u32) -> Result<()> {
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(InpaintError::invalid_input(format!(
                "Image dimensions too small: {}x{}. Minimum: {}x{}",
                width, height, MIN_DIMENSION, MIN_DIMENSION
            )));
        }

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(InpaintError::invalid_input(format!(
                "Image dimensions too large: {}x{}. Maximum: {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }

    /// Validate every tensor value is finite
    pub fn validate_finite(tensor: &Array4<f32>) -> Result<()> {
        if tensor.iter().any(|v| !v.is_finite()) {
            return Err(InpaintError::processing(
                "Tensor contains non-finite values (NaN or infinity)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_validate_tensor_shape() {
        let tensor = Array::zeros((1, 1, 256, 256));
        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 1, 256, 256)).is_ok());

        assert!(TensorValidator::validate_tensor_shape(&tensor, (1, 3, 256, 256)).is_err());
        assert!(TensorValidator::validate_tensor_shape(&tensor, (2, 1, 256, 256)).is_err());
    }

    #[test]
    fn test_validate_model_output() {
        let input = Array::zeros((1, 3, 64, 48));

        let good = Array::zeros((1, 1, 64, 48));
        assert!(TensorValidator::validate_model_output("edge", &good, 1, &input).is_ok());

        let wrong_channels = Array::zeros((1, 3, 64, 48));
        let err = TensorValidator::validate_model_output("edge", &wrong_channels, 1, &input)
            .unwrap_err();
        assert!(matches!(err, InpaintError::Inference(_)));
        assert!(err.to_string().contains("edge model"));

        let wrong_size = Array::zeros((1, 3, 32, 48));
        assert!(TensorValidator::validate_model_output("inpaint", &wrong_size, 3, &input).is_err());
    }

    #[test]
    fn test_validate_image_dimensions() {
        assert!(TensorValidator::validate_image_dimensions(1, 1).is_ok());
        assert!(TensorValidator::validate_image_dimensions(512, 512).is_ok());
        assert!(TensorValidator::validate_image_dimensions(16384, 16384).is_ok());

        assert!(TensorValidator::validate_image_dimensions(0, 512).is_err());
        assert!(TensorValidator::validate_image_dimensions(512, 0).is_err());
        assert!(TensorValidator::validate_image_dimensions(16385, 512).is_err());
    }

    #[test]
    fn test_validate_finite() {
        let mut tensor = Array::from_elem((1, 1, 4, 4), 0.5_f32);
        assert!(TensorValidator::validate_finite(&tensor).is_ok());

        tensor[[0, 0, 1, 1]] = f32::NAN;
        assert!(TensorValidator::validate_finite(&tensor).is_err());

        let reference = Array::zeros((1, 3, 4, 4));
        assert!(TensorValidator::validate_model_output("edge", &tensor, 1, &reference).is_err());
    }
}
