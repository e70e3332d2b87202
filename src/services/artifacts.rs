//! Per-request artifact storage
//!
//! Uploads, results and intermediate rasters are written under
//! `<root>/<request-id>/`, so concurrent requests never share a file name.
//! Persisting artifacts is best effort: failures are logged and swallowed.

use crate::{
    config::ArtifactOptions,
    error::{InpaintError, Result},
    services::codec::ImageCodec,
    utils::{ImagePreprocessor, PreparedInputs},
};
use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writes request artifacts according to [`ArtifactOptions`]
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    options: ArtifactOptions,
}

impl ArtifactStore {
    /// Store under `root` with every kind of artifact enabled
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            options: ArtifactOptions {
                upload_dir: root.into(),
                save_uploads: true,
                debug_images: true,
            },
        }
    }

    /// Store configured from the service settings
    #[must_use]
    pub fn from_options(options: &ArtifactOptions) -> Self {
        Self {
            options: options.clone(),
        }
    }

    /// Whether anything will be written
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.options.enabled()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.options.upload_dir
    }

    /// Directory holding one request's artifacts
    #[must_use]
    pub fn request_dir(&self, request_id: Uuid) -> PathBuf {
        self.options.upload_dir.join(request_id.to_string())
    }

    /// Save the uploaded image bytes as `input.<ext>`
    pub fn save_upload(&self, request_id: Uuid, bytes: &[u8]) -> Option<PathBuf> {
        if !self.options.save_uploads {
            return None;
        }
        let name = format!("input.{}", ImageCodec::guess_extension(bytes));
        self.best_effort(request_id, &name, |path| {
            std::fs::write(path, bytes).map_err(|e| InpaintError::file_io_error("write", path, &e))
        })
    }

    /// Save the final composited image as `result.png`
    pub fn save_result(&self, request_id: Uuid, image: &RgbImage) -> Option<PathBuf> {
        if !self.options.save_uploads {
            return None;
        }
        self.best_effort(request_id, "result.png", |path| {
            image.save_with_format(path, ImageFormat::Png)?;
            Ok(())
        })
    }

    /// Save the aligned image, mask, edges and grayscale rasters
    pub fn save_debug(&self, request_id: Uuid, prepared: &PreparedInputs) -> Vec<PathBuf> {
        if !self.options.debug_images {
            return Vec::new();
        }

        let rasters = [
            ("image.png", DynamicImage::ImageRgb8(prepared.image().clone())),
            ("mask.png", DynamicImage::ImageLuma8(prepared.mask().clone())),
            ("edges.png", DynamicImage::ImageLuma8(prepared.edges().clone())),
            ("gray_image.png", DynamicImage::ImageLuma8(prepared.gray().clone())),
        ];

        rasters
            .iter()
            .filter_map(|(name, raster)| {
                self.best_effort(request_id, name, |path| {
                    raster.save_with_format(path, ImageFormat::Png)?;
                    Ok(())
                })
            })
            .collect()
    }

    /// Save the edge model's output as `edges_pred.png`
    pub fn save_predicted_edges(&self, request_id: Uuid, edges: &Array4<f32>) -> Option<PathBuf> {
        if !self.options.debug_images {
            return None;
        }
        self.best_effort(request_id, "edges_pred.png", |path| {
            ImagePreprocessor::tensor_to_gray(edges)?.save_with_format(path, ImageFormat::Png)?;
            Ok(())
        })
    }

    fn best_effort<F>(&self, request_id: Uuid, name: &str, write: F) -> Option<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let dir = self.request_dir(request_id);
        let path = dir.join(name);
        let outcome = std::fs::create_dir_all(&dir)
            .map_err(|e| InpaintError::file_io_error("create artifact directory", &dir, &e))
            .and_then(|()| write(&path));

        match outcome {
            Ok(()) => {
                tracing::debug!(request_id = %request_id, path = %path.display(), "Saved artifact");
                Some(path)
            },
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to save artifact {}", name);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PreprocessingOptions;
    use image::{GrayImage, Luma, Rgb};

    fn prepared() -> PreparedInputs {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
        let mask = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([255])));
        let options = PreprocessingOptions {
            resize_policy: crate::utils::ResizePolicy::MultipleOf { multiple: 1 },
            ..PreprocessingOptions::default()
        };
        ImagePreprocessor::prepare(&image, &mask, &options).unwrap()
    }

    #[test]
    fn test_artifacts_are_written_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let png = ImageCodec::encode_png(&RgbImage::new(2, 2)).unwrap();
        let upload = store.save_upload(first, &png).unwrap();
        assert_eq!(upload, dir.path().join(first.to_string()).join("input.png"));

        let result = store.save_result(second, &RgbImage::new(3, 3)).unwrap();
        assert_eq!(result, dir.path().join(second.to_string()).join("result.png"));
        assert!(!store.request_dir(second).join("input.png").exists());

        let debug = store.save_debug(first, &prepared());
        assert_eq!(debug.len(), 4);
        for name in ["image.png", "mask.png", "edges.png", "gray_image.png"] {
            assert!(store.request_dir(first).join(name).exists(), "{name} missing");
        }

        let predicted = Array4::<f32>::from_elem((1, 1, 4, 4), 1.0);
        let path = store.save_predicted_edges(first, &predicted).unwrap();
        assert_eq!(image::open(path).unwrap().to_luma8().get_pixel(2, 2)[0], 255);
        // Only single-channel tensors are rasterized
        let rgb = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(store.save_predicted_edges(second, &rgb).is_none());
    }

    #[test]
    fn test_disabled_store_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let options = ArtifactOptions {
            upload_dir: dir.path().to_path_buf(),
            ..ArtifactOptions::default()
        };
        let store = ArtifactStore::from_options(&options);
        assert!(!store.enabled());

        let id = Uuid::new_v4();
        assert!(store.save_upload(id, b"bytes").is_none());
        assert!(store.save_result(id, &RgbImage::new(1, 1)).is_none());
        assert!(store.save_debug(id, &prepared()).is_empty());
        assert!(store
            .save_predicted_edges(id, &Array4::zeros((1, 1, 2, 2)))
            .is_none());
        assert!(!store.request_dir(id).exists());
    }

    #[test]
    fn test_store_follows_configured_options() {
        let options = ArtifactOptions {
            upload_dir: PathBuf::from("/tmp/edgeconnect-artifacts"),
            save_uploads: false,
            debug_images: true,
        };
        let store = ArtifactStore::from_options(&options);
        assert!(store.enabled());
        assert_eq!(store.root(), Path::new("/tmp/edgeconnect-artifacts"));
        // Uploads stay off even though the store is enabled
        assert!(store.save_upload(Uuid::new_v4(), b"bytes").is_none());
    }

    #[test]
    fn test_write_failures_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the root directory should be
        let blocked = dir.path().join("uploads");
        std::fs::write(&blocked, b"occupied").unwrap();

        let store = ArtifactStore::new(&blocked);
        let id = Uuid::new_v4();
        assert!(store.save_result(id, &RgbImage::new(1, 1)).is_none());
        assert!(store.save_upload(id, b"bytes").is_none());
    }
}
