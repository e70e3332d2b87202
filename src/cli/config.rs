//! Configuration conversion utilities for CLI arguments

use super::main_impl::{ModelArgs, ServeArgs};
use crate::{
    config::{ExecutionProvider, ServiceConfig, ServiceConfigBuilder},
    error::Result,
    processor::BackendType,
    utils::{CannyOptions, ResizePolicy},
};

/// Convert CLI arguments to a [`ServiceConfig`]
///
/// Precedence: flag (or its environment variable) > config file > default.
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Apply the shared model flags on top of the config file (if any)
    pub(crate) fn from_model_args(args: &ModelArgs) -> Result<ServiceConfigBuilder> {
        let base = match &args.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        let canny = base.preprocessing.canny;
        let mut builder = ServiceConfigBuilder::from_config(base);

        if let Some(dir) = &args.checkpoint {
            builder = builder.checkpoint_dir(dir);
        }
        if args.mock_models {
            builder = builder.backend(BackendType::Mock);
        } else if let Some(backend) = &args.backend {
            builder = builder.backend(backend.parse::<BackendType>()?);
        }
        if let Some(provider) = &args.provider {
            builder = builder.execution_provider(provider.parse::<ExecutionProvider>()?);
        }
        if let Some(threads) = args.threads {
            builder = builder.num_threads(threads);
        }
        if let Some(size) = args.model_size {
            builder = builder.resize_policy(ResizePolicy::Fixed {
                width: size,
                height: size,
            });
        }
        if let Some(multiple) = args.multiple_of {
            builder = builder.resize_policy(ResizePolicy::MultipleOf { multiple });
        }
        if args.no_restore_size {
            builder = builder.restore_original_size(false);
        }
        if let Some(threshold) = args.mask_threshold {
            builder = builder.mask_threshold(threshold);
        }
        if let Some(sigma) = args.canny_sigma {
            builder = builder.canny(CannyOptions { sigma, ..canny });
        }
        if let Some(dir) = &args.upload_dir {
            builder = builder.upload_dir(dir);
        }
        if args.save_uploads {
            builder = builder.save_uploads(true);
        }
        if args.debug_images {
            builder = builder.debug_images(true);
        }

        Ok(builder)
    }

    /// Full configuration for `serve`
    pub(crate) fn for_serve(args: &ServeArgs) -> Result<ServiceConfig> {
        let mut builder = Self::from_model_args(&args.model)?;

        if let Some(bind) = args.bind {
            builder = builder.bind_address(bind);
        }
        if args.static_dir.is_some() {
            builder = builder.static_dir(args.static_dir.clone());
        }
        if let Some(mb) = args.max_upload_mb {
            builder = builder.max_upload_bytes(mb.saturating_mul(1024 * 1024));
        }

        builder.build()
    }
}
