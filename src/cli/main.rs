//! EdgeConnect web service CLI
//!
//! `serve` runs the HTTP service, `inpaint` runs one image/mask pair offline,
//! `providers` prints backend diagnostics.

use super::config::CliConfigBuilder;
use crate::{
    processor::{InpaintProcessor, InpaintRequest, MaskSource},
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Edge-guided image inpainting service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "edgeconnect-web")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE with quieter ONNX Runtime, -vvv: everything)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Console, global = true)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Inpaint one image with a mask file and write the result as PNG
    Inpaint(InpaintArgs),
    /// Show available backends and execution providers
    Providers,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum LogFormat {
    Console,
    Compact,
    /// Requires the `tracing-json` feature
    Json,
}

/// Options shared by `serve` and `inpaint`
#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ModelArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long, value_name = "PATH", env = "EDGECONNECT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Checkpoint directory containing config.json and the two models
    #[arg(long, value_name = "DIR", env = "EDGECONNECT_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Inference backend (onnx, tract)
    #[arg(short, long, env = "EDGECONNECT_BACKEND")]
    pub backend: Option<String>,

    /// ONNX Runtime execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, env = "EDGECONNECT_PROVIDER")]
    pub provider: Option<String>,

    /// Number of threads (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Use built-in stand-in models instead of a checkpoint (for smoke tests)
    #[arg(long)]
    pub mock_models: bool,

    /// Resize uploads to a square of this size before inference
    #[arg(long, value_name = "PIXELS", conflicts_with = "multiple_of")]
    pub model_size: Option<u32>,

    /// Keep the upload's aspect ratio, rounding each side up to this multiple
    #[arg(long, value_name = "N")]
    pub multiple_of: Option<u32>,

    /// Return the model-sized result instead of resizing back to the upload size
    #[arg(long)]
    pub no_restore_size: bool,

    /// Grey level above which a mask pixel is filled (0-255)
    #[arg(long)]
    pub mask_threshold: Option<u8>,

    /// Gaussian sigma used by the Canny edge detector
    #[arg(long)]
    pub canny_sigma: Option<f32>,

    /// Directory for saved uploads and debug rasters
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Keep a copy of each upload and result
    #[arg(long)]
    pub save_uploads: bool,

    /// Write the aligned image, mask, edges and grayscale rasters for each request
    #[arg(long)]
    pub debug_images: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", env = "EDGECONNECT_BIND")]
    pub bind: Option<SocketAddr>,

    /// Directory served under /static (its index.html replaces the built-in page)
    #[arg(long, value_name = "DIR", env = "EDGECONNECT_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Maximum request body size in MiB
    #[arg(long, value_name = "MIB")]
    pub max_upload_mb: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InpaintArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Photograph to repair
    #[arg(long, value_name = "PATH")]
    pub image: PathBuf,

    /// Mask image; white marks the pixels to fill
    #[arg(long, value_name = "PATH")]
    pub mask: PathBuf,

    /// Where to write the PNG result
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format).context("Failed to initialize tracing")?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Inpaint(args) => inpaint(args).await,
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
    }
}

fn init_tracing(verbose_count: u8, format: LogFormat) -> Result<()> {
    let format = match format {
        LogFormat::Console => TracingFormat::Console,
        LogFormat::Compact => TracingFormat::Compact,
        #[cfg(feature = "tracing-json")]
        LogFormat::Json => TracingFormat::Json,
        #[cfg(not(feature = "tracing-json"))]
        LogFormat::Json => anyhow::bail!("JSON logs require the 'tracing-json' feature"),
    };

    let mut config = TracingConfig::new()
        .with_verbosity(verbose_count)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init().context("Failed to initialize tracing subscriber")?;

    debug!(verbosity = verbose_count, "Tracing initialized");
    Ok(())
}

/// Build the processor and load both models off the async runtime
async fn load_processor(config: crate::config::ServiceConfig) -> Result<Arc<InpaintProcessor>> {
    info!(
        "Backend: {}, provider: {}, checkpoint: {}",
        config.backend,
        config.execution_provider,
        config.checkpoint_dir.display()
    );

    let processor = tokio::task::spawn_blocking(move || -> Result<InpaintProcessor> {
        let processor =
            InpaintProcessor::from_config(config).context("Failed to create inpainting processor")?;
        processor.initialize().context("Failed to load models")?;
        Ok(processor)
    })
    .await
    .context("Model loading task failed")??;

    for model in processor.model_info() {
        info!(
            "{} model: {} ({}, {:.2} MB)",
            model.stage,
            model.name,
            model.backend,
            model.size_bytes as f64 / (1024.0 * 1024.0)
        );
    }
    Ok(Arc::new(processor))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = CliConfigBuilder::for_serve(&args).context("Failed to build configuration")?;
    let processor = load_processor(config).await?;

    crate::server::serve(processor)
        .await
        .context("HTTP server failed")
}

async fn inpaint(args: InpaintArgs) -> Result<()> {
    let config = CliConfigBuilder::from_model_args(&args.model)
        .and_then(crate::config::ServiceConfigBuilder::build)
        .context("Failed to build configuration")?;

    let image = std::fs::read(&args.image)
        .with_context(|| format!("Failed to read image {}", args.image.display()))?;
    let mask = std::fs::read(&args.mask)
        .with_context(|| format!("Failed to read mask {}", args.mask.display()))?;

    let processor = load_processor(config).await?;
    let request = InpaintRequest {
        image,
        mask: MaskSource::Bytes(mask),
    };

    let worker = Arc::clone(&processor);
    let outcome = tokio::task::spawn_blocking(move || worker.process(&request))
        .await
        .context("Inpainting task failed")?
        .context("Inpainting failed")?;

    let png = outcome.to_png_bytes().context("Failed to encode result")?;
    std::fs::write(&args.output, png)
        .with_context(|| format!("Failed to write output {}", args.output.display()))?;

    let timings = &outcome.timings;
    info!(
        "Wrote {} ({}x{}) in {}ms [decode {}ms, preprocess {}ms, edge {}ms, inpaint {}ms, postprocess {}ms]",
        args.output.display(),
        outcome.image.width(),
        outcome.image.height(),
        timings.total_ms,
        timings.decode_ms,
        timings.preprocessing_ms,
        timings.edge_inference_ms,
        timings.inpaint_inference_ms,
        timings.postprocessing_ms
    );

    tokio::task::spawn_blocking(move || processor.shutdown())
        .await
        .context("Shutdown task failed")?;
    Ok(())
}

/// Display backend and execution provider diagnostics
fn show_provider_diagnostics() {
    use crate::processor::{BackendFactory, DefaultBackendFactory};

    println!("Backends compiled into this build:");
    for backend in DefaultBackendFactory.available_backends() {
        println!("  - {backend}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  - {name}: {status} ({description})");
        }
    }

    #[cfg(feature = "tract")]
    {
        println!("\nTract execution providers:");
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  - {name}: {status} ({description})");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[cfg(not(feature = "tracing-json"))]
    #[test]
    fn test_json_logs_require_feature() {
        // Rejected before any subscriber is installed
        let err = init_tracing(0, LogFormat::Json).unwrap_err();
        assert!(err.to_string().contains("tracing-json"));
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "edgeconnect-web",
            "serve",
            "--bind",
            "127.0.0.1:8080",
            "--checkpoint",
            "checkpoints/places2",
            "--backend",
            "tract",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(args.model.checkpoint, Some(PathBuf::from("checkpoints/places2")));
        assert_eq!(args.model.backend.as_deref(), Some("tract"));
    }

    #[test]
    fn test_parse_inpaint_requires_paths() {
        assert!(Cli::try_parse_from(["edgeconnect-web", "inpaint", "--image", "a.png"]).is_err());

        let cli = Cli::try_parse_from([
            "edgeconnect-web",
            "inpaint",
            "--image",
            "a.png",
            "--mask",
            "m.png",
            "-o",
            "out.png",
            "--mock-models",
        ])
        .unwrap();
        let Command::Inpaint(args) = cli.command else {
            panic!("expected inpaint");
        };
        assert!(args.model.mock_models);
        assert_eq!(args.output, PathBuf::from("out.png"));
    }

    #[test]
    fn test_size_flags_conflict() {
        let result = Cli::try_parse_from([
            "edgeconnect-web",
            "serve",
            "--model-size",
            "256",
            "--multiple-of",
            "8",
        ]);
        assert!(result.is_err());
    }
}
