//! EdgeConnect web service binary
//!
//! Serves the drawing page and the `/inpaint` API, or runs the pipeline once
//! from the command line.

#[cfg(feature = "cli")]
use edgeconnect_web::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
