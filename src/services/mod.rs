//! Service layer for I/O around the pipeline
//!
//! - `codec`: base64/data URL handling, image decoding and PNG encoding
//! - `artifacts`: optional per-request files on disk

pub mod artifacts;
pub mod codec;

pub use artifacts::ArtifactStore;
pub use codec::{ImageCodec, PNG_MIME};
