//! Packer interface - the external rectangle-packing service boundary
//!
//! The pipeline treats packing as opaque: a request carries absolute image
//! paths plus options, a result carries composite bytes and a per-image
//! coordinate map. [`shelf::ShelfPacker`] is the built-in implementation.

pub mod shelf;

use crate::models::Coordinates;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Packing layout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Vertical strip, images stacked top to bottom
    #[default]
    TopDown,
    /// Horizontal strip, images placed left to right
    LeftRight,
    /// Images along the main diagonal
    Diagonal,
    /// Images along the anti-diagonal
    AltDiagonal,
    /// Shelf placement, tallest first
    BinaryTree,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Algorithm::TopDown => "top-down",
            Algorithm::LeftRight => "left-right",
            Algorithm::Diagonal => "diagonal",
            Algorithm::AltDiagonal => "alt-diagonal",
            Algorithm::BinaryTree => "binary-tree",
        };
        f.write_str(name)
    }
}

/// Options handed to the packer with every request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackOptions {
    /// Engine selector; `None` lets the packer pick
    pub engine: Option<String>,
    pub algorithm: Algorithm,
    /// Padding between images in pixels
    pub padding: u32,
    /// Opaque engine-specific options
    pub engine_opts: Map<String, Value>,
    /// Opaque export options
    pub export_opts: Map<String, Value>,
    /// Opaque image-handling options (e.g. a caller-imposed timeout)
    pub img_opts: Map<String, Value>,
}

/// One packing job: the images of a single sprite group.
#[derive(Debug, Clone)]
pub struct PackRequest {
    /// Absolute paths of the images to pack
    pub paths: Vec<PathBuf>,
    pub options: PackOptions,
}

/// A packed composite sheet as returned by a packer.
#[derive(Debug, Clone)]
pub struct PackedSheet {
    /// Encoded composite image bytes
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Offset of every requested image, keyed by its path
    pub coordinates: HashMap<PathBuf, Coordinates>,
}

/// Error raised by a packer or by pre-dispatch validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PackError {
    /// The request cannot be submitted as configured
    #[error("invalid packing options: {0}")]
    InvalidOptions(String),
    /// An input image could not be opened or decoded
    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// The composite sheet could not be encoded
    #[error("failed to encode sprite sheet: {0}")]
    Encode(image::ImageError),
    /// Opaque engine failure
    #[error("packing failed: {0}")]
    Engine(String),
}

/// External rectangle-packing service.
///
/// `validate` runs before any job is dispatched so that configuration
/// problems surface early instead of failing mid-flight; `pack` performs the
/// actual packing. Packing is assumed deterministic for identical input, so
/// callers never retry.
#[async_trait]
pub trait Packer: Send + Sync {
    /// Check a request without running it.
    fn validate(&self, request: &PackRequest) -> Result<(), PackError>;

    /// Pack the requested images into one composite sheet.
    async fn pack(&self, request: PackRequest) -> Result<PackedSheet, PackError>;
}
