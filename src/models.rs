//! Data models for stylesheet image references and pipeline records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Packed offset and size of a single image within a composite sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Final placement attached to a reference once its group has been packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Offset and size within the composite sheet
    pub coordinates: Coordinates,
    /// Composite sheet width in pixels
    pub sheet_width: u32,
    /// Composite sheet height in pixels
    pub sheet_height: u32,
    /// Sheet url as written into the rewritten declaration
    pub sheet_path: String,
}

/// One parsed occurrence of a `background-image` declaration.
///
/// Created by the extractor per textual match. The policy pipeline appends
/// group labels, the output mapper attaches the placement, and the rewriter
/// consumes the record without mutating it further.
#[derive(Debug, Clone)]
pub struct ImageReference {
    /// The exact declaration span as matched in the source document, through
    /// the terminating `;`. Used as the substitution key.
    pub original_token: String,
    /// The raw url as written in the source
    pub url: String,
    /// Absolute filesystem path the url resolves to
    pub resolved_path: PathBuf,
    /// Whether the filename carries an `@Nx` density suffix
    pub is_retina: bool,
    /// Density multiplier from the `@Nx` suffix, 1 for non-retina
    pub retina_ratio: u32,
    /// Open key/value map from the inline `/* @meta {...} */` annotation
    pub metadata: Map<String, Value>,
    /// Labels appended by each grouper, in policy order
    pub group_labels: Vec<String>,
    /// Packed placement, attached by the output mapper
    pub placement: Option<Placement>,
}

impl ImageReference {
    /// True when the inline annotation declares this image should be skipped.
    ///
    /// The annotation is an open JSON map, so `skip` follows JSON truthiness:
    /// `false`, `null`, `0` and `""` do not skip.
    pub fn skip_requested(&self) -> bool {
        self.metadata.get("skip").map(truthy).unwrap_or(false)
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A diagnostic collected while scanning a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Warning {
    pub message: String,
    pub line: usize,
}

/// Payload of a document fed into the pipeline.
#[derive(Debug, Clone)]
pub enum Payload {
    /// No contents; nothing to scan or rewrite
    Empty,
    /// Fully buffered document text
    Buffer(Vec<u8>),
    /// Streamed contents, which the pipeline does not support
    Stream,
}

/// One stylesheet document fed into the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub payload: Payload,
}

impl Document {
    /// Create a buffered document from its source path and contents.
    pub fn buffered(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self { path: path.into(), payload: Payload::Buffer(contents.into()) }
    }

    /// The document's own file name, used when no stylesheet name is configured.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// A file emitted on one of the pipeline's output channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
}
