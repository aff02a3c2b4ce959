//! Pipeline configuration and TOML loading

use crate::packer::{Algorithm, PackOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required option is missing
    #[error("`{0}` is required")]
    Missing(&'static str),
    /// File I/O error
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Recognized pipeline options.
///
/// Mirrors the option set a stylesheet build would pass in: packer selection
/// and passthrough options, url resolution, retina handling, output naming and
/// the processing mode. Filters, groupers and the packer/file-store
/// implementations are attached programmatically on the pipeline builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpriteConfig {
    /// Packer default input list; unused by the pipeline, kept for parity
    /// with engine-side configuration
    pub src: Vec<PathBuf>,
    /// Packer engine selector; `None` selects automatically
    pub engine: Option<String>,
    /// Packing algorithm
    pub algorithm: Algorithm,
    /// Padding between packed images in pixels
    pub padding: u32,
    /// Opaque engine-specific options passed through to the packer
    pub engine_opts: Map<String, Value>,
    /// Opaque export options passed through to the packer
    pub export_opts: Map<String, Value>,
    /// Opaque image-handling options passed through to the packer
    pub img_opts: Map<String, Value>,
    /// Base path for root-relative urls
    pub base_url: PathBuf,
    /// Group and scale retina images by their density suffix
    pub retina: bool,
    /// Name for rewritten stylesheets; falls back to the source file name
    pub style_sheet_name: Option<String>,
    /// Base name for generated sheets; required
    pub sprite_sheet_name: Option<String>,
    /// Url prefix written in front of sheet paths in rewritten declarations
    pub sprite_sheet_path: Option<String>,
    /// Buffer all documents and resolve once at finalization
    pub accumulate: bool,
    /// Emit a diagnostic for every skipped image
    pub verbose: bool,
}

impl Default for SpriteConfig {
    fn default() -> Self {
        let mut img_opts = Map::new();
        img_opts.insert("timeout".to_string(), Value::from(30_000));
        Self {
            src: vec![],
            engine: None,
            algorithm: Algorithm::TopDown,
            padding: 0,
            engine_opts: Map::new(),
            export_opts: Map::new(),
            img_opts,
            base_url: PathBuf::from("."),
            retina: true,
            style_sheet_name: None,
            sprite_sheet_name: None,
            sprite_sheet_path: None,
            accumulate: false,
            verbose: false,
        }
    }
}

impl SpriteConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Check required options. Runs at pipeline construction, before any
    /// document is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sprite_sheet_name.as_deref() {
            None | Some("") => Err(ConfigError::Missing("sprite_sheet_name")),
            Some(_) => Ok(()),
        }
    }

    /// The configured sheet base name. Only valid after [`Self::validate`].
    pub(crate) fn sheet_name(&self) -> &str {
        self.sprite_sheet_name.as_deref().unwrap_or_default()
    }

    /// Global packing options derived from this configuration.
    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            engine: self.engine.clone(),
            algorithm: self.algorithm,
            padding: self.padding,
            engine_opts: self.engine_opts.clone(),
            export_opts: self.export_opts.clone(),
            img_opts: self.img_opts.clone(),
        }
    }
}
