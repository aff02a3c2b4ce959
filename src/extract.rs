//! Reference extraction - scans stylesheet text for background-image declarations
//!
//! Extraction is lenient: anything that cannot be used degrades to a skipped
//! record plus a warning, never a hard failure.

use crate::config::SpriteConfig;
use crate::models::{ImageReference, Warning};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Result of scanning one document.
#[derive(Debug, Default)]
pub struct ExtractResult {
    /// Every matched occurrence, in document order
    pub references: Vec<ImageReference>,
    pub warnings: Vec<Warning>,
}

/// Scanner for background-image declarations.
///
/// Holds the compiled patterns; every call to [`Extractor::extract`] owns its
/// own match cursor, so extractions never interfere with each other.
#[derive(Debug)]
pub struct Extractor {
    base_url: PathBuf,
    retina: bool,
    declaration: Regex,
    retina_suffix: Regex,
    external_url: Regex,
    raster_ext: Regex,
}

impl Extractor {
    pub fn new(config: &SpriteConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            retina: config.retina,
            // Group 1: the exact declaration span (the substitution token).
            // Group 2: the url. Group 3: the optional inline annotation JSON.
            declaration: Regex::new(
                r#"(?i)(background-image\s*:\s*url\(\s*["']?\s*([\w\s!:./@-]*\.[\w?#]+)\s*["']?\s*\)[^;]*;)(?:\s*/\*\s*@meta\s*(\{.*\})\s*\*/)?"#,
            )
            .expect("declaration pattern compiles"),
            retina_suffix: Regex::new(r"(?i)@(\d)x\.[a-z]{3,4}$").expect("retina pattern compiles"),
            external_url: Regex::new(r"(?i)^https?://").expect("scheme pattern compiles"),
            raster_ext: Regex::new(r"(?i)\.(png|jpe?g)$").expect("extension pattern compiles"),
        }
    }

    /// Scan one document's text.
    ///
    /// `document_path` is the document's own location; relative urls resolve
    /// against its directory, root-relative urls against the configured base.
    pub fn extract(&self, document_path: &Path, content: &str) -> ExtractResult {
        let mut result = ExtractResult::default();
        let document_name = document_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for captures in self.declaration.captures_iter(content) {
            let whole = captures.get(0).map(|m| m.start()).unwrap_or(0);
            let line = content[..whole].matches('\n').count() + 1;
            let token = &captures[1];
            let url = &captures[2];

            if self.external_url.is_match(url) {
                let message = format!("{} > {} skipped as it's an external resource", document_name, url);
                tracing::debug!("{}", message);
                result.warnings.push(Warning { message, line });
                continue;
            }

            if !self.raster_ext.is_match(url) {
                let message = format!("{} > {} skipped as it's not a png or jpeg", document_name, url);
                tracing::debug!("{}", message);
                result.warnings.push(Warning { message, line });
                continue;
            }

            let metadata = match captures.get(3) {
                Some(raw) => match parse_annotation(raw.as_str()) {
                    Ok(map) => map,
                    Err(err) => {
                        let message =
                            format!("{} > can not parse meta json for {}: \"{}\"", document_name, url, err);
                        tracing::warn!("{}", message);
                        result.warnings.push(Warning { message, line });
                        Map::new()
                    }
                },
                None => Map::new(),
            };

            let (is_retina, retina_ratio) = if self.retina {
                match self.retina_suffix.captures(url).and_then(|c| c[1].parse::<u32>().ok()) {
                    Some(ratio) if ratio > 0 => (true, ratio),
                    _ => (false, 1),
                }
            } else {
                (false, 1)
            };

            let resolved_path = self.resolve(document_path, url);

            result.references.push(ImageReference {
                original_token: token.to_string(),
                url: url.to_string(),
                resolved_path,
                is_retina,
                retina_ratio,
                metadata,
                group_labels: vec![],
                placement: None,
            });
        }

        result
    }

    /// Root-relative urls resolve against the base path, everything else
    /// against the document's own directory.
    fn resolve(&self, document_path: &Path, url: &str) -> PathBuf {
        let joined = if let Some(rest) = url.strip_prefix('/') {
            self.base_url.join(rest)
        } else {
            document_path.parent().unwrap_or(Path::new("")).join(url)
        };
        normalize(&absolutize(joined))
    }
}

/// Parse the inline annotation; its `sprite` sub-object becomes the metadata.
fn parse_annotation(raw: &str) -> Result<Map<String, Value>, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(match value.get("sprite") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    })
}

/// Keep the first occurrence per resolved path.
///
/// Deduplication governs policy evaluation and packing only; the raw
/// per-occurrence list stays with the caller so the rewriter can substitute
/// every textual occurrence.
pub fn dedup_by_path(references: &[ImageReference]) -> Vec<ImageReference> {
    let mut seen = HashSet::new();
    references
        .iter()
        .filter(|r| seen.insert(r.resolved_path.clone()))
        .cloned()
        .collect()
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Lexical normalization: drops `.` segments and folds `..` without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
