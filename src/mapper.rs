//! Output mapping - sheet naming and merging packed coordinates back onto
//! the originating references

use crate::config::SpriteConfig;
use crate::models::{ImageReference, OutputFile, Placement};
use crate::orchestrate::PackResult;
use std::collections::HashMap;
use std::path::PathBuf;

/// Mapped orchestration output: one sheet file per group plus the placement
/// for every packed path.
#[derive(Debug, Default)]
pub struct MappedResults {
    pub sheets: Vec<OutputFile>,
    pub placements: HashMap<PathBuf, Placement>,
}

/// Compute a sheet file name from the base name and a group label sequence.
///
/// | Labels        | Base         | Result               |
/// |---------------|--------------|----------------------|
/// | none          | `sprite.png` | `sprite.png`         |
/// | `["@2x"]`     | `sprite.png` | `sprite.@2x.png`     |
/// | `["my","x"]`  | `sprite.png` | `sprite.my.x.png`    |
///
/// Labels are spliced in as extra dot-segments before the final extension.
pub fn sheet_path(base_name: &str, labels: &[String]) -> String {
    if labels.is_empty() {
        return base_name.to_string();
    }
    let mut parts: Vec<&str> = base_name.split('.').collect();
    let extension = parts.pop().unwrap_or(base_name);
    parts.extend(labels.iter().map(String::as_str));
    parts.push(extension);
    parts.join(".")
}

/// Turn pack results into sheet output files and a placement per packed path.
///
/// The sheet file is named by the splice rule alone; the placement's sheet
/// url additionally carries the configured public prefix.
pub fn map_results(results: Vec<PackResult>, config: &SpriteConfig) -> MappedResults {
    let mut mapped = MappedResults::default();
    for result in results {
        let name = sheet_path(config.sheet_name(), &result.labels);
        let sheet_url = match &config.sprite_sheet_path {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name.clone(),
        };
        for (path, coordinates) in result.coordinates {
            mapped.placements.insert(
                path,
                Placement {
                    coordinates,
                    sheet_width: result.width,
                    sheet_height: result.height,
                    sheet_path: sheet_url.clone(),
                },
            );
        }
        mapped.sheets.push(OutputFile { path: PathBuf::from(name), contents: result.image });
    }
    mapped
}

/// Attach placements to every occurrence whose path was packed.
///
/// Multiple occurrences of one path (within or across documents) all receive
/// the same placement; occurrences of unpacked paths stay untouched.
pub fn apply_placements(references: &mut [ImageReference], placements: &HashMap<PathBuf, Placement>) {
    for reference in references {
        if let Some(placement) = placements.get(&reference.resolved_path) {
            reference.placement = Some(placement.clone());
        }
    }
}
