//! Stylesheet rewriting - replaces original declarations with sheet coordinates

use crate::models::{ImageReference, Placement};

/// Format a pixel value divided by the retina ratio.
///
/// Emits an exact integer when the value divides evenly, a plain decimal
/// otherwise.
fn format_px(value: u32, ratio: u32) -> String {
    if ratio <= 1 || value % ratio == 0 {
        (value / ratio.max(1)).to_string()
    } else {
        (f64::from(value) / f64::from(ratio)).to_string()
    }
}

/// The replacement declaration block for one placed reference.
///
/// Retina images were packed at native pixel density but display at the
/// ratio-reduced logical density, so both the position and the size are
/// divided by the ratio; non-retina images emit raw values.
pub fn declaration_block(image: &ImageReference, placement: &Placement) -> String {
    let ratio = if image.is_retina { image.retina_ratio } else { 1 };
    format!(
        "background-image: url(\"{sheet}\");\n    \
         background-position: -{x}px -{y}px;\n    \
         background-size: {width}px {height}px!important;",
        sheet = placement.sheet_path,
        x = format_px(placement.coordinates.x, ratio),
        y = format_px(placement.coordinates.y, ratio),
        width = format_px(placement.sheet_width, ratio),
        height = format_px(placement.sheet_height, ratio),
    )
}

/// Replace every occurrence of each placed reference's original declaration.
///
/// Matching is textually exact on the span captured at extraction time, so
/// repeated identical declarations are all replaced consistently and
/// references without a placement leave the document untouched.
pub fn rewrite_stylesheet(content: &str, references: &[ImageReference]) -> String {
    let mut rewritten = content.to_string();
    for image in references {
        if let Some(placement) = &image.placement {
            rewritten = rewritten.replace(&image.original_token, &declaration_block(image, placement));
        }
    }
    rewritten
}
