//! Built-in packer - strip and shelf layouts composed with the `image` crate

use super::{Algorithm, PackError, PackRequest, Packer, PackedSheet};
use crate::models::Coordinates;
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;

/// Transparent color for sheet background
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Default packer implementation.
///
/// Lays images out as vertical/horizontal strips, diagonals, or height-sorted
/// shelves, composes them into one RGBA sheet and encodes it as PNG. Decoding
/// and composition are CPU-bound, so the work runs on a blocking thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShelfPacker;

#[async_trait]
impl Packer for ShelfPacker {
    fn validate(&self, request: &PackRequest) -> Result<(), PackError> {
        if request.paths.is_empty() {
            return Err(PackError::InvalidOptions("no images to pack".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for path in &request.paths {
            if !seen.insert(path) {
                return Err(PackError::InvalidOptions(format!(
                    "duplicate image path {}",
                    path.display()
                )));
            }
        }
        match request.options.engine.as_deref() {
            None | Some("auto") | Some("shelf") => Ok(()),
            Some(other) => Err(PackError::InvalidOptions(format!("unknown engine `{}`", other))),
        }
    }

    async fn pack(&self, request: PackRequest) -> Result<PackedSheet, PackError> {
        self.validate(&request)?;
        tokio::task::spawn_blocking(move || pack_blocking(request))
            .await
            .map_err(|e| PackError::Engine(e.to_string()))?
    }
}

fn pack_blocking(request: PackRequest) -> Result<PackedSheet, PackError> {
    let mut images: Vec<(PathBuf, RgbaImage)> = Vec::with_capacity(request.paths.len());
    for path in request.paths {
        let decoded = image::open(&path)
            .map_err(|source| PackError::Image { path: path.clone(), source })?
            .to_rgba8();
        images.push((path, decoded));
    }

    let sizes: Vec<(u32, u32)> = images.iter().map(|(_, img)| img.dimensions()).collect();
    let padding = request.options.padding;
    let (positions, width, height) = match request.options.algorithm {
        Algorithm::TopDown => strip_layout(&sizes, padding, false),
        Algorithm::LeftRight => strip_layout(&sizes, padding, true),
        Algorithm::Diagonal => diagonal_layout(&sizes, padding, false),
        Algorithm::AltDiagonal => diagonal_layout(&sizes, padding, true),
        Algorithm::BinaryTree => shelf_layout(&sizes, padding),
    };

    let mut sheet = RgbaImage::from_pixel(width.max(1), height.max(1), TRANSPARENT);
    let mut coordinates = HashMap::with_capacity(images.len());
    for ((path, img), &(x, y)) in images.into_iter().zip(&positions) {
        copy_into_sheet(&mut sheet, &img, x, y);
        let (w, h) = img.dimensions();
        coordinates.insert(path, Coordinates { x, y, width: w, height: h });
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(sheet)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .map_err(PackError::Encode)?;

    Ok(PackedSheet { image: bytes, width, height, coordinates })
}

/// Vertical (top-down) or horizontal (left-right) strip placement.
fn strip_layout(sizes: &[(u32, u32)], padding: u32, horizontal: bool) -> (Vec<(u32, u32)>, u32, u32) {
    let mut positions = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    let mut cross = 0;
    for (i, &(w, h)) in sizes.iter().enumerate() {
        if i > 0 {
            offset += padding;
        }
        if horizontal {
            positions.push((offset, 0));
            offset += w;
            cross = cross.max(h);
        } else {
            positions.push((0, offset));
            offset += h;
            cross = cross.max(w);
        }
    }
    if horizontal {
        (positions, offset, cross)
    } else {
        (positions, cross, offset)
    }
}

/// Main- or anti-diagonal placement.
fn diagonal_layout(sizes: &[(u32, u32)], padding: u32, mirrored: bool) -> (Vec<(u32, u32)>, u32, u32) {
    let mut positions = Vec::with_capacity(sizes.len());
    let mut x = 0;
    let mut y = 0;
    for (i, &(w, h)) in sizes.iter().enumerate() {
        if i > 0 {
            x += padding;
            y += padding;
        }
        positions.push((x, y));
        x += w;
        y += h;
    }
    let (width, height) = (x, y);
    if mirrored {
        for (pos, &(w, _)) in positions.iter_mut().zip(sizes) {
            pos.0 = width - pos.0 - w;
        }
    }
    (positions, width, height)
}

/// A shelf in the shelf placement strategy
struct Shelf {
    y: u32,
    height: u32,
    width_used: u32,
}

/// Shelf placement, tallest images first. Images are placed into horizontal
/// shelves whose target width is the larger of the widest image and the
/// square-root of the total padded area.
fn shelf_layout(sizes: &[(u32, u32)], padding: u32) -> (Vec<(u32, u32)>, u32, u32) {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].1.cmp(&sizes[a].1));

    let widest = sizes.iter().map(|s| s.0).max().unwrap_or(0);
    let area: u64 = sizes.iter().map(|&(w, h)| u64::from(w + padding) * u64::from(h + padding)).sum();
    let target = widest.max((area as f64).sqrt().ceil() as u32);

    let mut shelves: Vec<Shelf> = Vec::new();
    let mut positions = vec![(0, 0); sizes.len()];
    for &index in &order {
        let (w, h) = sizes[index];
        let padded_w = w + padding;
        let mut placed = false;
        for shelf in &mut shelves {
            if h <= shelf.height && shelf.width_used + padded_w <= target + padding {
                positions[index] = (shelf.width_used, shelf.y);
                shelf.width_used += padded_w;
                placed = true;
                break;
            }
        }
        if !placed {
            let y = shelves.last().map(|s| s.y + s.height + padding).unwrap_or(0);
            positions[index] = (0, y);
            shelves.push(Shelf { y, height: h, width_used: padded_w });
        }
    }

    let width = positions
        .iter()
        .zip(sizes)
        .map(|(&(x, _), &(w, _))| x + w)
        .max()
        .unwrap_or(0);
    let height = shelves.last().map(|s| s.y + s.height).unwrap_or(0);
    (positions, width, height)
}

/// Copy one image into the sheet at the given position
fn copy_into_sheet(sheet: &mut RgbaImage, img: &RgbaImage, x: u32, y: u32) {
    for sy in 0..img.height() {
        for sx in 0..img.width() {
            if x + sx < sheet.width() && y + sy < sheet.height() {
                sheet.put_pixel(x + sx, y + sy, *img.get_pixel(sx, sy));
            }
        }
    }
}
