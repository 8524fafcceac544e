mod loader;

pub use loader::{
    load_stack_library, LoadError, LoadProgressHandle, StackAssetSpec, StackLibrary,
};

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;

use image::{ImageReader, RgbaImage};
use thiserror::Error;

use super::math::normalize_degrees;

/// Number of discretized viewing angles per cache. Each bucket covers a
/// 2-degree slice of the full turn.
pub const ANGLE_BUCKETS: usize = 180;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid stack asset key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("failed to open layer sheet at {path}: {source}")]
    OpenSheet {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode layer sheet at {path}: {source}")]
    DecodeSheet {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("layer count must be at least 1")]
    ZeroLayerCount,
    #[error("sheet height {height} is not a multiple of layer count {layer_count}")]
    UnevenLayerSplit { height: u32, layer_count: u32 },
}

/// Ordered raster layers of one stack asset, bottom to top. Immutable once
/// loaded.
#[derive(Debug)]
pub struct LayeredSprite {
    layers: Vec<RgbaImage>,
}

impl LayeredSprite {
    /// Splits a sheet into `layer_count` equal-height layers. Reading the
    /// sheet top to bottom yields the stack bottom to top.
    pub fn from_sheet(sheet: RgbaImage, layer_count: u32) -> Result<Self, StackError> {
        if layer_count == 0 {
            return Err(StackError::ZeroLayerCount);
        }
        let (width, height) = sheet.dimensions();
        if height % layer_count != 0 {
            return Err(StackError::UnevenLayerSplit {
                height,
                layer_count,
            });
        }

        let layer_height = height / layer_count;
        let mut layers = Vec::with_capacity(layer_count as usize);
        for index in 0..layer_count {
            let mut layer = RgbaImage::new(width, layer_height);
            for y in 0..layer_height {
                for x in 0..width {
                    layer.put_pixel(x, y, *sheet.get_pixel(x, index * layer_height + y));
                }
            }
            layers.push(layer);
        }
        Ok(Self { layers })
    }

    pub fn load(path: &Path, layer_count: u32) -> Result<Self, StackError> {
        let reader = ImageReader::open(path).map_err(|source| StackError::OpenSheet {
            path: path.to_path_buf(),
            source,
        })?;
        let sheet = reader
            .decode()
            .map_err(|source| StackError::DecodeSheet {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        Self::from_sheet(sheet, layer_count)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

/// One pre-composited viewing angle: the stacked raster plus the pivot the
/// renderer places at the entity's screen position.
#[derive(Debug)]
pub struct StackSprite {
    image: RgbaImage,
    pivot_x: f32,
    pivot_y: f32,
}

/// A cache lookup result scaled to the requested zoom. The raster itself is
/// shared; only the dimensions and pivots are scaled.
#[derive(Debug)]
pub struct StackView<'a> {
    pub image: &'a RgbaImage,
    pub width: u32,
    pub height: u32,
    pub pivot_x: f32,
    pub pivot_y: f32,
    pub scale: f32,
}

/// Pre-rendered sprite stack, one composite per angle bucket. Built once at
/// load time and read-only afterwards, so it is shared without locking.
#[derive(Debug)]
pub struct RotationCache {
    buckets: Vec<StackSprite>,
}

impl RotationCache {
    /// Composites every angle bucket. Buckets are independent, so the work
    /// is spread over scoped workers writing disjoint slices of the
    /// preallocated bucket array; the scope join is the completion barrier.
    pub fn build(sprite: &LayeredSprite) -> Self {
        let mut slots: Vec<Option<StackSprite>> = (0..ANGLE_BUCKETS).map(|_| None).collect();
        let worker_count = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(ANGLE_BUCKETS);
        let chunk_size = ANGLE_BUCKETS.div_ceil(worker_count);

        thread::scope(|scope| {
            for (chunk_index, slot_chunk) in slots.chunks_mut(chunk_size).enumerate() {
                scope.spawn(move || {
                    for (offset, slot) in slot_chunk.iter_mut().enumerate() {
                        let bucket = chunk_index * chunk_size + offset;
                        let angle = bucket as f32 * 360.0 / ANGLE_BUCKETS as f32;
                        *slot = Some(compose_bucket(sprite, angle));
                    }
                });
            }
        });

        let buckets: Vec<StackSprite> = slots.into_iter().flatten().collect();
        debug_assert_eq!(buckets.len(), ANGLE_BUCKETS);
        Self { buckets }
    }

    /// Maps any angle to its bucket and returns the stored composite scaled
    /// by `zoom`. `None` when the post-scale raster would be degenerate.
    pub fn lookup(&self, angle_degrees: f32, zoom: f32) -> Option<StackView<'_>> {
        let sprite = &self.buckets[bucket_for_angle(angle_degrees)];
        let (source_width, source_height) = sprite.image.dimensions();
        let width = (source_width as f32 * zoom).round() as i64;
        let height = (source_height as f32 * zoom).round() as i64;
        if width <= 0 || height <= 0 {
            return None;
        }
        Some(StackView {
            image: &sprite.image,
            width: width as u32,
            height: height as u32,
            pivot_x: sprite.pivot_x * zoom,
            pivot_y: sprite.pivot_y * zoom,
            scale: zoom,
        })
    }

    /// Post-scale dimensions for the bucket covering `angle_degrees`.
    pub fn transformed_size(&self, angle_degrees: f32, zoom: f32) -> Option<(u32, u32)> {
        self.lookup(angle_degrees, zoom)
            .map(|view| (view.width, view.height))
    }
}

fn bucket_for_angle(angle_degrees: f32) -> usize {
    let normalized = normalize_degrees(angle_degrees);
    let bucket = (normalized / 360.0 * ANGLE_BUCKETS as f32).floor() as usize;
    bucket.min(ANGLE_BUCKETS - 1)
}

/// Rotates every layer independently and composites bottom to top, lifting
/// each successive layer one pixel: the vertical micro-offset that produces
/// the stacked-depth illusion. Pivot is the rotated bounding-box center
/// horizontally and the bottom layer's rotated center vertically.
fn compose_bucket(sprite: &LayeredSprite, angle_degrees: f32) -> StackSprite {
    let layer_count = sprite.layers.len() as u32;
    let (layer_width, layer_height) = sprite.layers[0].dimensions();
    let (rotated_width, rotated_height) =
        rotated_bounds(layer_width, layer_height, angle_degrees);

    let composite_height = rotated_height + layer_count.saturating_sub(1);
    let mut composite = RgbaImage::new(rotated_width, composite_height);

    for (index, layer) in sprite.layers.iter().enumerate() {
        let rotated = rotate_layer(layer, angle_degrees, rotated_width, rotated_height);
        let y_offset = layer_count - 1 - index as u32;
        blit_opaque(&mut composite, &rotated, 0, y_offset);
    }

    StackSprite {
        image: composite,
        pivot_x: rotated_width as f32 * 0.5,
        pivot_y: (layer_count - 1) as f32 + rotated_height as f32 * 0.5,
    }
}

// Absorbs sin/cos rounding at cardinal angles, where the exact extent is an
// integer that f32 trigonometry can overshoot by a few ulps; without it ceil
// inflates the bounding box by one pixel.
const BOUNDS_EPSILON: f32 = 1e-4;

fn rotated_bounds(width: u32, height: u32, angle_degrees: f32) -> (u32, u32) {
    let radians = angle_degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let rotated_width = (width as f32 * cos + height as f32 * sin - BOUNDS_EPSILON).ceil() as u32;
    let rotated_height = (width as f32 * sin + height as f32 * cos - BOUNDS_EPSILON).ceil() as u32;
    (rotated_width.max(1), rotated_height.max(1))
}

/// Nearest-neighbour inverse-mapped rotation about the layer center into a
/// destination sized for the rotated bounding box.
fn rotate_layer(
    layer: &RgbaImage,
    angle_degrees: f32,
    dest_width: u32,
    dest_height: u32,
) -> RgbaImage {
    let (source_width, source_height) = layer.dimensions();
    let radians = angle_degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    let source_center_x = source_width as f32 * 0.5;
    let source_center_y = source_height as f32 * 0.5;
    let dest_center_x = dest_width as f32 * 0.5;
    let dest_center_y = dest_height as f32 * 0.5;

    let mut dest = RgbaImage::new(dest_width, dest_height);
    for dest_y in 0..dest_height {
        for dest_x in 0..dest_width {
            let dx = dest_x as f32 + 0.5 - dest_center_x;
            let dy = dest_y as f32 + 0.5 - dest_center_y;
            let source_x = source_center_x + dx * cos + dy * sin;
            let source_y = source_center_y - dx * sin + dy * cos;
            if source_x < 0.0 || source_y < 0.0 {
                continue;
            }
            let (source_x, source_y) = (source_x as u32, source_y as u32);
            if source_x >= source_width || source_y >= source_height {
                continue;
            }
            dest.put_pixel(dest_x, dest_y, *layer.get_pixel(source_x, source_y));
        }
    }
    dest
}

fn blit_opaque(dest: &mut RgbaImage, source: &RgbaImage, x_offset: u32, y_offset: u32) {
    let (source_width, source_height) = source.dimensions();
    let (dest_width, dest_height) = dest.dimensions();
    for y in 0..source_height {
        for x in 0..source_width {
            let pixel = source.get_pixel(x, y);
            if pixel[3] == 0 {
                continue;
            }
            let dest_x = x + x_offset;
            let dest_y = y + y_offset;
            if dest_x < dest_width && dest_y < dest_height {
                dest.put_pixel(dest_x, dest_y, *pixel);
            }
        }
    }
}

pub(crate) fn validate_asset_key(key: &str) -> Result<(), StackError> {
    let invalid = |reason: &'static str| StackError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') || key.contains('\\') || key.contains("..") {
        return Err(invalid("key must be a relative forward-slash path"));
    }
    if !key
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '_' | '/' | '-'))
    {
        return Err(invalid("key contains characters outside [a-z0-9_/-]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_rgba(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(width, height, color)
    }

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn two_layer_sprite(width: u32, layer_height: u32) -> LayeredSprite {
        let mut sheet = RgbaImage::new(width, layer_height * 2);
        for y in 0..layer_height * 2 {
            for x in 0..width {
                let color = if y < layer_height { RED } else { BLUE };
                sheet.put_pixel(x, y, color);
            }
        }
        LayeredSprite::from_sheet(sheet, 2).expect("even split")
    }

    #[test]
    fn sheet_split_rejects_uneven_layer_count() {
        let sheet = solid_rgba(4, 9, RED);
        let error = LayeredSprite::from_sheet(sheet, 2).expect_err("uneven");
        assert!(matches!(
            error,
            StackError::UnevenLayerSplit {
                height: 9,
                layer_count: 2
            }
        ));
    }

    #[test]
    fn sheet_split_rejects_zero_layers() {
        let sheet = solid_rgba(4, 4, RED);
        assert!(matches!(
            LayeredSprite::from_sheet(sheet, 0),
            Err(StackError::ZeroLayerCount)
        ));
    }

    #[test]
    fn sheet_splits_into_equal_layers_bottom_to_top() {
        let sprite = two_layer_sprite(4, 3);
        assert_eq!(sprite.layer_count(), 2);
        // First block in the file is the bottom layer.
        assert_eq!(sprite.layers[0].get_pixel(0, 0), &RED);
        assert_eq!(sprite.layers[1].get_pixel(0, 0), &BLUE);
    }

    #[test]
    fn lookup_is_periodic_in_full_turns() {
        let cache = RotationCache::build(&two_layer_sprite(4, 4));
        for angle in [0.0f32, 17.0, 91.5, 359.9] {
            let base = cache.transformed_size(angle, 1.0);
            assert_eq!(base, cache.transformed_size(angle + 360.0, 1.0));
            assert_eq!(base, cache.transformed_size(angle - 720.0, 1.0));
        }
    }

    #[test]
    fn lookup_with_degenerate_zoom_reports_no_visible_image() {
        let cache = RotationCache::build(&two_layer_sprite(4, 4));
        assert!(cache.lookup(0.0, 0.0).is_none());
        assert!(cache.lookup(0.0, 0.01).is_none());
        assert!(cache.lookup(0.0, 1.0).is_some());
    }

    #[test]
    fn unrotated_composite_has_micro_offset_height_and_pivot() {
        let cache = RotationCache::build(&two_layer_sprite(4, 4));
        let view = cache.lookup(0.0, 1.0).expect("visible");
        assert_eq!(view.width, 4);
        // Layer height plus one pixel of lift for the second layer.
        assert_eq!(view.height, 5);
        assert!((view.pivot_x - 2.0).abs() < 1e-5);
        // Bottom layer occupies rows 1..5; its center sits at 1 + 2.
        assert!((view.pivot_y - 3.0).abs() < 1e-5);
    }

    #[test]
    fn top_layer_covers_bottom_layer_where_lifted() {
        let cache = RotationCache::build(&two_layer_sprite(4, 4));
        let view = cache.lookup(0.0, 1.0).expect("visible");
        // Row 0 only contains the lifted top layer.
        assert_eq!(view.image.get_pixel(0, 0), &BLUE);
        // The overlap region is covered by the top layer.
        assert_eq!(view.image.get_pixel(0, 2), &BLUE);
        // The lowest row shows only the bottom layer.
        assert_eq!(view.image.get_pixel(0, 4), &RED);
    }

    #[test]
    fn zoom_scales_dimensions_and_pivots() {
        let cache = RotationCache::build(&two_layer_sprite(4, 4));
        let view = cache.lookup(0.0, 2.0).expect("visible");
        assert_eq!((view.width, view.height), (8, 10));
        assert!((view.pivot_x - 4.0).abs() < 1e-5);
        assert!((view.pivot_y - 6.0).abs() < 1e-5);
    }

    #[test]
    fn quarter_turn_swaps_rotated_bounds() {
        assert_eq!(rotated_bounds(6, 2, 90.0), (2, 6));
        assert_eq!(rotated_bounds(6, 2, 0.0), (6, 2));
        let (diagonal_width, diagonal_height) = rotated_bounds(4, 4, 45.0);
        assert!(diagonal_width > 4 && diagonal_height > 4);
    }

    #[test]
    fn cardinal_angles_keep_exact_bounds_despite_float_fuzz() {
        for (angle, expected) in [
            (0.0f32, (6, 2)),
            (90.0, (2, 6)),
            (180.0, (6, 2)),
            (270.0, (2, 6)),
        ] {
            assert_eq!(rotated_bounds(6, 2, angle), expected, "angle {angle}");
        }
    }

    #[test]
    fn rotation_preserves_opaque_pixel_count_for_square_quarter_turns() {
        let layer = solid_rgba(4, 4, RED);
        let rotated = rotate_layer(&layer, 90.0, 4, 4);
        let opaque = rotated.pixels().filter(|pixel| pixel[3] != 0).count();
        assert_eq!(opaque, 16);
    }

    #[test]
    fn asset_keys_follow_the_sheet_naming_rules() {
        assert!(validate_asset_key("props/tree").is_ok());
        assert!(validate_asset_key("props/tree_2-a").is_ok());
        assert!(validate_asset_key("").is_err());
        assert!(validate_asset_key("/props/tree").is_err());
        assert!(validate_asset_key("props/../tree").is_err());
        assert!(validate_asset_key("Props/Tree").is_err());
        assert!(validate_asset_key(r"props\tree").is_err());
    }
}
