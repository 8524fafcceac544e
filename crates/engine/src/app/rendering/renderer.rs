use std::collections::HashSet;
use std::sync::Arc;

use pixels::{Error, Pixels, SurfaceTexture};
use tracing::warn;
use winit::window::Window;

use crate::app::camera::world_to_screen_px;
use crate::app::scene::{RenderLayer, RenderableKind, SceneWorld, LAYER_ORDER};
use crate::app::stack::{StackLibrary, StackView};

use super::Viewport;

const CLEAR_COLOR: [u8; 4] = [26, 32, 38, 255];

/// A stack queued for drawing this frame. `depth_y` is the projected screen
/// y used for back-to-front ordering within the objects layer.
struct QueuedStack<'a> {
    key: &'a str,
    screen_x: i32,
    screen_y: i32,
    depth_y: i32,
    bucket_angle: f32,
}

/// CPU framebuffer renderer. Clears, then draws each render layer in fixed
/// order; within the objects layer stacks are sorted by projected screen y
/// so nearer stacks paint over farther ones.
pub struct Renderer {
    window: Arc<Window>,
    pixels: Pixels<'static>,
    viewport: Viewport,
    stacks: StackLibrary,
    warned_missing_stack_keys: HashSet<String>,
}

impl Renderer {
    pub fn new(window: Arc<Window>, stacks: StackLibrary) -> Result<Self, Error> {
        let size = window.inner_size();
        let pixels = Self::build_pixels(Arc::clone(&window), size.width, size.height)?;
        Ok(Self {
            window,
            pixels,
            viewport: Viewport {
                width: size.width,
                height: size.height,
            },
            stacks,
            warned_missing_stack_keys: HashSet::new(),
        })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), Error> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.pixels = Self::build_pixels(Arc::clone(&self.window), width, height)?;
        self.viewport = Viewport { width, height };
        Ok(())
    }

    fn build_pixels(
        window: Arc<Window>,
        width: u32,
        height: u32,
    ) -> Result<Pixels<'static>, Error> {
        let surface = SurfaceTexture::new(width, height, window);
        Pixels::new(width, height, surface)
    }

    pub(crate) fn render_world(&mut self, world: &SceneWorld) -> Result<(), Error> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Ok(());
        }

        let viewport = self.viewport;
        let stacks = &self.stacks;
        let warned_missing_stack_keys = &mut self.warned_missing_stack_keys;
        let frame = self.pixels.frame_mut();
        for chunk in frame.chunks_exact_mut(4) {
            chunk.copy_from_slice(&CLEAR_COLOR);
        }

        let camera = world.camera();
        let zoom = camera.zoom();
        let camera_rotation = camera.rotation_degrees();

        let mut queued: Vec<QueuedStack<'_>> = Vec::new();
        for layer in LAYER_ORDER {
            queued.clear();
            for entity in world.by_layer(layer) {
                let RenderableKind::Stack { key } = &entity.renderable else {
                    continue;
                };
                let position = entity.body.position();
                let (screen_x, screen_y) = world_to_screen_px(camera, viewport, position);
                let (_, depth_y) =
                    world_to_screen_px(camera, viewport, position.horizontal());
                queued.push(QueuedStack {
                    key,
                    screen_x,
                    screen_y,
                    depth_y,
                    bucket_angle: entity.body.facing_degrees() - camera_rotation,
                });
            }
            if layer == RenderLayer::Objects {
                queued.sort_by_key(|item| item.depth_y);
            }

            for item in &queued {
                let Some(cache) = stacks.get(item.key) else {
                    warn_missing_stack_once(warned_missing_stack_keys, item.key);
                    continue;
                };
                // Degenerate post-scale size: nothing visible to draw.
                let Some(view) = cache.lookup(item.bucket_angle, zoom) else {
                    continue;
                };
                let left = item.screen_x - view.pivot_x.round() as i32;
                let top = item.screen_y - view.pivot_y.round() as i32;
                draw_stack_view(frame, viewport.width, viewport.height, left, top, &view);
            }
        }

        self.pixels.render()
    }
}

fn warn_missing_stack_once(warned_keys: &mut HashSet<String>, key: &str) {
    if warned_keys.insert(key.to_string()) {
        warn!(stack_key = key, "renderer_stack_cache_missing_skipping_draw");
    }
}

/// Nearest-neighbour scaled blit of a cached stack raster. Fully transparent
/// source pixels leave the framebuffer untouched.
fn draw_stack_view(
    frame: &mut [u8],
    width: u32,
    height: u32,
    left: i32,
    top: i32,
    view: &StackView<'_>,
) {
    let (source_width, source_height) = view.image.dimensions();
    if source_width == 0 || source_height == 0 || width == 0 || height == 0 {
        return;
    }

    let right = left + view.width as i32;
    let bottom = top + view.height as i32;
    let draw_left = left.max(0);
    let draw_top = top.max(0);
    let draw_right = right.min(width as i32);
    let draw_bottom = bottom.min(height as i32);
    if draw_left >= draw_right || draw_top >= draw_bottom {
        return;
    }

    let inv_scale = view.scale.recip();
    let frame_width = width as usize;
    let source = view.image.as_raw();
    let source_row_stride = source_width as usize * 4;

    for out_y in draw_top..draw_bottom {
        let dy = out_y - top;
        let src_y = ((dy as f32) * inv_scale).floor() as u32;
        let src_y = src_y.min(source_height - 1) as usize;
        let src_row_offset = src_y * source_row_stride;
        let dst_row_offset = out_y as usize * frame_width * 4;

        for out_x in draw_left..draw_right {
            let dx = out_x - left;
            let src_x = ((dx as f32) * inv_scale).floor() as u32;
            let src_x = src_x.min(source_width - 1) as usize;
            let src_offset = src_row_offset + src_x * 4;
            let alpha = source[src_offset + 3];
            if alpha == 0 {
                continue;
            }
            let dst_offset = dst_row_offset + out_x as usize * 4;
            frame[dst_offset..dst_offset + 4].copy_from_slice(&source[src_offset..src_offset + 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn blank_frame(width: u32, height: u32) -> Vec<u8> {
        vec![0u8; width as usize * height as usize * 4]
    }

    fn pixel(frame: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * width as usize + x as usize) * 4;
        [
            frame[offset],
            frame[offset + 1],
            frame[offset + 2],
            frame[offset + 3],
        ]
    }

    fn view_over(image: &RgbaImage, scale: f32) -> StackView<'_> {
        let (width, height) = image.dimensions();
        StackView {
            image,
            width: (width as f32 * scale).round() as u32,
            height: (height as f32 * scale).round() as u32,
            pivot_x: 0.0,
            pivot_y: 0.0,
            scale,
        }
    }

    #[test]
    fn blit_copies_opaque_pixels_and_skips_transparent_ones() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([200, 40, 10, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        let mut frame = blank_frame(4, 4);

        draw_stack_view(&mut frame, 4, 4, 1, 2, &view_over(&image, 1.0));

        assert_eq!(pixel(&frame, 4, 1, 2), [200, 40, 10, 255]);
        assert_eq!(pixel(&frame, 4, 2, 2), [0, 0, 0, 0]);
    }

    #[test]
    fn blit_clips_against_the_frame_edges() {
        let image = RgbaImage::from_pixel(3, 3, Rgba([5, 6, 7, 255]));
        let mut frame = blank_frame(4, 4);

        draw_stack_view(&mut frame, 4, 4, -2, -2, &view_over(&image, 1.0));
        draw_stack_view(&mut frame, 4, 4, 3, 3, &view_over(&image, 1.0));

        assert_eq!(pixel(&frame, 4, 0, 0), [5, 6, 7, 255]);
        assert_eq!(pixel(&frame, 4, 1, 1), [0, 0, 0, 0]);
        assert_eq!(pixel(&frame, 4, 3, 3), [5, 6, 7, 255]);
    }

    #[test]
    fn blit_scales_up_with_nearest_neighbour() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        let mut frame = blank_frame(4, 2);

        draw_stack_view(&mut frame, 4, 2, 0, 0, &view_over(&image, 2.0));

        assert_eq!(pixel(&frame, 4, 0, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&frame, 4, 1, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&frame, 4, 2, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&frame, 4, 3, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn fully_offscreen_blit_is_a_no_op() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        let mut frame = blank_frame(4, 4);

        draw_stack_view(&mut frame, 4, 4, 10, 10, &view_over(&image, 1.0));
        assert!(frame.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn missing_stack_key_warns_only_once() {
        let mut warned = HashSet::new();
        warn_missing_stack_once(&mut warned, "props/ghost");
        warn_missing_stack_once(&mut warned, "props/ghost");
        assert_eq!(warned.len(), 1);
    }
}
