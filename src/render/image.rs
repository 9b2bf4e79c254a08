//! Per-image render state and caching.
//!
//! An [`ImageHandle`] owns one compositing engine plus the caches derived from
//! it: the full-resolution render and the per-quality downscaled variants.
//! Content edits advance a version counter; the derived caches are dropped as
//! one unit whenever the counter moves past the last rendered version or the
//! requested scale changes. Partial invalidation is deliberately not done.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::engine::Compositor;
use crate::foundation::core::{Canvas, CancelToken, Flip, PixelBuffer, ScaleQuality};
use crate::foundation::error::{BridgeError, BridgeResult};
use crate::project::ViewState;
use crate::render::downscale::downscale;

/// Cached render state for one loaded image.
pub struct ImageHandle {
    engine: Box<dyn Compositor>,
    file_path: PathBuf,

    scale: f32,
    quality: ScaleQuality,
    offset_x: i32,
    offset_y: i32,
    flip: Flip,

    full: Option<Arc<PixelBuffer>>,
    variants: VariantCache,
    content_version: u64,
    rendered_version: u64,

    last_access: Instant,

    /// Host-restorable view settings carried in project snapshots.
    pub view_state: Option<ViewState>,
}

/// Quality-tagged downscaled variants of the current full render, all computed
/// at one scale. Invalidated as a unit, never per entry.
#[derive(Default)]
struct VariantCache {
    scale: Option<f32>,
    fast: Option<Arc<PixelBuffer>>,
    beautiful: Option<Arc<PixelBuffer>>,
}

impl VariantCache {
    fn clear(&mut self) {
        self.scale = None;
        self.fast = None;
        self.beautiful = None;
    }

    /// Drops every variant if the cache was computed at a different scale.
    fn retag(&mut self, scale: f32) {
        if self.scale != Some(scale) {
            self.clear();
            self.scale = Some(scale);
        }
    }

    fn get(&self, quality: ScaleQuality) -> Option<Arc<PixelBuffer>> {
        match quality {
            ScaleQuality::Fast => self.fast.clone(),
            ScaleQuality::Beautiful => self.beautiful.clone(),
        }
    }

    fn insert(&mut self, quality: ScaleQuality, buf: Arc<PixelBuffer>) {
        match quality {
            ScaleQuality::Fast => self.fast = Some(buf),
            ScaleQuality::Beautiful => self.beautiful = Some(buf),
        }
    }
}

impl ImageHandle {
    pub fn new(engine: Box<dyn Compositor>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            file_path: file_path.into(),
            scale: 1.0,
            quality: ScaleQuality::Fast,
            offset_x: 0,
            offset_y: 0,
            flip: Flip::None,
            full: None,
            variants: VariantCache::default(),
            content_version: 0,
            rendered_version: 0,
            last_access: Instant::now(),
            view_state: None,
        }
    }

    pub fn file_path(&self) -> &std::path::Path {
        &self.file_path
    }

    pub fn canvas(&self) -> Canvas {
        self.engine.canvas()
    }

    /// Canvas after applying the current scale (nearest rounding, >= 1 px).
    pub fn scaled_canvas(&self) -> (u32, u32) {
        if self.scale < 1.0 {
            self.canvas().scaled(self.scale)
        } else {
            let c = self.canvas();
            (c.width, c.height)
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn quality(&self) -> ScaleQuality {
        self.quality
    }

    pub fn set_scale(&mut self, scale: f32, quality: ScaleQuality) -> BridgeResult<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(BridgeError::content(format!("invalid scale {scale}")));
        }
        self.scale = scale.min(1.0);
        self.quality = quality;
        Ok(())
    }

    pub fn offset(&self) -> (i32, i32) {
        (self.offset_x, self.offset_y)
    }

    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.offset_x = x;
        self.offset_y = y;
    }

    pub fn flip(&self) -> Flip {
        self.flip
    }

    /// Returns whether the flip state changed. Flip is applied after the
    /// caches, so changing it invalidates nothing.
    pub fn set_flip(&mut self, flip: Flip) -> bool {
        let changed = self.flip != flip;
        self.flip = flip;
        changed
    }

    pub fn flip_x(&self) -> bool {
        self.flip.horizontal()
    }

    pub fn flip_y(&self) -> bool {
        self.flip.vertical()
    }

    pub fn set_flip_x(&mut self, on: bool) -> bool {
        self.set_flip(self.flip.with_horizontal(on))
    }

    pub fn set_flip_y(&mut self, on: bool) -> bool {
        self.set_flip(self.flip.with_vertical(on))
    }

    /// Advance the content version; the next render recomputes and drops all
    /// derived variants.
    pub fn mark_content_changed(&mut self) {
        self.content_version += 1;
    }

    /// Whether cached renders are stale relative to the content version.
    pub fn is_modified(&self) -> bool {
        self.full.is_none() || self.rendered_version != self.content_version
    }

    pub fn set_layer_visible(&mut self, layer: &str, visible: bool) -> BridgeResult<bool> {
        self.touch();
        let changed = self.engine.set_layer_visible(layer, visible)?;
        if changed {
            self.mark_content_changed();
        }
        Ok(changed)
    }

    pub fn serialize_layers(&mut self) -> BridgeResult<String> {
        self.touch();
        self.engine.serialize_layers()
    }

    pub fn deserialize_layers(&mut self, state: &str) -> BridgeResult<bool> {
        self.touch();
        let changed = self.engine.deserialize_layers(state)?;
        if changed {
            self.mark_content_changed();
        }
        Ok(changed)
    }

    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Render at the handle's current scale and quality.
    pub fn render(&mut self, cancel: &CancelToken) -> BridgeResult<Arc<PixelBuffer>> {
        self.render_with(self.scale, self.quality, cancel)
    }

    /// Render at an explicit scale and quality.
    ///
    /// Cached buffers are reused when the content version has not moved; any
    /// failure (including cancellation) publishes nothing, so every cache
    /// keeps its pre-call contents and a retry is safe.
    pub fn render_with(
        &mut self,
        scale: f32,
        quality: ScaleQuality,
        cancel: &CancelToken,
    ) -> BridgeResult<Arc<PixelBuffer>> {
        self.touch();
        let canvas = self.engine.canvas();

        match &self.full {
            None => {
                let mut buf = PixelBuffer::new(canvas.width, canvas.height);
                self.engine.render_full(cancel, &mut buf)?;
                self.full = Some(Arc::new(buf));
                self.variants.clear();
                self.rendered_version = self.content_version;
                debug!(path = %self.file_path.display(), "full render");
            }
            Some(prev) if self.rendered_version != self.content_version => {
                // Differential path; render into a copy so a failed or
                // cancelled pass cannot leak into the cache.
                let mut buf = (**prev).clone();
                self.engine.render_diff(cancel, &mut buf)?;
                self.full = Some(Arc::new(buf));
                self.variants.clear();
                self.rendered_version = self.content_version;
                debug!(
                    path = %self.file_path.display(),
                    version = self.content_version,
                    "incremental render, variants dropped"
                );
            }
            Some(_) => {}
        }

        let full = self
            .full
            .clone()
            .ok_or_else(|| BridgeError::render("render produced no buffer"))?;

        let mut out = full.clone();
        if scale < 1.0 {
            let (tw, th) = canvas.scaled(scale);
            self.variants.retag(scale);
            out = match self.variants.get(quality) {
                Some(cached) => cached,
                None => {
                    let scaled = Arc::new(downscale(&full, tw, th, quality, cancel)?);
                    self.variants.insert(quality, scaled.clone());
                    scaled
                }
            };
        }

        if self.flip != Flip::None {
            out = Arc::new(flipped(&out, self.flip));
        }
        Ok(out)
    }
}

/// Copy of `src` mirrored along the flipped axes. The input is never mutated.
pub fn flipped(src: &PixelBuffer, flip: Flip) -> PixelBuffer {
    let (w, h) = (src.width, src.height);
    let mut dst = PixelBuffer::new(w, h);
    for y in 0..h {
        let sy = if flip.vertical() { h - 1 - y } else { y };
        for x in 0..w {
            let sx = if flip.horizontal() { w - 1 - x } else { x };
            dst.put_pixel(x, y, src.pixel(sx, sy));
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flipped_mirrors_both_axes() {
        let mut src = PixelBuffer::new(2, 2);
        src.put_pixel(0, 0, [1, 0, 0, 255]);
        src.put_pixel(1, 1, [2, 0, 0, 255]);

        let fx = flipped(&src, Flip::X);
        assert_eq!(fx.pixel(1, 0), [1, 0, 0, 255]);

        let fy = flipped(&src, Flip::Y);
        assert_eq!(fy.pixel(0, 1), [1, 0, 0, 255]);

        let fxy = flipped(&src, Flip::XY);
        assert_eq!(fxy.pixel(1, 1), [1, 0, 0, 255]);
        assert_eq!(fxy.pixel(0, 0), [2, 0, 0, 255]);
    }

    #[test]
    fn set_scale_rejects_nonpositive() {
        let engine = Box::new(crate::engine::FlatImage::new(PixelBuffer::new(2, 2)));
        let mut img = ImageHandle::new(engine, "a.png");
        assert!(img.set_scale(0.0, ScaleQuality::Fast).is_err());
        assert!(img.set_scale(f32::NAN, ScaleQuality::Fast).is_err());
        img.set_scale(2.0, ScaleQuality::Fast).unwrap();
        assert_eq!(img.scale(), 1.0);
    }

    #[test]
    fn flip_setters_report_changes() {
        let engine = Box::new(crate::engine::FlatImage::new(PixelBuffer::new(2, 2)));
        let mut img = ImageHandle::new(engine, "a.png");
        assert!(img.set_flip_x(true));
        assert!(!img.set_flip_x(true));
        assert!(img.set_flip_y(true));
        assert_eq!(img.flip(), Flip::XY);
        assert!(img.set_flip(Flip::None));
    }

    #[test]
    fn scaled_canvas_matches_rounding_rules() {
        let engine = Box::new(crate::engine::FlatImage::new(PixelBuffer::new(100, 3)));
        let mut img = ImageHandle::new(engine, "a.png");
        img.set_scale(0.1, ScaleQuality::Fast).unwrap();
        assert_eq!(img.scaled_canvas(), (10, 1));
    }
}
