//! Seam between the bridge and the compositing engine.
//!
//! The bridge does not own any compositing math. It drives an engine through
//! [`Compositor`]: render the layer tree into a pixel buffer (fully or
//! incrementally), toggle layer state, and serialize that state for project
//! snapshots. [`FlatImage`] is a minimal single-layer engine backed by a
//! decoded raster file, enough for the CLI and test harnesses.

use std::path::Path;

use crate::foundation::core::{Canvas, CancelToken, PixelBuffer};
use crate::foundation::error::{BridgeError, BridgeResult};

/// Opaque compositing engine for one loaded image.
///
/// Implementations render straight RGBA8 into a caller-owned buffer sized to
/// [`Compositor::canvas`]. A failed or cancelled render must leave the engine
/// usable for a retry.
pub trait Compositor: Send {
    /// Canvas rectangle of the composited output.
    fn canvas(&self) -> Canvas;

    /// Render the full layer tree into `dst`.
    fn render_full(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()>;

    /// Re-render after a content change. `dst` holds the previous full render,
    /// so engines with a differential path can update it in place. The default
    /// falls back to a full render.
    fn render_diff(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()> {
        self.render_full(cancel, dst)
    }

    /// Set a layer's visibility by its tree path. Returns whether the state
    /// actually changed.
    fn set_layer_visible(&mut self, layer: &str, visible: bool) -> BridgeResult<bool>;

    /// Serialize the current layer state into an opaque string.
    fn serialize_layers(&self) -> BridgeResult<String>;

    /// Restore layer state from [`Compositor::serialize_layers`] output.
    /// Returns whether anything changed.
    fn deserialize_layers(&mut self, state: &str) -> BridgeResult<bool>;
}

/// Opens a file path as a [`Compositor`].
pub trait EngineLoader: Send {
    fn load(&mut self, path: &Path) -> BridgeResult<Box<dyn Compositor>>;
}

/// Single-layer engine over a decoded raster image.
///
/// The one layer is addressed by the empty path or `"image"`; toggling it off
/// renders a fully transparent canvas.
pub struct FlatImage {
    pixels: PixelBuffer,
    visible: bool,
}

impl FlatImage {
    pub fn new(pixels: PixelBuffer) -> Self {
        Self {
            pixels,
            visible: true,
        }
    }
}

impl Compositor for FlatImage {
    fn canvas(&self) -> Canvas {
        Canvas {
            width: self.pixels.width,
            height: self.pixels.height,
        }
    }

    fn render_full(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()> {
        cancel.check()?;
        if dst.width != self.pixels.width || dst.height != self.pixels.height {
            return Err(BridgeError::render(format!(
                "destination {}x{} does not match canvas {}x{}",
                dst.width, dst.height, self.pixels.width, self.pixels.height
            )));
        }
        if self.visible {
            dst.data.copy_from_slice(&self.pixels.data);
        } else {
            dst.data.fill(0);
        }
        Ok(())
    }

    fn set_layer_visible(&mut self, layer: &str, visible: bool) -> BridgeResult<bool> {
        if !layer.is_empty() && layer != "image" {
            return Err(BridgeError::content(format!("unknown layer {layer:?}")));
        }
        let changed = self.visible != visible;
        self.visible = visible;
        Ok(changed)
    }

    fn serialize_layers(&self) -> BridgeResult<String> {
        Ok(format!("V.{}", i32::from(self.visible)))
    }

    fn deserialize_layers(&mut self, state: &str) -> BridgeResult<bool> {
        let visible = match state {
            "V.1" => true,
            "V.0" => false,
            other => {
                return Err(BridgeError::content(format!(
                    "unrecognized layer state {other:?}"
                )));
            }
        };
        let changed = self.visible != visible;
        self.visible = visible;
        Ok(changed)
    }
}

/// [`EngineLoader`] that decodes raster files via the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatImageLoader;

impl EngineLoader for FlatImageLoader {
    fn load(&mut self, path: &Path) -> BridgeResult<Box<dyn Compositor>> {
        let decoded = image::open(path)
            .map_err(|e| BridgeError::render(format!("failed to decode {}: {e}", path.display())))?
            .into_rgba8();
        let (width, height) = decoded.dimensions();
        let pixels = PixelBuffer::from_parts(width, height, decoded.into_raw())?;
        Ok(Box::new(FlatImage::new(pixels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> PixelBuffer {
        let mut buf = PixelBuffer::new(2, 2);
        buf.put_pixel(0, 0, [255, 0, 0, 255]);
        buf.put_pixel(1, 1, [0, 255, 0, 128]);
        buf
    }

    #[test]
    fn flat_image_renders_pixels_when_visible() {
        let mut eng = FlatImage::new(checker());
        let mut dst = PixelBuffer::new(2, 2);
        eng.render_full(&CancelToken::new(), &mut dst).unwrap();
        assert_eq!(dst.pixel(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn hidden_layer_renders_transparent() {
        let mut eng = FlatImage::new(checker());
        assert!(eng.set_layer_visible("image", false).unwrap());
        let mut dst = PixelBuffer::new(2, 2);
        eng.render_full(&CancelToken::new(), &mut dst).unwrap();
        assert!(dst.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn layer_state_round_trips() {
        let mut eng = FlatImage::new(checker());
        eng.set_layer_visible("", false).unwrap();
        let state = eng.serialize_layers().unwrap();
        let mut other = FlatImage::new(checker());
        assert!(other.deserialize_layers(&state).unwrap());
        assert!(other.deserialize_layers("junk").is_err());
    }

    #[test]
    fn cancelled_render_fails_without_touching_dst() {
        let mut eng = FlatImage::new(checker());
        let token = CancelToken::new();
        token.cancel();
        let mut dst = PixelBuffer::new(2, 2);
        assert!(matches!(
            eng.render_full(&token, &mut dst),
            Err(BridgeError::Cancelled)
        ));
        assert!(dst.data.iter().all(|&b| b == 0));
    }
}
