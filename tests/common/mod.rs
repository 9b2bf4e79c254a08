#![allow(dead_code)]

//! Shared fixtures: a counting in-memory compositing engine and pixel
//! pattern helpers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pixelbridge::{
    BridgeError, BridgeResult, Canvas, CancelToken, Compositor, EngineLoader, PixelBuffer,
};

/// Deterministic test pattern with a transparent hole at (0, 0).
pub fn gradient(w: u32, h: u32) -> PixelBuffer {
    let mut buf = PixelBuffer::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let a = if x == 0 && y == 0 { 0 } else { 255 };
            buf.put_pixel(x, y, [x as u8, y as u8, (x ^ y) as u8, a]);
        }
    }
    buf
}

#[derive(Clone, Default)]
pub struct EngineCounters {
    pub full_renders: Arc<AtomicUsize>,
    pub diff_renders: Arc<AtomicUsize>,
    pub fail_next: Arc<AtomicBool>,
}

impl EngineCounters {
    pub fn full(&self) -> usize {
        self.full_renders.load(Ordering::SeqCst)
    }

    pub fn diff(&self) -> usize {
        self.diff_renders.load(Ordering::SeqCst)
    }

    pub fn fail_next_render(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// In-memory engine that counts full vs differential renders and can fail on
/// demand. The single layer is addressed as `"image"` or the empty path.
pub struct CountingEngine {
    pixels: PixelBuffer,
    visible: bool,
    counters: EngineCounters,
}

impl CountingEngine {
    pub fn new(pixels: PixelBuffer) -> (Self, EngineCounters) {
        let counters = EngineCounters::default();
        (
            Self {
                pixels,
                visible: true,
                counters: counters.clone(),
            },
            counters.clone(),
        )
    }

    fn render(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()> {
        cancel.check()?;
        if self.counters.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::render("scripted engine failure"));
        }
        if self.visible {
            dst.data.copy_from_slice(&self.pixels.data);
        } else {
            dst.data.fill(0);
        }
        Ok(())
    }
}

impl Compositor for CountingEngine {
    fn canvas(&self) -> Canvas {
        Canvas {
            width: self.pixels.width,
            height: self.pixels.height,
        }
    }

    fn render_full(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()> {
        self.counters.full_renders.fetch_add(1, Ordering::SeqCst);
        self.render(cancel, dst)
    }

    fn render_diff(&mut self, cancel: &CancelToken, dst: &mut PixelBuffer) -> BridgeResult<()> {
        self.counters.diff_renders.fetch_add(1, Ordering::SeqCst);
        self.render(cancel, dst)
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

/// Loader that hands out [`CountingEngine`]s over a fixed pattern, ignoring
/// the path. The counters of every created engine stay reachable through the
/// shared `created` list after the loader is boxed away.
pub struct StubLoader {
    pub pixels: PixelBuffer,
    pub created: Arc<std::sync::Mutex<Vec<EngineCounters>>>,
}

impl StubLoader {
    pub fn new(pixels: PixelBuffer) -> Self {
        Self {
            pixels,
            created: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl EngineLoader for StubLoader {
    fn load(&mut self, _path: &Path) -> BridgeResult<Box<dyn Compositor>> {
        let (engine, counters) = CountingEngine::new(self.pixels.clone());
        self.created.lock().unwrap().push(counters);
        Ok(Box::new(engine))
    }
}
