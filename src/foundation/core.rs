use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::foundation::error::{BridgeError, BridgeResult};

/// Canvas dimensions of a loaded image, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> BridgeResult<Self> {
        if width == 0 || height == 0 {
            return Err(BridgeError::render("canvas dimensions must be >= 1"));
        }
        Ok(Self { width, height })
    }

    /// Dimensions after applying `scale`, rounded to nearest and clamped to a
    /// minimum of one pixel per axis. The arithmetic stays in single
    /// precision; hosts computing the same dimensions must agree bit for bit.
    pub fn scaled(self, scale: f32) -> (u32, u32) {
        let w = (self.width as f32 * scale + 0.5).max(1.0) as u32;
        let h = (self.height as f32 * scale + 0.5).max(1.0) as u32;
        (w, h)
    }
}

/// Mirror transform applied as the last stage of a render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Flip {
    #[default]
    None,
    X,
    Y,
    XY,
}

impl Flip {
    pub fn from_i32(v: i32) -> BridgeResult<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::X),
            2 => Ok(Self::Y),
            3 => Ok(Self::XY),
            other => Err(BridgeError::content(format!("invalid flip value {other}"))),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::None => 0,
            Self::X => 1,
            Self::Y => 2,
            Self::XY => 3,
        }
    }

    pub fn horizontal(self) -> bool {
        matches!(self, Self::X | Self::XY)
    }

    pub fn vertical(self) -> bool {
        matches!(self, Self::Y | Self::XY)
    }

    pub fn with_horizontal(self, on: bool) -> Self {
        Self::from_axes(on, self.vertical())
    }

    pub fn with_vertical(self, on: bool) -> Self {
        Self::from_axes(self.horizontal(), on)
    }

    pub fn from_axes(horizontal: bool, vertical: bool) -> Self {
        match (horizontal, vertical) {
            (false, false) => Self::None,
            (true, false) => Self::X,
            (false, true) => Self::Y,
            (true, true) => Self::XY,
        }
    }
}

/// Downscale algorithm selector for cached quality variants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScaleQuality {
    /// Nearest-neighbor sampling.
    #[default]
    Fast,
    /// Gamma-corrected (2.2) area averaging.
    Beautiful,
}

impl ScaleQuality {
    pub fn from_i32(v: i32) -> BridgeResult<Self> {
        match v {
            0 => Ok(Self::Fast),
            1 => Ok(Self::Beautiful),
            other => Err(BridgeError::content(format!(
                "invalid scale quality value {other}"
            ))),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Fast => 0,
            Self::Beautiful => 1,
        }
    }
}

/// Straight (non-premultiplied) RGBA8 pixels in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn from_parts(width: u32, height: u32, data: Vec<u8>) -> BridgeResult<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return Err(BridgeError::render(format!(
                "pixel buffer length {} does not match {width}x{height} rgba8",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = y as usize * self.stride() + x as usize * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = y as usize * self.stride() + x as usize * 4;
        self.data[i..i + 4].copy_from_slice(&px);
    }
}

/// Cooperative cancellation signal shared between the dispatcher and
/// long-running render work. Cloning shares the underlying flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(BridgeError::Cancelled)` once the token has been tripped.
    pub fn check(&self) -> BridgeResult<()> {
        if self.is_cancelled() {
            Err(BridgeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
