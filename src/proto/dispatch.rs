//! Command dispatcher.
//!
//! One strictly sequential loop: read a command, execute it synchronously,
//! write exactly one reply, repeat. A long render blocks the loop by design.
//! Stream-level failures end the session; every other failure becomes an
//! error reply and the session keeps going. On exit the shared-memory mapping
//! is closed and the shutdown signal is tripped for dependent work.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::EngineLoader;
use crate::foundation::core::{CancelToken, Flip, ScaleQuality};
use crate::foundation::error::{BridgeError, BridgeResult};
use crate::project::ProjectState;
use crate::proto::wire::Wire;
use crate::reclaim::IdleSweeper;
use crate::render::image::ImageHandle;
use crate::render::transfer::copy_with_offset;
use crate::shm::channel::SharedMemoryChannel;

/// Command opcodes. The field schema per opcode is positional and fixed; an
/// opcode this build does not know leaves the stream position undefined, so
/// it ends the session like any other decode failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Hello = 0,
    OpenImage = 1,
    CloseImage = 2,
    ClearImages = 3,
    SetLayerVisible = 4,
    SetScale = 5,
    SetOffset = 6,
    SetFlip = 7,
    Render = 8,
    SerializeLayers = 9,
    DeserializeLayers = 10,
    SerializeProject = 11,
    DeserializeProject = 12,
    SetProjectPath = 13,
}

impl TryFrom<u32> for Opcode {
    type Error = BridgeError;

    fn try_from(v: u32) -> BridgeResult<Self> {
        Ok(match v {
            0 => Self::Hello,
            1 => Self::OpenImage,
            2 => Self::CloseImage,
            3 => Self::ClearImages,
            4 => Self::SetLayerVisible,
            5 => Self::SetScale,
            6 => Self::SetOffset,
            7 => Self::SetFlip,
            8 => Self::Render,
            9 => Self::SerializeLayers,
            10 => Self::DeserializeLayers,
            11 => Self::SerializeProject,
            12 => Self::DeserializeProject,
            13 => Self::SetProjectPath,
            other => {
                return Err(BridgeError::protocol(format!("unknown opcode {other}")));
            }
        })
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Version string reported by `Hello`.
    pub version: String,
    /// Worker-strip count override for the pixel transfer stage.
    pub transfer_workers: Option<usize>,
    /// How long an image may go untouched before the idle sweep drops it.
    pub idle_timeout: Duration,
    /// Minimum spacing between idle sweeps.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            transfer_workers: None,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// One protocol session over a byte-stream pair.
pub struct Session<R, W> {
    wire: Wire<R, W>,
    shm: SharedMemoryChannel,
    loader: Box<dyn EngineLoader>,
    images: HashMap<i32, ImageHandle>,
    project_path: Option<PathBuf>,
    cancel: CancelToken,
    sweeper: IdleSweeper,
    config: SessionConfig,
}

impl<R: Read, W: Write> Session<R, W> {
    pub fn new(
        reader: R,
        writer: W,
        shm: SharedMemoryChannel,
        loader: Box<dyn EngineLoader>,
        config: SessionConfig,
    ) -> Self {
        let cancel = CancelToken::new();
        let sweeper = IdleSweeper::new(config.idle_timeout, config.sweep_interval, cancel.clone());
        Self {
            wire: Wire::new(reader, writer),
            shm,
            loader,
            images: HashMap::new(),
            project_path: None,
            cancel,
            sweeper,
            config,
        }
    }

    /// Shared signal: tripped on shutdown, cancels in-flight render work.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Recover the underlying stream halves, e.g. to inspect written replies.
    pub fn into_stream(self) -> (R, W) {
        self.wire.into_parts()
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    /// Run the session to completion. Returns `Ok` on orderly end-of-stream
    /// and `Err` on a fatal protocol or transport failure; either way the
    /// shared-memory mapping is closed and the shutdown signal tripped.
    pub fn run(&mut self) -> BridgeResult<()> {
        let outcome = self.command_loop();
        self.cancel.cancel();
        self.shm.close();
        debug!("session closed");
        outcome
    }

    fn command_loop(&mut self) -> BridgeResult<()> {
        while !self.cancel.is_cancelled() {
            let Some(raw) = self.wire.read_command()? else {
                debug!("peer closed the command stream");
                return Ok(());
            };
            let op = Opcode::try_from(raw)?;
            match self.execute(op) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(?op, error = %e, "command failed");
                    self.wire.write_error(&e.to_string())?;
                    self.wire.flush()?;
                }
            }
            self.sweeper.maybe_sweep(&mut self.images);
        }
        Ok(())
    }

    /// Decode one command's fields, apply it, and write the reply. Field
    /// reads happen before any state change or reply byte, so a non-fatal
    /// failure always leaves a clean record boundary for the error reply.
    #[tracing::instrument(level = "debug", skip(self))]
    fn execute(&mut self, op: Opcode) -> BridgeResult<()> {
        match op {
            Opcode::Hello => {
                self.wire.write_success()?;
                self.wire.write_string(&self.config.version)?;
            }

            Opcode::OpenImage => {
                let id = self.wire.read_i32()?;
                let path = self.wire.read_string()?;
                let engine = self.loader.load(Path::new(&path))?;
                let img = ImageHandle::new(engine, &path);
                let canvas = img.canvas();
                debug!(id, path, "image opened");
                self.images.insert(id, img);
                self.wire.write_success()?;
                self.wire.write_i32(canvas.width as i32)?;
                self.wire.write_i32(canvas.height as i32)?;
            }

            Opcode::CloseImage => {
                let id = self.wire.read_i32()?;
                self.images
                    .remove(&id)
                    .ok_or_else(|| no_image(id))?;
                self.wire.write_success()?;
            }

            Opcode::ClearImages => {
                self.images.clear();
                self.wire.write_success()?;
            }

            Opcode::SetLayerVisible => {
                let id = self.wire.read_i32()?;
                let layer = self.wire.read_string()?;
                let visible = self.wire.read_bool()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let changed = img.set_layer_visible(&layer, visible)?;
                self.wire.write_success()?;
                self.wire.write_bool(changed)?;
            }

            Opcode::SetScale => {
                let id = self.wire.read_i32()?;
                let scale = self.wire.read_f32()?;
                let quality = self.wire.read_i32()?;
                let quality = ScaleQuality::from_i32(quality)?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                img.set_scale(scale, quality)?;
                img.touch();
                self.wire.write_success()?;
            }

            Opcode::SetOffset => {
                let id = self.wire.read_i32()?;
                let x = self.wire.read_i32()?;
                let y = self.wire.read_i32()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                img.set_offset(x, y);
                img.touch();
                self.wire.write_success()?;
            }

            Opcode::SetFlip => {
                let id = self.wire.read_i32()?;
                let flip = Flip::from_i32(self.wire.read_i32()?)?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let changed = img.set_flip(flip);
                img.touch();
                self.wire.write_success()?;
                self.wire.write_bool(changed)?;
            }

            Opcode::Render => {
                let id = self.wire.read_i32()?;
                let dst_w = self.wire.read_i32()?;
                let dst_h = self.wire.read_i32()?;
                let resized = self.wire.read_bool()?;
                if dst_w <= 0 || dst_h <= 0 {
                    return Err(BridgeError::content(format!(
                        "destination {dst_w}x{dst_h} must be positive"
                    )));
                }

                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let frame = img.render(&self.cancel)?;
                let (offset_x, offset_y) = img.offset();
                let flip = img.flip();

                // The resize is fully applied before the copy can see the
                // mapping; a copy never targets a stale region.
                if !self.shm.is_open() {
                    self.shm.open()?;
                } else if resized {
                    self.shm.resize()?;
                }

                let needed = dst_w as usize * dst_h as usize * 4;
                let dst = self.shm.buffer(needed);
                if dst.len() < needed {
                    return Err(BridgeError::shared_memory(format!(
                        "region holds {} bytes, {dst_w}x{dst_h} needs {needed}",
                        dst.len()
                    )));
                }
                copy_with_offset(
                    dst,
                    dst_w as u32,
                    dst_h as u32,
                    &frame,
                    offset_x,
                    offset_y,
                    flip,
                    self.config.transfer_workers,
                )?;

                self.wire.write_success()?;
                self.wire.write_i32(frame.width as i32)?;
                self.wire.write_i32(frame.height as i32)?;
            }

            Opcode::SerializeLayers => {
                let id = self.wire.read_i32()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let state = img.serialize_layers()?;
                self.wire.write_success()?;
                self.wire.write_string(&state)?;
            }

            Opcode::DeserializeLayers => {
                let id = self.wire.read_i32()?;
                let state = self.wire.read_string()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let changed = img.deserialize_layers(&state)?;
                self.wire.write_success()?;
                self.wire.write_bool(changed)?;
            }

            Opcode::SerializeProject => {
                let id = self.wire.read_i32()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let state = ProjectState {
                    version: crate::project::PROJECT_VERSION,
                    file_path: img.file_path().display().to_string(),
                    layers: img.serialize_layers()?,
                    view_state: img.view_state,
                };
                let bytes = state.encode()?;
                self.wire.write_success()?;
                self.wire.write_binary(&bytes)?;
            }

            Opcode::DeserializeProject => {
                let id = self.wire.read_i32()?;
                let bytes = self.wire.read_blob()?;
                let img = self.images.get_mut(&id).ok_or_else(|| no_image(id))?;
                let (state, mut warnings) = ProjectState::decode(&bytes)?;

                // Best effort: a layer state this engine cannot apply is a
                // warning, the rest of the snapshot still lands.
                match img.deserialize_layers(&state.layers) {
                    Ok(_) => {}
                    Err(BridgeError::Content(msg)) => warnings.push(msg),
                    Err(e) => return Err(e),
                }
                img.view_state = state.view_state;

                for w in &warnings {
                    warn!(id, warning = %w, "project restore");
                }
                self.wire.write_success()?;
                self.wire.write_string(&warnings.join("\n"))?;
            }

            Opcode::SetProjectPath => {
                let path = self.wire.read_string()?;
                self.project_path = Some(PathBuf::from(path));
                self.wire.write_success()?;
            }
        }
        self.wire.flush()
    }
}

fn no_image(id: i32) -> BridgeError {
    BridgeError::content(format!("no image with id {id}"))
}
