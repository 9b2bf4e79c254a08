//! pixelbridge is an inter-process rendering bridge.
//!
//! A host application spawns this process, streams editing commands over a
//! byte-stream pair, and reads rendered pixels out of a shared-memory region
//! it owns. The pipeline for one `Render` command:
//!
//! 1. **Decode**: [`Wire`] reads the opcode and its fixed field sequence
//! 2. **Render**: [`ImageHandle`] returns a cached buffer or drives the
//!    compositing engine ([`Compositor`]) and the downscale/flip stages
//! 3. **Transfer**: [`copy_with_offset`] writes BGRA pixels into the
//!    [`SharedMemoryChannel`], strip-parallel
//! 4. **Reply**: exactly one status word (plus fixed payload fields) per
//!    command, then the next command is read
//!
//! Key constraints:
//!
//! - **Sequential session**: one command in flight at a time; the pixel
//!   transfer is the only fan-out, a bounded fork-join over disjoint rows.
//! - **Retry-safe caches**: a failed or cancelled render publishes nothing.
//! - **Trust boundary**: the peer owns the shared region's true size; views
//!   are always clipped to the mapped extent.

#![deny(unsafe_code)]

pub mod engine;
pub mod foundation;
pub mod project;
pub mod proto;
pub mod reclaim;
pub mod render;
pub mod shm;

pub use engine::{Compositor, EngineLoader, FlatImage, FlatImageLoader};
pub use foundation::core::{Canvas, CancelToken, Flip, PixelBuffer, ScaleQuality};
pub use foundation::error::{BridgeError, BridgeResult};
pub use project::{PROJECT_VERSION, ProjectState, ViewState};
pub use proto::dispatch::{Opcode, Session, SessionConfig};
pub use proto::wire::{REPLY_MARKER, Reply, Wire};
pub use reclaim::IdleSweeper;
pub use render::downscale::downscale;
pub use render::image::{ImageHandle, flipped};
pub use render::transfer::copy_with_offset;
pub use shm::channel::{SharedMemoryChannel, create_region, destroy_region, region_name};
