//! Idle image reclamation.
//!
//! Loaded images that the host has stopped touching are dropped to bound
//! memory. The sweep runs between dispatcher commands (image handles have a
//! single owner, so there is no cross-thread sweep) and stops together with
//! the session via the shared shutdown signal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::foundation::core::CancelToken;
use crate::render::image::ImageHandle;

pub struct IdleSweeper {
    idle_timeout: Duration,
    interval: Duration,
    last_sweep: Instant,
    shutdown: CancelToken,
}

impl IdleSweeper {
    /// `idle_timeout` is how long an image may go untouched before it is
    /// reclaimed; `interval` rate-limits the sweep itself.
    pub fn new(idle_timeout: Duration, interval: Duration, shutdown: CancelToken) -> Self {
        Self {
            idle_timeout,
            interval,
            last_sweep: Instant::now(),
            shutdown,
        }
    }

    /// Sweep if the interval has elapsed and the session is still running.
    /// Returns the number of reclaimed images.
    pub fn maybe_sweep(&mut self, images: &mut HashMap<i32, ImageHandle>) -> usize {
        if self.shutdown.is_cancelled() || self.last_sweep.elapsed() < self.interval {
            return 0;
        }
        self.last_sweep = Instant::now();

        let before = images.len();
        let timeout = self.idle_timeout;
        images.retain(|id, img| {
            let keep = img.last_access().elapsed() < timeout;
            if !keep {
                debug!(id, path = %img.file_path().display(), "reclaiming idle image");
            }
            keep
        });
        before - images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FlatImage;
    use crate::foundation::core::PixelBuffer;

    fn images(n: i32) -> HashMap<i32, ImageHandle> {
        (0..n)
            .map(|id| {
                let engine = Box::new(FlatImage::new(PixelBuffer::new(1, 1)));
                (id, ImageHandle::new(engine, format!("{id}.png")))
            })
            .collect()
    }

    #[test]
    fn reclaims_everything_past_a_zero_timeout() {
        let mut sweeper =
            IdleSweeper::new(Duration::ZERO, Duration::ZERO, CancelToken::new());
        let mut imgs = images(3);
        assert_eq!(sweeper.maybe_sweep(&mut imgs), 3);
        assert!(imgs.is_empty());
    }

    #[test]
    fn keeps_recently_touched_images() {
        let mut sweeper =
            IdleSweeper::new(Duration::from_secs(3600), Duration::ZERO, CancelToken::new());
        let mut imgs = images(2);
        assert_eq!(sweeper.maybe_sweep(&mut imgs), 0);
        assert_eq!(imgs.len(), 2);
    }

    #[test]
    fn does_not_run_after_shutdown() {
        let shutdown = CancelToken::new();
        shutdown.cancel();
        let mut sweeper = IdleSweeper::new(Duration::ZERO, Duration::ZERO, shutdown);
        let mut imgs = images(2);
        assert_eq!(sweeper.maybe_sweep(&mut imgs), 0);
        assert_eq!(imgs.len(), 2);
    }

    #[test]
    fn respects_the_sweep_interval() {
        let mut sweeper =
            IdleSweeper::new(Duration::ZERO, Duration::from_secs(3600), CancelToken::new());
        let mut imgs = images(1);
        // Constructed "just swept"; the first opportunity is interval away.
        assert_eq!(sweeper.maybe_sweep(&mut imgs), 0);
        assert_eq!(imgs.len(), 1);
    }
}
