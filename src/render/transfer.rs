//! Pixel transfer into the shared-memory destination.
//!
//! Copies a rendered source buffer into a destination at a signed offset,
//! swapping red/blue on the way (the consumer reads BGRA). Flip itself is not
//! applied here; it runs downstream on the consumer side. What this stage does
//! do is sign-invert the offset on flipped axes so that offset-then-flip on
//! the consuming side lands the image where flip-then-offset would have.

use rayon::prelude::*;

use crate::foundation::core::{Flip, PixelBuffer};
use crate::foundation::error::{BridgeError, BridgeResult};

/// Copy `src` into `dst` (a `dst_w` x `dst_h` BGRA8 surface) at the given
/// offset. Destination pixels with no source coverage, and those whose source
/// pixel has alpha 0, are left untouched.
///
/// Destination rows are split into contiguous strips, one per worker, and
/// copied fork-join style; the result is byte-identical for any worker count.
/// `workers` defaults to the number of available processing units.
pub fn copy_with_offset(
    dst: &mut [u8],
    dst_w: u32,
    dst_h: u32,
    src: &PixelBuffer,
    offset_x: i32,
    offset_y: i32,
    flip: Flip,
    workers: Option<usize>,
) -> BridgeResult<()> {
    let stride = dst_w as usize * 4;
    let needed = stride * dst_h as usize;
    if dst.len() < needed {
        return Err(BridgeError::shared_memory(format!(
            "destination holds {} bytes, {dst_w}x{dst_h} needs {needed}",
            dst.len()
        )));
    }
    if dst_w == 0 || dst_h == 0 {
        return Ok(());
    }

    // Offset inversion on flipped axes; see module docs.
    let ox = if flip.horizontal() { -offset_x } else { offset_x };
    let oy = if flip.vertical() { -offset_y } else { offset_y };

    let workers = workers
        .unwrap_or_else(rayon::current_num_threads)
        .clamp(1, dst_h as usize);
    let rows_per_strip = (dst_h as usize).div_ceil(workers);

    let (sw, sh) = (src.width as i64, src.height as i64);
    dst[..needed]
        .par_chunks_mut(rows_per_strip * stride)
        .enumerate()
        .for_each(|(strip, rows)| {
            let base_dy = strip * rows_per_strip;
            for (row_idx, row) in rows.chunks_exact_mut(stride).enumerate() {
                let sy = (base_dy + row_idx) as i64 - i64::from(oy);
                if sy < 0 || sy >= sh {
                    continue;
                }
                let src_row = &src.data[sy as usize * sw as usize * 4..];
                for dx in 0..dst_w as usize {
                    let sx = dx as i64 - i64::from(ox);
                    if sx < 0 || sx >= sw {
                        continue;
                    }
                    let s = &src_row[sx as usize * 4..sx as usize * 4 + 4];
                    if s[3] == 0 {
                        continue;
                    }
                    let d = &mut row[dx * 4..dx * 4 + 4];
                    d[0] = s[2]; // B <- R slot
                    d[1] = s[1];
                    d[2] = s[0]; // R <- B slot
                    d[3] = s[3];
                }
            }
        });

    Ok(())
}
