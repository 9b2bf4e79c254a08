//! Downscaling algorithms behind the quality-variant cache.
//!
//! Two algorithms, matching the two quality tags: nearest-neighbor sampling
//! (`Fast`) and gamma-corrected area averaging with gamma 2.2 (`Beautiful`).
//! Both run row-parallel and honor the cancellation token between rows.

use rayon::prelude::*;

use crate::foundation::core::{CancelToken, PixelBuffer, ScaleQuality};
use crate::foundation::error::{BridgeError, BridgeResult};

const GAMMA: f64 = 2.2;

/// Downscale `src` to `dst_w` x `dst_h` using the given quality.
///
/// Upscaling is not supported; the target must be no larger than the source
/// on both axes (the cache only ever asks for scale < 1.0).
pub fn downscale(
    src: &PixelBuffer,
    dst_w: u32,
    dst_h: u32,
    quality: ScaleQuality,
    cancel: &CancelToken,
) -> BridgeResult<PixelBuffer> {
    if dst_w == 0 || dst_h == 0 {
        return Err(BridgeError::render("downscale target must be >= 1x1"));
    }
    if dst_w > src.width || dst_h > src.height {
        return Err(BridgeError::render(format!(
            "downscale target {dst_w}x{dst_h} exceeds source {}x{}",
            src.width, src.height
        )));
    }

    let mut dst = PixelBuffer::new(dst_w, dst_h);
    match quality {
        ScaleQuality::Fast => nearest(src, &mut dst, cancel)?,
        ScaleQuality::Beautiful => gamma_area(src, &mut dst, cancel)?,
    }
    Ok(dst)
}

fn nearest(src: &PixelBuffer, dst: &mut PixelBuffer, cancel: &CancelToken) -> BridgeResult<()> {
    let (dw, dh) = (dst.width as usize, dst.height as usize);
    let (sw, sh) = (src.width as usize, src.height as usize);
    let stride = dst.stride();

    dst.data[..dh * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .try_for_each(|(dy, row)| {
            cancel.check()?;
            let sy = (dy * sh / dh).min(sh - 1);
            let src_row = &src.data[sy * sw * 4..(sy + 1) * sw * 4];
            for dx in 0..dw {
                let sx = (dx * sw / dw).min(sw - 1);
                row[dx * 4..dx * 4 + 4].copy_from_slice(&src_row[sx * 4..sx * 4 + 4]);
            }
            Ok(())
        })
}

fn gamma_area(src: &PixelBuffer, dst: &mut PixelBuffer, cancel: &CancelToken) -> BridgeResult<()> {
    let (dw, dh) = (dst.width as usize, dst.height as usize);
    let (sw, sh) = (src.width as usize, src.height as usize);
    let stride = dst.stride();

    // 8-bit -> linear lookup table; the inverse runs per output pixel.
    let mut to_linear = [0f64; 256];
    for (i, v) in to_linear.iter_mut().enumerate() {
        *v = (i as f64 / 255.0).powf(GAMMA);
    }

    let x_spans = spans(dw, sw);
    let y_spans = spans(dh, sh);

    dst.data[..dh * stride]
        .par_chunks_mut(stride)
        .enumerate()
        .try_for_each(|(dy, row)| {
            cancel.check()?;
            for (dx, out) in row.chunks_exact_mut(4).enumerate() {
                let mut lin = [0f64; 3];
                let mut alpha_weight = 0f64;
                let mut total_weight = 0f64;

                for &(sy, wy) in &y_spans[dy] {
                    let row_base = sy * sw * 4;
                    for &(sx, wx) in &x_spans[dx] {
                        let i = row_base + sx * 4;
                        let w = wy * wx;
                        let a = f64::from(src.data[i + 3]) / 255.0;
                        let aw = w * a;
                        lin[0] += aw * to_linear[src.data[i] as usize];
                        lin[1] += aw * to_linear[src.data[i + 1] as usize];
                        lin[2] += aw * to_linear[src.data[i + 2] as usize];
                        alpha_weight += aw;
                        total_weight += w;
                    }
                }

                if alpha_weight > 0.0 {
                    for c in 0..3 {
                        let v = (lin[c] / alpha_weight).powf(1.0 / GAMMA);
                        out[c] = (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                    }
                    out[3] = (alpha_weight / total_weight * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                } else {
                    out.copy_from_slice(&[0, 0, 0, 0]);
                }
            }
            Ok(())
        })
}

/// For each destination cell, the covered source cells with fractional
/// coverage weights. Destination cell `i` covers `[i*src/dst, (i+1)*src/dst)`.
fn spans(dst: usize, src: usize) -> Vec<Vec<(usize, f64)>> {
    let ratio = src as f64 / dst as f64;
    (0..dst)
        .map(|i| {
            let lo = i as f64 * ratio;
            let hi = ((i + 1) as f64 * ratio).min(src as f64);
            let first = lo.floor() as usize;
            let last = (hi.ceil() as usize).min(src).max(first + 1);
            (first..last)
                .map(|cell| {
                    let cover = (cell as f64 + 1.0).min(hi) - (cell as f64).max(lo);
                    (cell, cover.max(0.0))
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h);
        for y in 0..h {
            for x in 0..w {
                buf.put_pixel(x, y, px);
            }
        }
        buf
    }

    #[test]
    fn nearest_preserves_solid_color() {
        let src = solid(10, 10, [10, 20, 30, 255]);
        let out = downscale(&src, 3, 3, ScaleQuality::Fast, &CancelToken::new()).unwrap();
        assert_eq!(out.width, 3);
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(out.pixel(x, y), [10, 20, 30, 255]);
            }
        }
    }

    #[test]
    fn gamma_area_preserves_solid_color() {
        let src = solid(8, 8, [200, 100, 50, 255]);
        let out = downscale(&src, 3, 3, ScaleQuality::Beautiful, &CancelToken::new()).unwrap();
        for y in 0..3 {
            for x in 0..3 {
                let px = out.pixel(x, y);
                for c in 0..4 {
                    assert!((i32::from(px[c]) - i32::from([200, 100, 50, 255][c])).abs() <= 1);
                }
            }
        }
    }

    #[test]
    fn gamma_area_ignores_transparent_color() {
        // Left half opaque white, right half transparent garbage color. The
        // 1x1 result must stay white with half alpha, not dim toward garbage.
        let mut src = PixelBuffer::new(2, 1);
        src.put_pixel(0, 0, [255, 255, 255, 255]);
        src.put_pixel(1, 0, [7, 7, 7, 0]);
        let out = downscale(&src, 1, 1, ScaleQuality::Beautiful, &CancelToken::new()).unwrap();
        let px = out.pixel(0, 0);
        assert_eq!([px[0], px[1], px[2]], [255, 255, 255]);
        assert!((i32::from(px[3]) - 128).abs() <= 1);
    }

    #[test]
    fn fully_transparent_region_stays_transparent() {
        let src = PixelBuffer::new(4, 4);
        let out = downscale(&src, 2, 2, ScaleQuality::Beautiful, &CancelToken::new()).unwrap();
        assert!(out.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_upscale_and_zero_target() {
        let src = solid(4, 4, [0, 0, 0, 255]);
        assert!(downscale(&src, 8, 4, ScaleQuality::Fast, &CancelToken::new()).is_err());
        assert!(downscale(&src, 0, 1, ScaleQuality::Fast, &CancelToken::new()).is_err());
    }

    #[test]
    fn cancellation_aborts() {
        let src = solid(16, 16, [1, 2, 3, 255]);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            downscale(&src, 4, 4, ScaleQuality::Fast, &token),
            Err(BridgeError::Cancelled)
        ));
    }

    #[test]
    fn spans_cover_source_exactly() {
        for (d, s) in [(3, 10), (4, 4), (1, 7), (5, 8)] {
            let sp = spans(d, s);
            let total: f64 = sp.iter().flatten().map(|&(_, w)| w).sum();
            assert!((total - s as f64).abs() < 1e-9, "{d} {s} {total}");
        }
    }
}
