//! Low-light preprocessing
//!
//! Stretches the luminance range of dark frames before inference: the 1st..99th
//! percentile of luma is mapped onto the full 0..255 range with a lookup table applied to
//! every channel. The annotated output still uses the original frame.

use crate::capture::Frame;

/// Fraction of pixels clipped at each end of the histogram
const CLIP_FRACTION: f64 = 0.01;

/// Ranges narrower than this are left alone to avoid amplifying noise
const MIN_RANGE: u8 = 8;

fn luma(b: u8, g: u8, r: u8) -> u8 {
    ((29 * b as u32 + 150 * g as u32 + 77 * r as u32) >> 8) as u8
}

/// Luma value below which `fraction` of the pixels fall
fn percentile(histogram: &[u64; 256], total: u64, fraction: f64) -> u8 {
    let target = (total as f64 * fraction) as u64;
    let mut seen = 0;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > target {
            return value as u8;
        }
    }
    255
}

/// Contrast-stretched copy of `frame`
pub fn enhance(frame: &Frame) -> Frame {
    let mut histogram = [0u64; 256];
    for px in frame.data.chunks_exact(3) {
        histogram[luma(px[0], px[1], px[2]) as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return frame.clone();
    }

    let low = percentile(&histogram, total, CLIP_FRACTION);
    let high = percentile(&histogram, total, 1.0 - CLIP_FRACTION);
    if high <= low || high - low < MIN_RANGE {
        return frame.clone();
    }

    let scale = 255.0 / (high - low) as f32;
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let stretched = (value as f32 - low as f32) * scale;
        *slot = stretched.clamp(0.0, 255.0).round() as u8;
    }

    let mut out = frame.clone();
    for byte in out.data.iter_mut() {
        *byte = lut[*byte as usize];
    }
    out
}
