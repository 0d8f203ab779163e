//! Pixel format conversion between the loopback device and the encoder.
//!
//! The device side is packed YUYV 4:2:2; the H.264 encoder wants planar
//! I420 (4:2:0). RGB paths exist for snapshots and the synthetic test
//! pattern. All conversions validate buffer geometry up front.

use crate::errors::{BridgeError, Result};

fn check_even(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(BridgeError::Convert(format!(
            "dimensions {}x{} must be even and nonzero for chroma subsampling",
            width, height
        )));
    }
    Ok(())
}

fn check_len(label: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(BridgeError::Convert(format!(
            "{} buffer is {} bytes, expected {}",
            label, actual, expected
        )));
    }
    Ok(())
}

/// Convert packed YUYV 4:2:2 to planar I420 (4:2:0).
///
/// Chroma is subsampled vertically by averaging each pair of rows.
pub fn yuyv_to_i420(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_even(width, height)?;
    let w = width as usize;
    let h = height as usize;
    check_len("YUYV", yuyv.len(), w * h * 2)?;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut i420 = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = i420.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for row in 0..h {
        for pair in 0..w / 2 {
            // Packed layout per pixel pair: Y0 U Y1 V
            let src = (row * w + pair * 2) * 2;
            y_plane[row * w + pair * 2] = yuyv[src];
            y_plane[row * w + pair * 2 + 1] = yuyv[src + 2];

            if row % 2 == 0 {
                let below = src + w * 2;
                let u = (yuyv[src + 1] as u16 + yuyv[below + 1] as u16) / 2;
                let v = (yuyv[src + 3] as u16 + yuyv[below + 3] as u16) / 2;
                let uv_idx = (row / 2) * (w / 2) + pair;
                u_plane[uv_idx] = u as u8;
                v_plane[uv_idx] = v as u8;
            }
        }
    }

    Ok(i420)
}

/// Convert packed YUYV 4:2:2 to RGB24 using BT.601 integer math.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_even(width, height)?;
    let w = width as usize;
    let h = height as usize;
    check_len("YUYV", yuyv.len(), w * h * 2)?;

    let mut rgb = vec![0u8; w * h * 3];

    for row in 0..h {
        for pair in 0..w / 2 {
            let src = (row * w + pair * 2) * 2;
            let y0 = yuyv[src] as i32;
            let u = yuyv[src + 1] as i32;
            let y1 = yuyv[src + 2] as i32;
            let v = yuyv[src + 3] as i32;

            let dst = (row * w + pair * 2) * 3;
            write_bt601_pixel(&mut rgb[dst..dst + 3], y0, u, v);
            write_bt601_pixel(&mut rgb[dst + 3..dst + 6], y1, u, v);
        }
    }

    Ok(rgb)
}

fn write_bt601_pixel(out: &mut [u8], y: i32, u: i32, v: i32) {
    let c = y - 16;
    let d = u - 128;
    let e = v - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out[0] = r.clamp(0, 255) as u8;
    out[1] = g.clamp(0, 255) as u8;
    out[2] = b.clamp(0, 255) as u8;
}

/// Convert RGB24 to planar I420 using BT.601 integer math.
///
/// Chroma is taken from the top-left pixel of each 2x2 block.
pub fn rgb_to_i420(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_even(width, height)?;
    let w = width as usize;
    let h = height as usize;
    check_len("RGB", rgb.len(), w * h * 3)?;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let rgb_idx = (y * w + x) * 3;
            let r = rgb[rgb_idx] as i32;
            let g = rgb[rgb_idx + 1] as i32;
            let b = rgb[rgb_idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    Ok(yuv)
}

/// Resize an RGB24 frame with Lanczos3.
///
/// Returns the input unchanged when it already matches the target geometry.
pub fn resize_rgb(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<u8>> {
    if width == target_width && height == target_height {
        return Ok(rgb);
    }

    log::debug!(
        "Resizing frame from {}x{} to {}x{}",
        width,
        height,
        target_width,
        target_height
    );

    let img = image::RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        BridgeError::Convert(format!(
            "RGB buffer too small for {}x{} frame",
            width, height
        ))
    })?;

    let resized = image::imageops::resize(
        &img,
        target_width,
        target_height,
        image::imageops::FilterType::Lanczos3,
    );

    Ok(resized.into_raw())
}
