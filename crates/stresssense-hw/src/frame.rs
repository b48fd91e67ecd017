//! Frame type and pixel-format conversion into RGB.

use image::{Rgb, RgbImage};

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured colour camera frame.
#[derive(Clone)]
pub struct Frame {
    /// H×W×3 RGB pixels.
    pub image: RgbImage,
    pub sequence: u32,
    /// Low-light frame. Still classified, but flagged for the viewer.
    pub is_dark: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YUV to RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    Rgb([
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = pixel_count(width, height);
    check_len("YUYV", yuyv, pixels * 2)?;

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let i = y as usize * width as usize + x as usize;
        let pair = (i / 2) * 4;
        let luma = yuyv[pair + (i % 2) * 2];
        yuv_to_rgb(luma, yuyv[pair + 1], yuyv[pair + 3])
    }))
}

/// Expand 8-bit grayscale to RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = pixel_count(width, height);
    check_len("GREY", grey, pixels)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = grey[y as usize * width as usize + x as usize];
        Rgb([v, v, v])
    }))
}

/// Expand 16-bit little-endian grayscale to RGB, keeping the high byte.
pub fn y16_to_rgb(y16: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = pixel_count(width, height);
    check_len("Y16", y16, pixels * 2)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = y16[(y as usize * width as usize + x as usize) * 2 + 1];
        Rgb([v, v, v])
    }))
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(image: &RgbImage, threshold_pct: f32) -> bool {
    let total = pixel_count(image.width(), image.height());
    if total == 0 {
        return true;
    }
    let dark = image.pixels().filter(|p| luma(p) < 32.0).count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // Y=16 is black and Y=235 is white in limited range.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let yuyv = vec![82, 90, 82, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p.0[0] > 200, "red channel: {:?}", p);
        assert!(p.0[1] < 40 && p.0[2] < 40, "green/blue: {:?}", p);
    }

    #[test]
    fn test_yuyv_4x2_dimensions() {
        let yuyv = vec![128u8; 16];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb_replicates() {
        let rgb = grey_to_rgb(&[0, 50, 100, 150], 2, 2).unwrap();
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([150, 150, 150]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([50, 50, 50]));
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // pixel 0 = 0x1234, pixel 1 = 0xFF00
        let rgb = y16_to_rgb(&[0x34, 0x12, 0x00, 0xFF], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0x12, 0x12, 0x12]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([0xFF, 0xFF, 0xFF]));
    }

    #[test]
    fn test_dark_frame_all_black() {
        let image = RgbImage::new(10, 10);
        assert!(is_dark_frame(&image, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        let image = RgbImage::from_pixel(10, 10, Rgb([128, 128, 128]));
        assert!(!is_dark_frame(&image, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&RgbImage::new(0, 0), DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright
        let image = RgbImage::from_fn(100, 10, |x, _| {
            if x < 94 { Rgb([10, 10, 10]) } else { Rgb([200, 200, 200]) }
        });
        assert!(!is_dark_frame(&image, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_pixel_count_does_not_wrap() {
        // 65536 * 65536 overflows u32.
        assert_eq!(pixel_count(65_536, 65_536), 1usize << 32);
    }

    #[test]
    fn test_oversized_grey_rejected_by_length() {
        let err = grey_to_rgb(&[0u8; 16], 65_536, 65_536).unwrap_err();
        match err {
            FrameError::InvalidLength { expected, actual, .. } => {
                assert_eq!(expected, 1usize << 32);
                assert_eq!(actual, 16);
            }
        }
    }
}
