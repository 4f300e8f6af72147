//! Timestamp overlay rendering.
//!
//! The source image is copied unchanged, then a semi-transparent dark box with
//! rounded corners is composited onto the bottom-left corner and the text is
//! drawn over it in opaque white using a built-in 8x8 bitmap font.

use std::io::Cursor;

use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use super::StampedImage;

/// Left inset of the box.
pub const BOX_INSET_X: i64 = 12;
/// Distance from the bottom edge to the top of the box.
pub const BOX_OFFSET_FROM_BOTTOM: i64 = 42;
/// Box height; leaves a 12 unit gap to the bottom edge.
pub const BOX_HEIGHT: i64 = 34;
/// Horizontal padding added to the measured text width.
pub const BOX_EXTRA_WIDTH: i64 = 180;
/// Text starts this far right of the box edge.
pub const TEXT_INSET_X: i64 = 10;
/// Text baseline distance from the bottom edge.
pub const TEXT_BASELINE_FROM_BOTTOM: i64 = 18;
/// Box opacity.
pub const BOX_ALPHA: f32 = 0.55;
/// Corner radius of the box.
pub const BOX_RADIUS: i64 = 6;
/// Glyph scale applied to the 8x8 font (16 px glyphs).
pub const GLYPH_SCALE: i64 = 2;
/// JPEG re-encode quality (0.92).
pub const JPEG_QUALITY: u8 = 92;

const GLYPH_SIZE: i64 = 8;

/// Width of `text` in pixels when drawn with the built-in font.
pub fn text_width(text: &str) -> i64 {
    text.chars().count() as i64 * GLYPH_SIZE * GLYPH_SCALE
}

/// Map a mime type to an image format.
pub fn format_for_mime(mime_type: &str) -> Option<ImageFormat> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
        other => ImageFormat::from_mime_type(other),
    }
}

/// Stamp `text` onto the encoded image `bytes`, re-encoding as `mime_type`.
pub fn render_stamp(bytes: &[u8], text: &str, mime_type: &str) -> Result<StampedImage, String> {
    let format =
        format_for_mime(mime_type).ok_or_else(|| format!("unsupported mime type: {mime_type}"))?;

    let decoded = image::load_from_memory(bytes).map_err(|e| format!("failed to decode image: {e}"))?;
    let mut canvas = decoded.to_rgba8();

    draw_overlay(&mut canvas, text);

    let encoded = encode(canvas, format)?;
    Ok(StampedImage {
        bytes: encoded,
        mime_type: format.to_mime_type().to_string(),
    })
}

fn draw_overlay(canvas: &mut RgbaImage, text: &str) {
    let height = canvas.height() as i64;

    let box_x = BOX_INSET_X;
    let box_y = height - BOX_OFFSET_FROM_BOTTOM;
    let box_w = text_width(text) + BOX_EXTRA_WIDTH;

    for y in box_y..box_y + BOX_HEIGHT {
        for x in box_x..box_x + box_w {
            if inside_rounded_rect(x - box_x, y - box_y, box_w, BOX_HEIGHT, BOX_RADIUS) {
                blend_pixel(canvas, x, y, Rgba([0, 0, 0, 255]), BOX_ALPHA);
            }
        }
    }

    let glyph_px = GLYPH_SIZE * GLYPH_SCALE;
    let top = height - TEXT_BASELINE_FROM_BOTTOM - glyph_px;
    let mut pen_x = box_x + TEXT_INSET_X;

    for ch in text.chars() {
        if let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| LATIN_FONTS.get(ch)) {
            draw_glyph(canvas, &glyph, pen_x, top);
        }
        pen_x += glyph_px;
    }
}

fn draw_glyph(canvas: &mut RgbaImage, glyph: &[u8; 8], left: i64, top: i64) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..GLYPH_SIZE {
            if bits & (1 << col) == 0 {
                continue;
            }
            let x0 = left + col * GLYPH_SCALE;
            let y0 = top + row as i64 * GLYPH_SCALE;
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    put_pixel(canvas, x0 + dx, y0 + dy, Rgba([255, 255, 255, 255]));
                }
            }
        }
    }
}

fn inside_rounded_rect(x: i64, y: i64, w: i64, h: i64, r: i64) -> bool {
    let cx = if x < r {
        r
    } else if x >= w - r {
        w - r - 1
    } else {
        return true;
    };
    let cy = if y < r {
        r
    } else if y >= h - r {
        h - r - 1
    } else {
        return true;
    };
    let (dx, dy) = (x - cx, y - cy);
    dx * dx + dy * dy <= r * r
}

fn put_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    canvas.put_pixel(x as u32, y as u32, color);
}

/// Source-over compositing of `color` at `alpha` onto the pixel at (x, y).
fn blend_pixel(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, alpha: f32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = alpha + dst_a * (1.0 - alpha);
    if out_a <= 0.0 {
        return;
    }
    for c in 0..3 {
        let src_c = color[c] as f32 / 255.0;
        let dst_c = dst[c] as f32 / 255.0;
        let out_c = (src_c * alpha + dst_c * dst_a * (1.0 - alpha)) / out_a;
        dst[c] = (out_c * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn encode(canvas: RgbaImage, format: ImageFormat) -> Result<Vec<u8>, String> {
    let mut buffer = Cursor::new(Vec::new());
    let image = DynamicImage::ImageRgba8(canvas);

    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
                .map_err(|e| format!("failed to encode jpeg: {e}"))?;
        }
        other => {
            image
                .write_to(&mut buffer, other)
                .map_err(|e| format!("failed to encode {}: {e}", other.to_mime_type()))?;
        }
    }

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_pixel(width, height, Rgba(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_text_width() {
        assert_eq!(text_width(""), 0);
        assert_eq!(text_width("2024/01/15 21:30:45"), 19 * 16);
    }

    #[test]
    fn test_format_for_mime() {
        assert_eq!(format_for_mime("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(format_for_mime("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(format_for_mime("IMAGE/PNG"), Some(ImageFormat::Png));
        assert_eq!(format_for_mime("text/plain"), None);
    }

    #[test]
    fn test_overlay_geometry() {
        let source = solid_png(600, 120, [200, 0, 0, 255]);
        let stamped = render_stamp(&source, "2024/01/15 21:30:45", "image/png").unwrap();
        assert_eq!(stamped.mime_type, "image/png");

        let img = image::load_from_memory(&stamped.bytes).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (600, 120));

        // Outside the box: untouched
        assert_eq!(img.get_pixel(0, 0), &Rgba([200, 0, 0, 255]));
        assert_eq!(img.get_pixel(5, 100), &Rgba([200, 0, 0, 255]));
        // Below the box (12 px gap at the bottom)
        assert_eq!(img.get_pixel(100, 115), &Rgba([200, 0, 0, 255]));

        // Inside the box left of the text: darkened red
        let shaded = img.get_pixel(16, 120 - 25);
        assert_eq!(shaded[0], (200.0f32 * 0.45).round() as u8);
        assert_eq!(shaded[1], 0);
        assert_eq!(shaded[3], 255);

        // Box right edge = 12 + 304 + 180 = 496
        assert_eq!(img.get_pixel(495, 120 - 25)[0], shaded[0]);
        assert_eq!(img.get_pixel(497, 120 - 25), &Rgba([200, 0, 0, 255]));

        // Some white text pixels inside the text band
        let white = (22..22 + 304)
            .flat_map(|x| (120 - 34..120 - 18).map(move |y| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y) == &Rgba([255, 255, 255, 255]))
            .count();
        assert!(white > 100, "expected rendered glyphs, got {white} white pixels");
    }

    #[test]
    fn test_jpeg_stays_jpeg() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 64, image::Rgb([10, 120, 30])));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();

        let stamped = render_stamp(buffer.get_ref(), "x", "image/jpeg").unwrap();
        assert_eq!(stamped.mime_type, "image/jpeg");
        assert_eq!(&stamped.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_tiny_image_is_clipped_not_rejected() {
        let source = solid_png(4, 4, [1, 2, 3, 255]);
        let stamped = render_stamp(&source, "2024/01/15", "image/png").unwrap();
        let img = image::load_from_memory(&stamped.bytes).unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[test]
    fn test_transparent_pixels_gain_box_alpha() {
        let source = solid_png(300, 60, [0, 0, 0, 0]);
        let stamped = render_stamp(&source, "", "image/png").unwrap();
        let img = image::load_from_memory(&stamped.bytes).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(40, 60 - 25)[3], (0.55f32 * 255.0).round() as u8);
        assert_eq!(img.get_pixel(40, 2)[3], 0);
    }

    #[test]
    fn test_rejects_garbage_and_unknown_mime() {
        assert!(render_stamp(b"not an image", "x", "image/png").is_err());
        let source = solid_png(8, 8, [0, 0, 0, 255]);
        assert!(render_stamp(&source, "x", "application/pdf").is_err());
    }
}
