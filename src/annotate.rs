//! Drawing helpers for annotated output images.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;

use crate::metrics::{Point, Rect};

pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Stroke width of drawn rectangles.
const LINE_THICKNESS: i64 = 2;
/// Pixel scale of the bitmap font.
const FONT_SCALE: i32 = 2;

/// Draw a rectangle outline `LINE_THICKNESS` pixels wide, growing inward.
pub fn draw_rect(img: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for inset in 0..LINE_THICKNESS {
        let width = rect.x2 - rect.x1 - 2 * inset;
        let height = rect.y2 - rect.y1 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let outline = imageproc::rect::Rect::at((rect.x1 + inset) as i32, (rect.y1 + inset) as i32)
            .of_size(width as u32, height as u32);
        draw_hollow_rect_mut(img, outline, color);
    }
}

/// Draw `text` with its baseline at `origin`.
pub fn draw_label(img: &mut RgbImage, text: &str, origin: Point, color: Rgb<u8>) {
    let top = origin.y as i32 - 5 * FONT_SCALE;
    let mut cursor_x = origin.x as i32;
    for ch in text.chars() {
        draw_char(img, cursor_x, top, ch, color);
        cursor_x += 4 * FONT_SCALE;
    }
}

/// 3x5 glyphs, one byte per row, high bit on the left.
fn glyph(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        'c' => [0b000, 0b000, 0b111, 0b100, 0b111],
        'm' => [0b000, 0b000, 0b111, 0b111, 0b101],
        _ => [0; 5],
    }
}

fn draw_char(img: &mut RgbImage, x: i32, y: i32, ch: char, color: Rgb<u8>) {
    for (row, bits) in glyph(ch).iter().enumerate() {
        for col in 0..3 {
            if (bits >> (2 - col)) & 1 == 0 {
                continue;
            }
            for dy in 0..FONT_SCALE {
                for dx in 0..FONT_SCALE {
                    let px = x + col * FONT_SCALE + dx;
                    let py = y + row as i32 * FONT_SCALE + dy;
                    if px >= 0 && py >= 0 && px < img.width() as i32 && py < img.height() as i32 {
                        img.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
    }
}
