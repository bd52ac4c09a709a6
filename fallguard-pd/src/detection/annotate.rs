//! Frame annotation: boxes, track labels and skeletons drawn onto a copy of the frame

use super::pose::{Detection, SKELETON};
use crate::capture::Frame;
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::collections::HashMap;

/// How a track is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackMark {
    #[default]
    Normal,
    Pending,
    Fall,
}

impl TrackMark {
    fn color(&self) -> Rgb<u8> {
        match self {
            TrackMark::Normal => Rgb([0, 255, 0]),
            TrackMark::Pending => Rgb([255, 165, 0]),
            TrackMark::Fall => Rgb([255, 0, 0]),
        }
    }

    fn label(&self, track_id: i64) -> String {
        match self {
            TrackMark::Normal => format!("ID {}", track_id),
            TrackMark::Pending => format!("ID {} PENDING", track_id),
            TrackMark::Fall => format!("ID {} FALL", track_id),
        }
    }
}

const LINE_THICKNESS: i32 = 2;
const GLYPH_SCALE: i32 = 2;

/// Annotated copy of `frame`; tracks missing from `marks` draw as normal
pub fn annotate(frame: &Frame, detections: &[Detection], marks: &HashMap<i64, TrackMark>) -> Frame {
    if detections.is_empty() {
        return frame.clone();
    }

    let mut image = frame.to_rgb_image();
    for detection in detections {
        let mark = marks.get(&detection.track_id).copied().unwrap_or_default();
        let color = mark.color();
        let bbox = &detection.bbox;

        let left = bbox.left().round() as i32;
        let top = bbox.top().round() as i32;
        let right = (bbox.x_center + bbox.width / 2.0).round() as i32;
        let bottom = bbox.bottom().round() as i32;
        for inset in 0..LINE_THICKNESS {
            draw_rectangle(&mut image, left + inset, top + inset, right - inset, bottom - inset, color);
        }

        let label_y = (top - 8 * GLYPH_SCALE - 2).max(0);
        draw_label(&mut image, left.max(0), label_y, &mark.label(detection.track_id), color);

        for (from, to) in SKELETON {
            let (Some(a), Some(b)) = (detection.keypoint(from), detection.keypoint(to)) else {
                continue;
            };
            if a.is_detected() && b.is_detected() {
                draw_line(
                    &mut image,
                    (a.x.round() as i32, a.y.round() as i32),
                    (b.x.round() as i32, b.y.round() as i32),
                    color,
                );
            }
        }
    }

    frame.with_rgb_image(&image)
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    for x in left..=right {
        put_pixel(image, x, top, color);
        put_pixel(image, x, bottom, color);
    }
    for y in top..=bottom {
        put_pixel(image, left, y, color);
        put_pixel(image, right, y, color);
    }
}

/// Bresenham line, two pixels wide
fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_pixel(image, x, y, color);
        put_pixel(image, x + 1, y, color);
        put_pixel(image, x, y + 1, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        for sy in 0..GLYPH_SCALE {
                            for sx in 0..GLYPH_SCALE {
                                put_pixel(
                                    image,
                                    x + col * GLYPH_SCALE + sx,
                                    y + row as i32 * GLYPH_SCALE + sy,
                                    color,
                                );
                            }
                        }
                    }
                }
            }
        }
        x += 6 * GLYPH_SCALE;
    }
}

/// 5x7 bitmaps for the characters labels use
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        _ => return None,
    };
    Some(bits)
}
