//! Credential tags: the printable cards a settled registrant downloads, and
//! the plainer copy kept for the organizers.

use std::{io::Cursor, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{imageops, imageops::FilterType, ImageFormat, Rgba, RgbaImage, RgbImage};
use imageproc::{
    drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};

use crate::error::{Error, Result};

use super::settings::EventBranding;

const MAROON: Rgba<u8> = Rgba([0x80, 0x00, 0x00, 0xff]);
const ORANGE: Rgba<u8> = Rgba([0xff, 0x98, 0x00, 0xff]);
const GREEN: Rgba<u8> = Rgba([0x00, 0x80, 0x00, 0xff]);
const BLACK: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xff]);
const WHITE: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);
const PLACEHOLDER: Rgba<u8> = Rgba([0xd9, 0xd9, 0xd9, 0xff]);
const WARM_STOPS: [Rgba<u8>; 3] = [
    Rgba([0xff, 0xef, 0xd5, 0xff]),
    Rgba([0xff, 0xe4, 0xe1, 0xff]),
    Rgba([0xff, 0xfa, 0xfa, 0xff]),
];

/// Which of the two cards to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStyle {
    /// Warm gradient card with a maroon frame, handed to the registrant
    Attendee,
    /// White card with both photo crops, kept in storage
    Admin,
}

/// What goes on a card
#[derive(Debug, Clone)]
pub struct TagCard {
    pub full_name: String,
    pub archdeaconry: String,
    pub church: String,
    pub photo: Option<RgbImage>,
}

pub struct TagRenderer {
    font: FontArc,
    branding: EventBranding,
}

impl TagRenderer {
    pub fn load(font: Option<&Path>, branding: EventBranding) -> Result<Self> {
        let path = font.ok_or_else(|| Error::Config("No tag_font configured".to_string()))?;
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Config(format!("Cannot read font {}: {}", path.display(), e)))?;
        Self::from_bytes(bytes, branding)
    }

    pub fn from_bytes(bytes: Vec<u8>, branding: EventBranding) -> Result<Self> {
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| Error::Config(format!("Invalid font: {}", e)))?;
        Ok(Self { font, branding })
    }

    /// Draws a card and encodes it as PNG.
    pub fn render(&self, card: &TagCard, style: TagStyle) -> Result<Vec<u8>> {
        let image = match style {
            TagStyle::Attendee => self.attendee_card(card),
            TagStyle::Admin => self.admin_card(card),
        };

        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    fn heading(&self, layout: &mut Layout) {
        layout.text(&self.font, &self.branding.title, 34.0, MAROON, 12);
        layout.text(&self.font, &format!("Theme: {}", self.branding.theme), 28.0, MAROON, 8);
        layout.text(&self.font, &format!("Text: {}", self.branding.text), 28.0, MAROON, 24);
    }

    fn attendee_card(&self, card: &TagCard) -> RgbaImage {
        let (width, height) = (700, 940);
        let mut layout = Layout::new(diagonal_gradient(width, height, &WARM_STOPS), 150);

        let banner = horizontal_gradient(width, 110, MAROON, ORANGE);
        imageops::overlay(&mut layout.image, &banner, 0, 0);

        self.heading(&mut layout);
        layout.round_photo(card.photo.as_ref(), 300, 8, MAROON, 20);
        layout.text(&self.font, &card.full_name, 40.0, BLACK, 10);
        layout.rule(width - 120, 2, BLACK, 16);
        layout.text(&self.font, &format!("Archdeaconry: {}", card.archdeaconry), 34.0, BLACK, 8);
        layout.text(&self.font, &format!("Church: {}", card.church), 34.0, BLACK, 28);
        layout.text(&self.font, "I WILL BE ATTENDING", 40.0, GREEN, 0);

        let mut image = layout.image;
        frame(&mut image, 12, MAROON);
        round_corners(&mut image, 50);
        image
    }

    fn admin_card(&self, card: &TagCard) -> RgbaImage {
        let (width, height) = (1200, 1420);
        let mut layout = Layout::new(RgbaImage::from_pixel(width, height, WHITE), 60);

        self.heading(&mut layout);
        layout.round_photo(card.photo.as_ref(), 300, 8, MAROON, 30);
        layout.text(&self.font, &format!("Name: {}", card.full_name), 44.0, BLACK, 14);
        layout.text(&self.font, &format!("Archdeaconry: {}", card.archdeaconry), 44.0, BLACK, 14);
        layout.text(&self.font, &format!("Church: {}", card.church), 44.0, BLACK, 24);
        layout.text(&self.font, "Participant", 40.0, GREEN, 40);
        layout.square_photo(card.photo.as_ref(), 440, 6, BLACK);

        layout.image
    }
}

/// Vertical flow of centered elements
struct Layout {
    image: RgbaImage,
    y: u32,
}

impl Layout {
    fn new(image: RgbaImage, top: u32) -> Self {
        Self { image, y: top }
    }

    fn center_x(&self, width: u32) -> i32 {
        (self.image.width().saturating_sub(width) / 2) as i32
    }

    /// Centered line, shrunk until it fits the card with a margin.
    fn text(&mut self, font: &FontArc, text: &str, size: f32, color: Rgba<u8>, gap: u32) {
        let max_width = self.image.width().saturating_sub(80);
        let mut scale = PxScale::from(size);
        let (mut width, mut height) = text_size(scale, font, text);
        while width > max_width && scale.y > 10.0 {
            scale = PxScale::from(scale.y * 0.9);
            (width, height) = text_size(scale, font, text);
        }

        let x = self.center_x(width);
        draw_text_mut(&mut self.image, color, x, self.y as i32, scale, font, text);
        self.y += height.max(size as u32) + gap;
    }

    fn rule(&mut self, width: u32, thickness: u32, color: Rgba<u8>, gap: u32) {
        let x = self.center_x(width);
        draw_filled_rect_mut(
            &mut self.image,
            Rect::at(x, self.y as i32).of_size(width, thickness),
            color,
        );
        self.y += thickness + gap;
    }

    fn round_photo(
        &mut self,
        photo: Option<&RgbImage>,
        diameter: u32,
        ring: u32,
        ring_color: Rgba<u8>,
        gap: u32,
    ) {
        let x = self.center_x(diameter);
        let radius = (diameter / 2) as i32;
        let center = (x + radius, self.y as i32 + radius);
        draw_filled_circle_mut(&mut self.image, center, radius, ring_color);

        let inner = diameter.saturating_sub(ring * 2).max(1);
        let fill = photo_square(photo, inner);
        paste_circle(&mut self.image, &fill, x as u32 + ring, self.y + ring);

        self.y += diameter + gap;
    }

    fn square_photo(&mut self, photo: Option<&RgbImage>, size: u32, border: u32, color: Rgba<u8>) {
        let x = self.center_x(size);
        draw_filled_rect_mut(
            &mut self.image,
            Rect::at(x, self.y as i32).of_size(size, size),
            color,
        );

        let inner = size.saturating_sub(border * 2).max(1);
        let fill = photo_square(photo, inner);
        imageops::overlay(
            &mut self.image,
            &fill,
            (x as u32 + border) as i64,
            (self.y + border) as i64,
        );

        self.y += size;
    }
}

/// The photo center-cropped and scaled to a square, or a grey placeholder.
fn photo_square(photo: Option<&RgbImage>, size: u32) -> RgbaImage {
    let Some(photo) = photo else {
        return RgbaImage::from_pixel(size, size, PLACEHOLDER);
    };

    let side = photo.width().min(photo.height()).max(1);
    let x = (photo.width() - side.min(photo.width())) / 2;
    let y = (photo.height() - side.min(photo.height())) / 2;
    let square = imageops::crop_imm(photo, x, y, side, side).to_image();
    let scaled = imageops::resize(&square, size, size, FilterType::Triangle);

    RgbaImage::from_fn(size, size, |px, py| {
        let p = scaled.get_pixel(px, py);
        Rgba([p[0], p[1], p[2], 0xff])
    })
}

fn inside_circle(px: u32, py: u32, diameter: u32) -> bool {
    let r = diameter as f64 / 2.0;
    let dx = px as f64 + 0.5 - r;
    let dy = py as f64 + 0.5 - r;
    dx * dx + dy * dy <= r * r
}

fn paste_circle(canvas: &mut RgbaImage, fill: &RgbaImage, left: u32, top: u32) {
    let diameter = fill.width();
    for (px, py, pixel) in fill.enumerate_pixels() {
        let (cx, cy) = (left + px, top + py);
        if cx < canvas.width() && cy < canvas.height() && inside_circle(px, py, diameter) {
            canvas.put_pixel(cx, cy, *pixel);
        }
    }
}

fn lerp(a: Rgba<u8>, b: Rgba<u8>, t: f64) -> Rgba<u8> {
    let mix = |i: usize| (a[i] as f64 + (b[i] as f64 - a[i] as f64) * t).round() as u8;
    Rgba([mix(0), mix(1), mix(2), mix(3)])
}

/// Color at `t` in `[0, 1]` along evenly spaced stops.
fn gradient_at(stops: &[Rgba<u8>], t: f64) -> Rgba<u8> {
    match stops {
        [] => WHITE,
        [only] => *only,
        _ => {
            let t = t.clamp(0.0, 1.0) * (stops.len() - 1) as f64;
            let i = (t.floor() as usize).min(stops.len() - 2);
            lerp(stops[i], stops[i + 1], t - i as f64)
        }
    }
}

/// Top-left to bottom-right gradient
fn diagonal_gradient(width: u32, height: u32, stops: &[Rgba<u8>]) -> RgbaImage {
    let span = (width + height).saturating_sub(2).max(1) as f64;
    RgbaImage::from_fn(width, height, |x, y| gradient_at(stops, (x + y) as f64 / span))
}

fn horizontal_gradient(width: u32, height: u32, from: Rgba<u8>, to: Rgba<u8>) -> RgbaImage {
    let span = width.saturating_sub(1).max(1) as f64;
    RgbaImage::from_fn(width, height, |x, _| lerp(from, to, x as f64 / span))
}

fn frame(image: &mut RgbaImage, thickness: u32, color: Rgba<u8>) {
    let (w, h) = image.dimensions();
    for rect in [
        Rect::at(0, 0).of_size(w, thickness),
        Rect::at(0, (h - thickness) as i32).of_size(w, thickness),
        Rect::at(0, 0).of_size(thickness, h),
        Rect::at((w - thickness) as i32, 0).of_size(thickness, h),
    ] {
        draw_filled_rect_mut(image, rect, color);
    }
}

/// Clears everything outside rounded corners to transparent.
fn round_corners(image: &mut RgbaImage, radius: u32) {
    let (w, h) = image.dimensions();
    let r = radius.min(w / 2).min(h / 2) as f64;
    let clear = Rgba([0, 0, 0, 0]);

    for y in 0..h {
        for x in 0..w {
            let cx = if (x as f64) < r {
                r
            } else if (x as f64) >= w as f64 - r {
                w as f64 - r
            } else {
                continue;
            };
            let cy = if (y as f64) < r {
                r
            } else if (y as f64) >= h as f64 - r {
                h as f64 - r
            } else {
                continue;
            };

            let dx = x as f64 + 0.5 - cx;
            let dy = y as f64 + 0.5 - cy;
            if dx * dx + dy * dy > r * r {
                image.put_pixel(x, y, clear);
            }
        }
    }
}
