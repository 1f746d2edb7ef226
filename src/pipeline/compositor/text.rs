use std::{fs, path::Path};

use ab_glyph::{Font, FontArc, GlyphId, PxScale, ScaleFont, point};
use image::{Rgb, RgbImage};

use super::{
    draw,
    glyphs::{GLYPH_HEIGHT, GLYPH_WIDTH, glyph_rows},
};

const MIN_TEXT_PX: f32 = 8.0;

#[derive(Clone, Debug)]
pub enum FontFace {
    TrueType(FontArc),
    Builtin,
}

impl FontFace {
    /// Loads a TrueType font, or the built-in bitmap face if it cannot be read.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!(
                    "font {} unavailable ({err}), using built-in glyphs",
                    path.display()
                );
                return FontFace::Builtin;
            }
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => FontFace::TrueType(font),
            Err(err) => {
                log::warn!(
                    "font {} could not be parsed ({err}), using built-in glyphs",
                    path.display()
                );
                FontFace::Builtin
            }
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, FontFace::Builtin)
    }

    /// Width and height in pixels of `text` rendered at `px`.
    pub fn measure(&self, text: &str, px: f32) -> (u32, u32) {
        match self {
            FontFace::TrueType(font) => {
                let scaled = font.as_scaled(PxScale::from(px));
                let mut width = 0.0f32;
                let mut last: Option<GlyphId> = None;
                for ch in text.chars() {
                    let id = scaled.glyph_id(ch);
                    if let Some(prev) = last {
                        width += scaled.kern(prev, id);
                    }
                    width += scaled.h_advance(id);
                    last = Some(id);
                }
                (width.ceil().max(0.0) as u32, scaled.height().ceil() as u32)
            }
            FontFace::Builtin => {
                let scale = builtin_scale(px);
                let chars = text.chars().count() as u32;
                let width = (chars * (GLYPH_WIDTH + 1) * scale).saturating_sub(scale);
                (width, (GLYPH_HEIGHT + 1) * scale)
            }
        }
    }

    /// Largest size not above `px` at which `text` fits in `max_width`.
    pub fn fit_px(&self, text: &str, px: f32, max_width: u32) -> f32 {
        let mut px = px.max(MIN_TEXT_PX);
        while px > MIN_TEXT_PX && self.measure(text, px).0 > max_width {
            px = (px * 0.9).max(MIN_TEXT_PX);
        }
        px
    }

    /// Draws `text` with its top-left corner at `(x, y)`.
    pub fn draw(&self, img: &mut RgbImage, x: i32, y: i32, px: f32, text: &str, color: Rgb<u8>) {
        match self {
            FontFace::TrueType(font) => draw_truetype(font, img, x, y, px, text, color),
            FontFace::Builtin => draw_builtin(img, x, y, px, text, color),
        }
    }

    /// Draws `text` over a black outline.
    pub fn draw_outlined(
        &self,
        img: &mut RgbImage,
        x: i32,
        y: i32,
        px: f32,
        text: &str,
        color: Rgb<u8>,
    ) {
        let offset = ((px / 16.0).round() as i32).max(1);
        let corners = [(-offset, -offset), (offset, -offset), (-offset, offset), (offset, offset)];
        for (dx, dy) in corners {
            self.draw(img, x + dx, y + dy, px, text, Rgb([0, 0, 0]));
        }
        self.draw(img, x, y, px, text, color);
    }
}

fn builtin_scale(px: f32) -> u32 {
    ((px / (GLYPH_HEIGHT + 1) as f32).round() as u32).max(1)
}

fn draw_builtin(img: &mut RgbImage, x: i32, y: i32, px: f32, text: &str, color: Rgb<u8>) {
    let scale = builtin_scale(px) as i32;
    let advance = (GLYPH_WIDTH as i32 + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        for (row, bits) in glyph_rows(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH as i32 {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px0 = origin_x + col * scale;
                let py0 = y + row as i32 * scale;
                draw::fill_rect(img, px0, py0, px0 + scale, py0 + scale, color);
            }
        }
    }
}

fn draw_truetype(
    font: &FontArc,
    img: &mut RgbImage,
    x: i32,
    y: i32,
    px: f32,
    text: &str,
    color: Rgb<u8>,
) {
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);
    let baseline = y as f32 + scaled.ascent();
    let mut caret = x as f32;
    let mut last: Option<GlyphId> = None;

    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = last {
            caret += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, point(caret, baseline));
        caret += scaled.h_advance(id);
        last = Some(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            draw::blend_pixel(
                img,
                bounds.min.x as i32 + gx as i32,
                bounds.min.y as i32 + gy as i32,
                color,
                coverage,
            );
        });
    }
}
