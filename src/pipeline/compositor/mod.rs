//! Renders the feedback overlay: the latest camera frame letterboxed onto a
//! fixed canvas, with a banner carrying the posture verdict, a countdown to
//! the next inference and the classifier's message.

mod assets;
mod draw;
mod glyphs;
mod text;

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use rayon::prelude::*;

pub use assets::OverlayAssets;

use crate::{
    config::CanvasSize,
    types::{Frame, PostureKind},
};

pub const MESSAGE_MAX_CHARS: usize = 45;
pub const MESSAGE_MAX_LINES: usize = 2;

const MIN_BANNER_HEIGHT: u32 = 140;
const ICON_MARGIN: i32 = 16;
const RAW_OUTPUT_MAX_CHARS: usize = 60;

const BANNER_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PILL_COLOR: Rgb<u8> = Rgb([40, 40, 40]);
const COUNTDOWN_COLOR: Rgb<u8> = Rgb([180, 180, 180]);
const MESSAGE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FOOTER_COLOR: Rgb<u8> = Rgb([160, 160, 160]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayStyle {
    pub accent: Rgb<u8>,
    pub headline: &'static str,
}

pub fn style_for(kind: PostureKind) -> OverlayStyle {
    match kind {
        PostureKind::Good => OverlayStyle {
            accent: Rgb([34, 197, 94]),
            headline: "GOOD POSTURE",
        },
        PostureKind::Bad => OverlayStyle {
            accent: Rgb([239, 68, 68]),
            headline: "BAD POSTURE",
        },
        PostureKind::Error => OverlayStyle {
            accent: Rgb([245, 158, 11]),
            headline: "MODEL ERROR",
        },
    }
}

/// Status text drawn into the banner.
#[derive(Clone, Copy, Debug)]
pub struct OverlayText<'a> {
    pub kind: PostureKind,
    pub message: &'a str,
    pub raw_output: &'a str,
    pub countdown_secs: f32,
}

#[derive(Debug)]
pub struct OverlayCompositor {
    assets: OverlayAssets,
    jpeg_quality: u8,
}

impl OverlayCompositor {
    pub fn new(assets: OverlayAssets, jpeg_quality: u8) -> Self {
        Self {
            assets,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Composites and JPEG-encodes one overlay frame.
    pub fn render(
        &self,
        frame: &Frame,
        overlay: &OverlayText<'_>,
        canvas: CanvasSize,
    ) -> Result<Vec<u8>> {
        let image = self.compose(frame, overlay, canvas);
        encode_jpeg(&image, self.jpeg_quality)
    }

    /// Builds the overlay image at exactly `canvas` size.
    pub fn compose(
        &self,
        frame: &Frame,
        overlay: &OverlayText<'_>,
        canvas: CanvasSize,
    ) -> RgbImage {
        let mut img = letterbox(frame, canvas);
        let (width, height) = (canvas.width, canvas.height);
        let style = style_for(overlay.kind);

        let banner_h = MIN_BANNER_HEIGHT
            .max((height as f32 * 0.24) as u32)
            .min(height);
        let banner = banner_h as f32;
        draw::fill_rect(&mut img, 0, 0, width as i32, banner_h as i32, BANNER_COLOR);

        let icon_size = ((banner * 0.5).min(width as f32 * 0.12) as u32).max(1);
        let icon_x = ICON_MARGIN;
        let icon_y = (banner * 0.08) as i32;
        match self.assets.icon(overlay.kind, icon_size) {
            Some(icon) => draw::paste_rgba(&mut img, &icon, icon_x, icon_y),
            None => draw::draw_builtin_icon(
                &mut img,
                overlay.kind,
                icon_x,
                icon_y,
                icon_size,
                style.accent,
            ),
        }

        let font = self.assets.font_for(overlay.kind);
        let (headline_scale, message_scale) = match overlay.kind {
            PostureKind::Good => (0.36, 0.18),
            PostureKind::Bad | PostureKind::Error => (0.34, 0.16),
        };
        let text_x = icon_x + icon_size as i32 + ICON_MARGIN;
        let text_width = (width as i32 - text_x - ICON_MARGIN / 2).max(1) as u32;

        let headline_px = font.fit_px(style.headline, banner * headline_scale, text_width);
        font.draw_outlined(
            &mut img,
            text_x,
            (banner * 0.02) as i32,
            headline_px,
            style.headline,
            style.accent,
        );

        self.draw_countdown(
            &mut img,
            text_x,
            (banner * 0.36) as i32,
            banner * 0.18,
            overlay.countdown_secs,
        );

        let lines = wrap_message(overlay.message, MESSAGE_MAX_CHARS, MESSAGE_MAX_LINES);
        if let Some(longest) = lines.iter().max_by_key(|line| line.chars().count()) {
            let px = font.fit_px(longest, banner * message_scale, text_width);
            let line_height = font.measure(longest, px).1 as i32;
            let mut y = (banner * 0.58) as i32;
            for line in &lines {
                font.draw(&mut img, text_x, y, px, line, MESSAGE_COLOR);
                y += line_height;
            }
        }

        if !overlay.raw_output.trim().is_empty() {
            self.draw_footer(&mut img, overlay.raw_output);
        }

        img
    }

    fn draw_countdown(&self, img: &mut RgbImage, x: i32, y: i32, px: f32, secs: f32) {
        let font = self.assets.label_font();
        let label = format_countdown(secs);
        let (w, h) = font.measure(&label, px);
        let padding = 8;
        draw::fill_rounded_rect(
            img,
            x - padding,
            y - padding / 2,
            x + w as i32 + padding,
            y + h as i32 + padding / 2,
            8,
            PILL_COLOR,
        );
        font.draw(img, x, y, px, &label, COUNTDOWN_COLOR);
    }

    fn draw_footer(&self, img: &mut RgbImage, raw_output: &str) {
        let font = self.assets.label_font();
        let collapsed = raw_output.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = format!("model: {}", truncate_chars(&collapsed, RAW_OUTPUT_MAX_CHARS));
        let max_width = img.width().saturating_sub(16).max(1);
        let px = font.fit_px(&text, (img.height() as f32 * 0.035).max(12.0), max_width);
        let (_, h) = font.measure(&text, px);
        let top = img.height() as i32 - h as i32 - 8;
        draw::fill_rect(img, 0, top - 4, img.width() as i32, img.height() as i32, BANNER_COLOR);
        font.draw(img, 8, top, px, &text, FOOTER_COLOR);
    }
}

/// Scales `frame` down (never up) to fit `canvas`, centered on black.
fn letterbox(frame: &Frame, canvas: CanvasSize) -> RgbImage {
    let mut img = RgbImage::from_pixel(canvas.width, canvas.height, Rgb([0, 0, 0]));
    if !frame.is_well_formed() {
        log::debug!(
            "skipping malformed frame {}x{} with {} bytes",
            frame.width,
            frame.height,
            frame.rgba.len()
        );
        return img;
    }

    let scale = (canvas.width as f32 / frame.width as f32)
        .min(canvas.height as f32 / frame.height as f32)
        .min(1.0);
    let new_w = ((frame.width as f32 * scale).round() as u32).clamp(1, canvas.width);
    let new_h = ((frame.height as f32 * scale).round() as u32).clamp(1, canvas.height);

    let resized;
    let pixels: &[u8] = if (new_w, new_h) == (frame.width, frame.height) {
        &frame.rgba
    } else {
        match resize_rgba(frame, new_w, new_h) {
            Ok(buf) => {
                resized = buf;
                &resized
            }
            Err(err) => {
                log::warn!("frame resize failed: {err:?}");
                return img;
            }
        }
    };

    let pad_x = ((canvas.width - new_w) / 2) as usize;
    let pad_y = ((canvas.height - new_h) / 2) as usize;
    let dst_stride = canvas.width as usize * 3;
    let src_stride = new_w as usize * 4;
    let buffer: &mut [u8] = &mut img;
    buffer
        .par_chunks_mut(dst_stride)
        .enumerate()
        .skip(pad_y)
        .take(new_h as usize)
        .for_each(|(row, dst)| {
            let src = &pixels[(row - pad_y) * src_stride..(row - pad_y + 1) * src_stride];
            let dst = &mut dst[pad_x * 3..(pad_x + new_w as usize) * 3];
            for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                d.copy_from_slice(&s[..3]);
            }
        });
    img
}

fn resize_rgba(frame: &Frame, new_w: u32, new_h: u32) -> Result<Vec<u8>> {
    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(dst_image.into_vec())
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .context("failed to encode overlay frame as JPEG")?;
    Ok(buf)
}

pub fn format_countdown(secs: f32) -> String {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    format!("{secs:.1}s")
}

/// Word-wraps `message` to at most `max_lines` lines of `max_chars`.
/// Short messages stay on one line; words longer than a line are split.
pub fn wrap_message(message: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let words: Vec<&str> = message.split_whitespace().collect();
    if words.is_empty() || max_lines == 0 || max_chars == 0 {
        return Vec::new();
    }
    let joined = words.join(" ");
    if joined.chars().count() <= max_chars {
        return vec![joined];
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in words {
        let mut word: String = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            lines.push(head);
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
        if lines.len() >= max_lines {
            break;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.truncate(max_lines);
    lines
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;

    const CANVAS: CanvasSize = CanvasSize::new(600, 600);

    fn overlay(kind: PostureKind, message: &str) -> OverlayText<'_> {
        OverlayText {
            kind,
            message,
            raw_output: "",
            countdown_secs: 1.5,
        }
    }

    fn compositor() -> OverlayCompositor {
        OverlayCompositor::new(OverlayAssets::builtin(), 80)
    }

    fn count(img: &RgbImage, color: Rgb<u8>) -> usize {
        img.pixels().filter(|px| **px == color).count()
    }

    #[test]
    fn output_always_has_canvas_dimensions() {
        let compositor = compositor();
        let frames = [
            Frame::solid(1280, 720, [90, 90, 90]),
            Frame::solid(64, 48, [90, 90, 90]),
            Frame::solid(300, 1200, [90, 90, 90]),
            Frame::new(vec![1, 2, 3], 640, 480),
        ];
        for kind in [PostureKind::Good, PostureKind::Bad, PostureKind::Error] {
            for frame in &frames {
                let img = compositor.compose(frame, &overlay(kind, "sit up"), CANVAS);
                assert_eq!(img.dimensions(), (600, 600));

                let jpeg = compositor
                    .render(frame, &overlay(kind, "sit up"), CANVAS)
                    .unwrap();
                let decoded = image::load_from_memory(&jpeg).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (600, 600));
            }
        }
    }

    #[test]
    fn tiny_canvas_does_not_panic() {
        let img = compositor().compose(
            &Frame::solid(640, 480, [10, 10, 10]),
            &OverlayText {
                kind: PostureKind::Bad,
                message: "a message that is quite a bit longer than forty-five characters",
                raw_output: "Yes",
                countdown_secs: 3.0,
            },
            CanvasSize::new(20, 10),
        );
        assert_eq!(img.dimensions(), (20, 10));
    }

    #[test]
    fn kind_selects_accent_and_headline() {
        assert_eq!(style_for(PostureKind::Good).headline, "GOOD POSTURE");
        assert_eq!(style_for(PostureKind::Bad).headline, "BAD POSTURE");
        assert_eq!(style_for(PostureKind::Error).headline, "MODEL ERROR");
        assert_eq!(
            style_for(PostureKind::from_label("confused")),
            style_for(PostureKind::Error)
        );

        let compositor = compositor();
        let frame = Frame::solid(320, 240, [90, 90, 90]);
        for kind in [PostureKind::Good, PostureKind::Bad, PostureKind::Error] {
            let img = compositor.compose(&frame, &overlay(kind, "hello"), CANVAS);
            for other in [PostureKind::Good, PostureKind::Bad, PostureKind::Error] {
                let accent = style_for(other).accent;
                if other == kind {
                    assert!(count(&img, accent) > 0, "{kind:?} missing its accent");
                } else {
                    assert_eq!(count(&img, accent), 0, "{kind:?} drew {other:?} accent");
                }
            }
        }
    }

    #[test]
    fn compose_is_deterministic() {
        let compositor = compositor();
        let frame = Frame::solid(640, 480, [12, 34, 56]);
        let text = OverlayText {
            kind: PostureKind::Bad,
            message: "slouch",
            raw_output: "Yes",
            countdown_secs: 2.25,
        };
        let a = compositor.render(&frame, &text, CANVAS).unwrap();
        let b = compositor.render(&frame, &text, CANVAS).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn frames_are_scaled_down_and_centered() {
        let frame = Frame::solid(1200, 600, [200, 10, 10]);
        let img = letterbox(&frame, CANVAS);
        // 1200x600 -> 600x300, padded by 150 rows above and below.
        assert_eq!(*img.get_pixel(300, 149), Rgb([0, 0, 0]));
        let center = img.get_pixel(300, 300);
        assert!(center[0] > 190 && center[1] < 20, "unexpected center {center:?}");
        assert_eq!(*img.get_pixel(300, 451), Rgb([0, 0, 0]));
    }

    #[test]
    fn small_frames_are_never_upscaled() {
        let frame = Frame::solid(100, 50, [5, 200, 5]);
        let img = letterbox(&frame, CANVAS);
        let lit = count(&img, Rgb([5, 200, 5]));
        assert_eq!(lit, 100 * 50);
        assert_eq!(*img.get_pixel(250, 275), Rgb([5, 200, 5]));
        assert_eq!(*img.get_pixel(249, 275), Rgb([0, 0, 0]));
    }

    #[test]
    fn icon_images_replace_builtin_icons() {
        let dir = tempfile::tempdir().unwrap();
        let settings = crate::config::AssetSettings {
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 250, 255]))
            .save(settings.path(&settings.good_icon))
            .unwrap();
        let compositor = OverlayCompositor::new(OverlayAssets::load(&settings), 80);
        let img = compositor.compose(
            &Frame::solid(64, 64, [0, 0, 0]),
            &overlay(PostureKind::Good, ""),
            CANVAS,
        );
        let px = img.get_pixel(20, 20);
        assert!(px[2] > 240 && px[0] < 10, "icon pixel {px:?}");
    }

    #[test]
    fn countdown_label_is_never_negative() {
        assert_eq!(format_countdown(-3.0), "0.0s");
        assert_eq!(format_countdown(f32::NAN), "0.0s");
        assert_eq!(format_countdown(0.0), "0.0s");
        assert_eq!(format_countdown(12.34), "12.3s");
    }

    #[test]
    fn empty_message_has_no_lines() {
        assert!(wrap_message("", 45, 2).is_empty());
        assert!(wrap_message("   \n ", 45, 2).is_empty());
        let img = compositor().compose(
            &Frame::solid(64, 64, [0, 0, 0]),
            &overlay(PostureKind::Good, ""),
            CANVAS,
        );
        assert_eq!(img.dimensions(), (600, 600));
    }

    #[test]
    fn long_messages_wrap_to_two_lines() {
        let message = "keep your shoulders back and your head level with the screen please";
        let ninety: String = message.chars().cycle().take(90).collect();
        assert_eq!(ninety.chars().count(), 90);

        let lines = wrap_message(&ninety, MESSAGE_MAX_CHARS, MESSAGE_MAX_LINES);
        assert!(!lines.is_empty() && lines.len() <= 2);
        assert!(lines.iter().all(|l| l.chars().count() <= MESSAGE_MAX_CHARS));

        let many = "word ".repeat(100);
        let lines = wrap_message(&many, MESSAGE_MAX_CHARS, MESSAGE_MAX_LINES);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn short_messages_stay_on_one_line() {
        assert_eq!(wrap_message("  sit   up ", 45, 2), vec!["sit up".to_string()]);
    }

    #[test]
    fn overlong_words_are_split() {
        let word = "x".repeat(100);
        let lines = wrap_message(&word, 45, 2);
        assert_eq!(lines, vec!["x".repeat(45), "x".repeat(45)]);
    }
}
