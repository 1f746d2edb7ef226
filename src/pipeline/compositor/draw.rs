use image::{Rgb, RgbImage, RgbaImage};

use crate::types::PostureKind;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

pub fn put_pixel_safe(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= img.width() || uy >= img.height() {
        return;
    }
    img.put_pixel(ux, uy, color);
}

/// Mixes `color` over the existing pixel with the given coverage in `0..=1`.
pub fn blend_pixel(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, coverage: f32) {
    if x < 0 || y < 0 || (x as u32) >= img.width() || (y as u32) >= img.height() {
        return;
    }
    let coverage = coverage.clamp(0.0, 1.0);
    if coverage >= 1.0 {
        img.put_pixel(x as u32, y as u32, color);
        return;
    }
    if coverage <= 0.0 {
        return;
    }
    let dst = img.get_pixel_mut(x as u32, y as u32);
    for (d, s) in dst.0.iter_mut().zip(color.0) {
        *d = (*d as f32 * (1.0 - coverage) + s as f32 * coverage).round() as u8;
    }
}

pub fn fill_rect(img: &mut RgbImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(img.width() as i32);
    let y1 = y1.min(img.height() as i32);
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

pub fn fill_rounded_rect(
    img: &mut RgbImage,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    radius: i32,
    color: Rgb<u8>,
) {
    let radius = radius.min((x1 - x0) / 2).min((y1 - y0) / 2).max(0);
    for y in y0..y1 {
        for x in x0..x1 {
            let cx = if x < x0 + radius {
                x0 + radius
            } else if x >= x1 - radius {
                x1 - radius - 1
            } else {
                x
            };
            let cy = if y < y0 + radius {
                y0 + radius
            } else if y >= y1 - radius {
                y1 - radius - 1
            } else {
                y
            };
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(img, x, y, color);
            }
        }
    }
}

pub fn draw_line(
    img: &mut RgbImage,
    p0: (f32, f32),
    p1: (f32, f32),
    color: Rgb<u8>,
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        put_pixel_safe(img, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    if ox.abs() + oy.abs() <= radius {
                        put_pixel_safe(img, x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn draw_circle(img: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_safe(img, cx + dx, cy + dy, color);
            }
        }
    }
}

pub fn fill_triangle(
    img: &mut RgbImage,
    a: (f32, f32),
    b: (f32, f32),
    c: (f32, f32),
    color: Rgb<u8>,
) {
    let edge = |p: (f32, f32), q: (f32, f32), r: (f32, f32)| {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    };
    let area = edge(a, b, c);
    if area == 0.0 {
        return;
    }
    let min_x = a.0.min(b.0).min(c.0).floor() as i32;
    let max_x = a.0.max(b.0).max(c.0).ceil() as i32;
    let min_y = a.1.min(b.1).min(c.1).floor() as i32;
    let max_y = a.1.max(b.1).max(c.1).ceil() as i32;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, p) / area;
            let w1 = edge(c, a, p) / area;
            let w2 = edge(a, b, p) / area;
            if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                put_pixel_safe(img, x, y, color);
            }
        }
    }
}

/// Alpha-composites an RGBA icon onto the canvas with its top-left at `(x, y)`.
pub fn paste_rgba(img: &mut RgbImage, icon: &RgbaImage, x: i32, y: i32) {
    for (ix, iy, px) in icon.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        blend_pixel(
            img,
            x + ix as i32,
            y + iy as i32,
            Rgb([r, g, b]),
            a as f32 / 255.0,
        );
    }
}

/// Vector icon used when no icon image is available for `kind`.
pub fn draw_builtin_icon(
    img: &mut RgbImage,
    kind: PostureKind,
    x: i32,
    y: i32,
    size: u32,
    accent: Rgb<u8>,
) {
    let s = size as f32;
    let at = |fx: f32, fy: f32| (x as f32 + fx * s, y as f32 + fy * s);
    let stroke = ((size / 10) as i32).max(1);

    match kind {
        PostureKind::Good => {
            let radius = (size / 2) as i32;
            draw_circle(img, (x + radius, y + radius), radius, accent);
            draw_line(img, at(0.28, 0.52), at(0.44, 0.68), WHITE, stroke);
            draw_line(img, at(0.44, 0.68), at(0.74, 0.34), WHITE, stroke);
        }
        PostureKind::Bad => {
            let radius = (size / 2) as i32;
            draw_circle(img, (x + radius, y + radius), radius, accent);
            draw_line(img, at(0.32, 0.32), at(0.68, 0.68), WHITE, stroke);
            draw_line(img, at(0.68, 0.32), at(0.32, 0.68), WHITE, stroke);
        }
        PostureKind::Error => {
            fill_triangle(img, at(0.5, 0.06), at(0.96, 0.92), at(0.04, 0.92), accent);
            draw_line(img, at(0.5, 0.34), at(0.5, 0.62), BLACK, stroke);
            let (dot_x, dot_y) = at(0.5, 0.78);
            draw_circle(
                img,
                (dot_x as i32, dot_y as i32),
                ((size / 16) as i32).max(1),
                BLACK,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(img: &RgbImage, color: Rgb<u8>) -> usize {
        img.pixels().filter(|px| **px == color).count()
    }

    #[test]
    fn drawing_clips_at_the_edges() {
        let mut img = RgbImage::new(10, 10);
        draw_circle(&mut img, (0, 0), 4, WHITE);
        draw_line(&mut img, (-20.0, 5.0), (30.0, 5.0), WHITE, 3);
        fill_rect(&mut img, -5, -5, 50, 2, WHITE);
        assert!(count(&img, WHITE) > 0);
    }

    #[test]
    fn triangle_fills_its_interior_only() {
        let mut img = RgbImage::new(20, 20);
        let red = Rgb([255, 0, 0]);
        fill_triangle(&mut img, (10.0, 0.0), (20.0, 20.0), (0.0, 20.0), red);
        assert_eq!(*img.get_pixel(10, 15), red);
        assert_eq!(*img.get_pixel(1, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn builtin_icons_use_the_accent_color() {
        for kind in [PostureKind::Good, PostureKind::Bad, PostureKind::Error] {
            let mut img = RgbImage::new(64, 64);
            let accent = Rgb([12, 200, 34]);
            draw_builtin_icon(&mut img, kind, 0, 0, 64, accent);
            assert!(count(&img, accent) > 100, "{kind:?} icon missing accent fill");
        }
    }

    #[test]
    fn blend_respects_coverage() {
        let mut img = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        blend_pixel(&mut img, 0, 0, Rgb([200, 100, 50]), 0.5);
        assert_eq!(*img.get_pixel(0, 0), Rgb([100, 50, 25]));
    }
}
