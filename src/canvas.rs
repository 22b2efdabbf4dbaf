use image::{Rgba, RgbaImage};

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const PINK: Rgba<u8> = Rgba([255, 192, 203, 255]);
pub const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Subsamples per axis used to estimate edge coverage.
const SUPERSAMPLE: usize = 4;

/// Minimal 2D drawing surface over an RGBA buffer.
///
/// Every primitive reduces to filling a region described by an inside test,
/// with edge pixels blended by their supersampled coverage.
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, WHITE),
        }
    }

    pub fn from_image(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    pub fn fill(&mut self, colour: Rgba<u8>) {
        for pixel in self.pixels.pixels_mut() {
            *pixel = colour;
        }
    }

    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, colour: Rgba<u8>) {
        self.fill_region((x, y, x + w, y + h), colour, |px, py| {
            px >= x && px < x + w && py >= y && py < y + h
        });
    }

    /// Strokes the outline of a rectangle with the line centred on its edges.
    pub fn stroke_rect(
        &mut self,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        line_width: f32,
        colour: Rgba<u8>,
    ) {
        let half = line_width / 2.0;
        let (ox0, oy0, ox1, oy1) = (x - half, y - half, x + w + half, y + h + half);
        let (ix0, iy0, ix1, iy1) = (x + half, y + half, x + w - half, y + h - half);
        self.fill_region((ox0, oy0, ox1, oy1), colour, |px, py| {
            let outer = px >= ox0 && px < ox1 && py >= oy0 && py < oy1;
            let inner = px >= ix0 && px < ix1 && py >= iy0 && py < iy1;
            outer && !inner
        });
    }

    /// Fills the closed triangle through the three points.
    pub fn fill_triangle(&mut self, a: (f32, f32), b: (f32, f32), c: (f32, f32), colour: Rgba<u8>) {
        let bounds = (
            a.0.min(b.0).min(c.0),
            a.1.min(b.1).min(c.1),
            a.0.max(b.0).max(c.0),
            a.1.max(b.1).max(c.1),
        );
        let edge = |p: (f32, f32), q: (f32, f32), px: f32, py: f32| {
            (q.0 - p.0) * (py - p.1) - (q.1 - p.1) * (px - p.0)
        };
        self.fill_region(bounds, colour, |px, py| {
            let d0 = edge(a, b, px, py);
            let d1 = edge(b, c, px, py);
            let d2 = edge(c, a, px, py);
            let negative = d0 < 0.0 || d1 < 0.0 || d2 < 0.0;
            let positive = d0 > 0.0 || d1 > 0.0 || d2 > 0.0;
            !(negative && positive)
        });
    }

    pub fn fill_ellipse(&mut self, cx: f32, cy: f32, rx: f32, ry: f32, colour: Rgba<u8>) {
        if rx <= 0.0 || ry <= 0.0 {
            return;
        }
        self.fill_region((cx - rx, cy - ry, cx + rx, cy + ry), colour, |px, py| {
            let nx = (px - cx) / rx;
            let ny = (py - cy) / ry;
            nx * nx + ny * ny <= 1.0
        });
    }

    fn fill_region<F>(&mut self, bounds: (f32, f32, f32, f32), colour: Rgba<u8>, inside: F)
    where
        F: Fn(f32, f32) -> bool,
    {
        let (x0, y0, x1, y1) = bounds;
        let width = self.pixels.width() as f32;
        let height = self.pixels.height() as f32;
        let col_start = x0.floor().clamp(0.0, width) as u32;
        let col_end = x1.ceil().clamp(0.0, width) as u32;
        let row_start = y0.floor().clamp(0.0, height) as u32;
        let row_end = y1.ceil().clamp(0.0, height) as u32;

        let step = 1.0 / SUPERSAMPLE as f32;
        let total = (SUPERSAMPLE * SUPERSAMPLE) as f32;
        for row in row_start..row_end {
            for col in col_start..col_end {
                let mut hits = 0usize;
                for sy in 0..SUPERSAMPLE {
                    for sx in 0..SUPERSAMPLE {
                        let px = col as f32 + (sx as f32 + 0.5) * step;
                        let py = row as f32 + (sy as f32 + 0.5) * step;
                        if inside(px, py) {
                            hits += 1;
                        }
                    }
                }
                if hits > 0 {
                    let coverage = hits as f32 / total;
                    let pixel = self.pixels.get_pixel_mut(col, row);
                    *pixel = blend(*pixel, colour, coverage);
                }
            }
        }
    }
}

fn blend(under: Rgba<u8>, over: Rgba<u8>, coverage: f32) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for channel in 0..3 {
        let mixed = under.0[channel] as f32 * (1.0 - coverage) + over.0[channel] as f32 * coverage;
        out[channel] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = under.0[3].max((over.0[3] as f32 * coverage).round() as u8);
    Rgba(out)
}
