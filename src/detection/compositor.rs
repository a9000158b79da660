use image::{Rgba, RgbaImage};

use crate::loader::RasterImage;
use crate::models::{AffineAlignment, Rect};

/// Pixel combination rule used when drawing the overlay onto the base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Plain source-over
    Normal,
    /// Darkening blend used for the visual overlay
    Multiply,
    /// `|base - overlay|` per channel, used for change detection
    Difference,
}

impl BlendMode {
    /// Opacity only ever dims the visual overlay, never the diff math
    fn opacity(self, alignment: &AffineAlignment) -> f64 {
        match self {
            BlendMode::Multiply => alignment.opacity.clamp(0.0, 1.0),
            BlendMode::Normal | BlendMode::Difference => 1.0,
        }
    }

    fn combine(self, base: f64, overlay: f64) -> f64 {
        match self {
            BlendMode::Normal => overlay,
            BlendMode::Multiply => base * overlay / 255.0,
            BlendMode::Difference => (base - overlay).abs(),
        }
    }
}

/// The overlay-to-base mapping of an [`AffineAlignment`].
///
/// Applied in this order: translate by `(x, y)`, translate to the scaled
/// overlay center, rotate, scale, translate back. Rotation therefore pivots
/// on the overlay's own center instead of the canvas origin.
#[derive(Debug, Clone, Copy)]
pub struct OverlayTransform {
    tx: f64,
    ty: f64,
    cx: f64,
    cy: f64,
    cos: f64,
    sin: f64,
    scale: f64,
}

impl OverlayTransform {
    pub fn new(alignment: &AffineAlignment, overlay_width: u32, overlay_height: u32) -> Self {
        let scale = if alignment.scale.is_finite() && alignment.scale > 0.0 {
            alignment.scale
        } else {
            1.0
        };
        let theta = alignment.rotation.to_radians();
        Self {
            tx: alignment.x,
            ty: alignment.y,
            cx: overlay_width as f64 * scale / 2.0,
            cy: overlay_height as f64 * scale / 2.0,
            cos: theta.cos(),
            sin: theta.sin(),
            scale,
        }
    }

    /// Overlay coordinates to base coordinates
    pub fn forward(&self, x: f64, y: f64) -> (f64, f64) {
        let sx = self.scale * (x - self.cx);
        let sy = self.scale * (y - self.cy);
        let rx = sx * self.cos - sy * self.sin;
        let ry = sx * self.sin + sy * self.cos;
        (self.tx + self.cx + rx, self.ty + self.cy + ry)
    }

    /// Base coordinates to overlay coordinates
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.tx - self.cx;
        let dy = y - self.ty - self.cy;
        let ux = dx * self.cos + dy * self.sin;
        let uy = -dx * self.sin + dy * self.cos;
        (self.cx + ux / self.scale, self.cy + uy / self.scale)
    }

    /// Axis-aligned bounds of the transformed overlay in base coordinates
    fn footprint(&self, width: u32, height: u32) -> (f64, f64, f64, f64) {
        let (w, h) = (width as f64, height as f64);
        let corners = [self.forward(0.0, 0.0), self.forward(w, 0.0), self.forward(0.0, h), self.forward(w, h)];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

/// Draw `overlay` onto a copy of `base` using the alignment and blend rule.
/// The result has the base image's dimensions.
pub fn compose(base: &RasterImage, overlay: &RasterImage, alignment: &AffineAlignment, mode: BlendMode) -> RasterImage {
    let mut surface = base.pixels().clone();
    draw_overlay(&mut surface, (0, 0), overlay.pixels(), alignment, mode);
    RasterImage::new(surface)
}

/// Render the aligned overlay into a `region`-sized surface whose origin is the
/// region's top-left corner. Uncovered pixels keep `background`.
pub fn render_aligned(overlay: &RasterImage, alignment: &AffineAlignment, region: Rect, background: Rgba<u8>) -> RgbaImage {
    let mut surface = RgbaImage::from_pixel(region.width, region.height, background);
    draw_overlay(&mut surface, (region.x, region.y), overlay.pixels(), alignment, BlendMode::Normal);
    surface
}

/// Blend the transformed overlay into `surface`, where surface pixel `(0, 0)`
/// sits at base coordinate `origin`
pub fn draw_overlay(
    surface: &mut RgbaImage,
    origin: (u32, u32),
    overlay: &RgbaImage,
    alignment: &AffineAlignment,
    mode: BlendMode,
) {
    let (ow, oh) = overlay.dimensions();
    if ow == 0 || oh == 0 || surface.width() == 0 || surface.height() == 0 {
        return;
    }

    let transform = OverlayTransform::new(alignment, ow, oh);
    let opacity = mode.opacity(alignment);
    if opacity <= 0.0 {
        return;
    }

    // Restrict the scan to where the overlay can land
    let (ox, oy) = (origin.0 as f64, origin.1 as f64);
    let (fx0, fy0, fx1, fy1) = transform.footprint(ow, oh);
    let Some((u0, u1)) = span(fx0 - ox, fx1 - ox, surface.width()) else {
        return;
    };
    let Some((v0, v1)) = span(fy0 - oy, fy1 - oy, surface.height()) else {
        return;
    };

    for v in v0..v1 {
        for u in u0..u1 {
            let (px, py) = transform.inverse(ox + u as f64 + 0.5, oy + v as f64 + 0.5);
            let Some(sample) = sample_bilinear(overlay, px, py) else {
                continue;
            };

            let alpha = sample[3] / 255.0 * opacity;
            if alpha <= 0.0 {
                continue;
            }

            let dst = surface.get_pixel_mut(u, v);
            for c in 0..3 {
                let base = dst[c] as f64;
                let blended = mode.combine(base, sample[c]);
                dst[c] = (base * (1.0 - alpha) + blended * alpha).round().clamp(0.0, 255.0) as u8;
            }
            if mode == BlendMode::Normal {
                let base_alpha = dst[3] as f64;
                dst[3] = (base_alpha + (255.0 - base_alpha) * alpha).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Integer pixel range `[start, end)` covering the continuous span, clipped to `[0, limit)`
fn span(from: f64, to: f64, limit: u32) -> Option<(u32, u32)> {
    if !from.is_finite() || !to.is_finite() {
        return None;
    }
    let start = from.floor().max(0.0);
    let end = to.ceil().min(limit as f64);
    if start >= end {
        return None;
    }
    Some((start as u32, end as u32))
}

/// Bilinear sample at continuous coordinate `(x, y)`, `None` outside the image
fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Option<[f64; 4]> {
    let (w, h) = image.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f64 || y >= h as f64 {
        return None;
    }

    // Pixel centers sit at +0.5
    let sx = (x - 0.5).max(0.0);
    let sy = (y - 0.5).max(0.0);
    let x0 = (sx.floor() as u32).min(w - 1);
    let y0 = (sy.floor() as u32).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = sx - x0 as f64;
    let fy = sy - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0.0; 4];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
    Some(out)
}
