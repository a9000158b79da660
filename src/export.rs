//! Annotated composite image and JSON report for a finished analysis.
//!
//! Everything here replays a finished [`AnalysisResult`] over the source
//! images; nothing is re-detected.

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as DrawRect;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::detection::compositor::{BlendMode, compose};
use crate::error::ExportError;
use crate::loader::RasterImage;
use crate::models::{AffineAlignment, AnalysisResult, ChangeKind, DiffItem};

const ADDED_COLOR: Rgba<u8> = Rgba([0x22, 0xC5, 0x5E, 255]);
const REMOVED_COLOR: Rgba<u8> = Rgba([0xEF, 0x44, 0x44, 255]);
const MODIFIED_COLOR: Rgba<u8> = Rgba([0xEA, 0xB3, 0x08, 255]);
const MOVED_COLOR: Rgba<u8> = Rgba([0x3B, 0x82, 0xF6, 255]);
const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Drawing options for [`render_composite`]
pub struct ExportStyle {
    /// Label font. Without one, label tabs are drawn but left blank.
    pub font: Option<FontVec>,
    pub font_size: f32,
    pub line_width: u32,
    pub label_padding: u32,
}

impl Default for ExportStyle {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 24.0,
            line_width: 3,
            label_padding: 6,
        }
    }
}

impl ExportStyle {
    pub fn with_font_path(path: &Path) -> Result<Self, ExportError> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data).map_err(|_| ExportError::Font {
            path: path.display().to_string(),
        })?;
        Ok(Self {
            font: Some(font),
            ..Self::default()
        })
    }

    /// Use the first common system font that loads, if any
    pub fn with_system_font() -> Self {
        for path in SYSTEM_FONTS {
            if let Ok(style) = Self::with_font_path(Path::new(path)) {
                tracing::debug!(path, "loaded label font");
                return style;
            }
        }
        tracing::debug!("no system font found, labels will be blank");
        Self::default()
    }
}

pub fn kind_color(kind: ChangeKind) -> Rgba<u8> {
    match kind {
        ChangeKind::Added => ADDED_COLOR,
        ChangeKind::Removed => REMOVED_COLOR,
        ChangeKind::Modified => MODIFIED_COLOR,
        ChangeKind::Moved => MOVED_COLOR,
    }
}

/// The before drawing with the aligned after drawing multiplied over it at
/// `alignment.opacity`, plus one coloured, labelled box per item
pub fn render_composite(
    before: &RasterImage,
    after: &RasterImage,
    alignment: &AffineAlignment,
    items: &[DiffItem],
    style: &ExportStyle,
) -> RgbaImage {
    let mut canvas = compose(before, after, alignment, BlendMode::Multiply).into_pixels();
    let (width, height) = canvas.dimensions();

    for item in items {
        let color = kind_color(item.change_kind);
        let bbox = item.bbox.clamp_to(width, height);
        let x = bbox.x.floor() as i32;
        let y = bbox.y.floor() as i32;
        let w = bbox.width.round() as i32;
        let h = bbox.height.round() as i32;

        draw_outline(&mut canvas, x, y, w, h, style.line_width, color);

        if item.change_kind == ChangeKind::Moved
            && let Some(from) = item.moved_from
        {
            let center = item.bbox.center();
            for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
                draw_line_segment_mut(
                    &mut canvas,
                    ((from.x + dx) as f32, (from.y + dy) as f32),
                    ((center.x + dx) as f32, (center.y + dy) as f32),
                    color,
                );
            }
        }

        draw_label(&mut canvas, x, y, &item.display_id, color, style);
    }

    canvas
}

/// Stroke centred on the box edge, `line_width` pixels thick
fn draw_outline(canvas: &mut RgbaImage, x: i32, y: i32, w: i32, h: i32, line_width: u32, color: Rgba<u8>) {
    let half = line_width as i32 / 2;
    for step in 0..line_width as i32 {
        let inset = step - half;
        let (rw, rh) = (w - 2 * inset, h - 2 * inset);
        if rw <= 0 || rh <= 0 {
            continue;
        }
        let rect = DrawRect::at(x + inset, y + inset).of_size(rw as u32, rh as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Filled tab sitting on top of the box's upper-left corner
fn draw_label(canvas: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, style: &ExportStyle) {
    let scale = PxScale::from(style.font_size);
    let pad = style.label_padding;
    let text_h = style.font_size.ceil() as u32;
    let text_w = match &style.font {
        Some(font) => text_size(scale, font, text).0,
        // Roughly a bold sans-serif glyph width
        None => (style.font_size * 0.6 * text.chars().count() as f32).ceil() as u32,
    };

    let tab_w = text_w + pad * 2;
    let tab_h = text_h + pad * 2;
    let tab_y = y - tab_h as i32;
    draw_filled_rect_mut(canvas, DrawRect::at(x, tab_y).of_size(tab_w, tab_h), color);

    if let Some(font) = &style.font {
        draw_text_mut(canvas, LABEL_TEXT_COLOR, x + pad as i32, tab_y + pad as i32, scale, font, text);
    }
}

/// Render and write the composite as PNG
pub fn save_composite(
    path: &Path,
    before: &RasterImage,
    after: &RasterImage,
    alignment: &AffineAlignment,
    items: &[DiffItem],
    style: &ExportStyle,
) -> Result<(), ExportError> {
    let canvas = render_composite(before, after, alignment, items, style);
    canvas.save_with_format(path, image::ImageFormat::Png)?;
    tracing::info!(path = %path.display(), items = items.len(), "composite image written");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    generated_at: String,
    alignment: &'a AffineAlignment,
    total_tokens: u64,
    item_count: usize,
    items: &'a [DiffItem],
}

/// Write the finished result as a pretty-printed JSON report
pub fn write_report(path: &Path, result: &AnalysisResult, alignment: &AffineAlignment) -> Result<(), ExportError> {
    let report = Report {
        generated_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
        alignment,
        total_tokens: result.total_tokens,
        item_count: result.items.len(),
        items: &result.items,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush()?;
    tracing::info!(path = %path.display(), items = result.items.len(), "report written");
    Ok(())
}
