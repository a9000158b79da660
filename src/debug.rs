use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect as DrawRect;
use std::path::{Path, PathBuf};

use crate::error::AnalysisError;
use crate::loader::RasterImage;
use crate::models::Rect;

const ROI_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Writes intermediate pipeline artifacts to a directory for inspection
#[derive(Clone, Debug)]
pub struct DebugOutput {
    output_dir: PathBuf,
}

impl DebugOutput {
    /// The directory must be empty or non-existent
    pub fn new(output_dir: PathBuf) -> Result<Self, AnalysisError> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir).map_err(debug_err)?;
            if entries.count() > 0 {
                return Err(AnalysisError::Debug(format!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir).map_err(debug_err)?;
        }

        Ok(Self { output_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn save_difference(&self, difference: &RasterImage) -> Result<(), AnalysisError> {
        let path = self.output_dir.join("00_difference.png");
        difference.pixels().save(&path).map_err(debug_err)?;
        tracing::debug!(path = %path.display(), "saved difference buffer");
        Ok(())
    }

    /// The before image with every region of interest outlined
    pub fn save_rois(&self, before: &RasterImage, rois: &[Rect]) -> Result<(), AnalysisError> {
        let mut canvas = before.pixels().clone();
        for roi in rois.iter().filter(|r| !r.is_empty()) {
            outline(&mut canvas, roi, ROI_COLOR);
        }

        let path = self.output_dir.join("01_rois.png");
        canvas.save(&path).map_err(debug_err)?;
        tracing::debug!(path = %path.display(), rois = rois.len(), "saved region overlay");
        Ok(())
    }

    /// Encoded crops exactly as sent to the annotation service
    pub fn save_tile(&self, index: usize, before_jpeg: &[u8], after_jpeg: &[u8]) -> Result<(), AnalysisError> {
        let tile_dir = self.output_dir.join("02_tiles");
        std::fs::create_dir_all(&tile_dir).map_err(debug_err)?;
        std::fs::write(tile_dir.join(format!("{:02}_before.jpg", index + 1)), before_jpeg).map_err(debug_err)?;
        std::fs::write(tile_dir.join(format!("{:02}_after.jpg", index + 1)), after_jpeg).map_err(debug_err)?;
        Ok(())
    }
}

fn outline(canvas: &mut RgbaImage, rect: &Rect, color: Rgba<u8>) {
    for inset in 0..2u32 {
        if rect.width <= inset * 2 || rect.height <= inset * 2 {
            break;
        }
        let r = DrawRect::at((rect.x + inset) as i32, (rect.y + inset) as i32)
            .of_size(rect.width - inset * 2, rect.height - inset * 2);
        draw_hollow_rect_mut(canvas, r, color);
    }
}

fn debug_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Debug(e.to_string())
}
