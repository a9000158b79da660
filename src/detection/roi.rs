use image::{GrayImage, Luma, RgbaImage};
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::BTreeMap;

use crate::config::DetectionConfig;
use crate::detection::compositor::{BlendMode, compose};
use crate::loader::RasterImage;
use crate::models::{AffineAlignment, Rect};

const CHANGED: Luma<u8> = Luma([255u8]);

/// Regions of interest plus the difference buffer they were derived from
pub struct DetectionOutput {
    pub rois: Vec<Rect>,
    pub difference: RasterImage,
    pub changed_cells: usize,
}

/// Find candidate change rectangles between the two drawings.
///
/// An empty result means "no differences", not a failure.
pub fn detect_rois(
    before: &RasterImage,
    after: &RasterImage,
    alignment: &AffineAlignment,
    sensitivity: u8,
    merge_distance: u32,
    config: &DetectionConfig,
) -> Vec<Rect> {
    detect(before, after, alignment, sensitivity, merge_distance, config).rois
}

/// Same as [`detect_rois`] but keeps the intermediate difference buffer
pub fn detect(
    before: &RasterImage,
    after: &RasterImage,
    alignment: &AffineAlignment,
    sensitivity: u8,
    merge_distance: u32,
    config: &DetectionConfig,
) -> DetectionOutput {
    let (width, height) = before.dimensions();
    let difference = compose(before, after, alignment, BlendMode::Difference);

    let threshold = config.threshold(sensitivity);
    let grid = change_grid(difference.pixels(), config.cell_size, config.sample_stride, threshold);
    let changed_cells = grid.pixels().filter(|p| p[0] > 0).count();

    let clusters = cluster_cells(&grid, config.cell_size, width, height);
    let cluster_count = clusters.len();
    let merged = merge_rects(clusters, merge_distance);

    let rois: Vec<Rect> = merged
        .iter()
        .map(|r| r.pad_clamped(config.roi_padding, width, height))
        .filter(|r| !r.is_empty())
        .collect();

    tracing::debug!(
        threshold,
        changed_cells,
        clusters = cluster_count,
        rois = rois.len(),
        "region detection finished"
    );

    DetectionOutput {
        rois,
        difference,
        changed_cells,
    }
}

/// One pixel per grid cell, set when any sampled pixel in the cell exceeds
/// `threshold` (mean of the RGB difference channels)
pub fn change_grid(difference: &RgbaImage, cell_size: u32, stride: u32, threshold: u32) -> GrayImage {
    let (width, height) = difference.dimensions();
    let cols = width.div_ceil(cell_size);
    let rows = height.div_ceil(cell_size);
    let mut grid = GrayImage::new(cols, rows);

    let limit = threshold * 3;
    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            let p = difference.get_pixel(x, y);
            let sum = p[0] as u32 + p[1] as u32 + p[2] as u32;
            if sum > limit {
                grid.put_pixel(x / cell_size, y / cell_size, CHANGED);
            }
        }
    }

    grid
}

/// Bounding rectangle (in pixels) of each 4-connected group of changed cells,
/// in raster order of each group's first cell
pub fn cluster_cells(grid: &GrayImage, cell_size: u32, width: u32, height: u32) -> Vec<Rect> {
    let labeled = connected_components(grid, Connectivity::Four, Luma([0u8]));

    let mut regions: BTreeMap<u32, (u32, u32, u32, u32)> = BTreeMap::new();
    for (gx, gy, label) in labeled.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }

        regions
            .entry(label)
            .and_modify(|(min_x, min_y, max_x, max_y)| {
                *min_x = (*min_x).min(gx);
                *min_y = (*min_y).min(gy);
                *max_x = (*max_x).max(gx);
                *max_y = (*max_y).max(gy);
            })
            .or_insert((gx, gy, gx, gy));
    }

    regions
        .into_values()
        .map(|(min_x, min_y, max_x, max_y)| {
            Rect::new(
                min_x * cell_size,
                min_y * cell_size,
                (max_x - min_x + 1) * cell_size,
                (max_y - min_y + 1) * cell_size,
            )
            .clamp_to(width, height)
        })
        .collect()
}

/// Repeatedly union any two rectangles within `merge_distance` of each other
/// until no pair qualifies. A single pass is not enough because a merged
/// rectangle can newly reach a third one.
pub fn merge_rects(mut rects: Vec<Rect>, merge_distance: u32) -> Vec<Rect> {
    let mut merged = true;
    while merged {
        merged = false;
        let mut i = 0;
        while i < rects.len() {
            let mut j = i + 1;
            while j < rects.len() {
                if rects[i].is_near(&rects[j], merge_distance) {
                    rects[i] = rects[i].union(&rects[j]);
                    rects.remove(j);
                    merged = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
    rects
}
