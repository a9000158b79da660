use crate::config::TilingConfig;
use crate::models::Rect;

/// Split oversized regions into overlapping tiles of at most `tile_size` per side.
///
/// Regions that already fit pass through unchanged. Larger ones are swept with
/// stride `tile_size - overlap`; consecutive tiles share exactly `overlap`
/// pixels and the last tile in each axis is clipped to the region. A config
/// that skipped validation never panics: an overlap not below `tile_size`
/// sweeps without overlap, and a zero `tile_size` passes regions through.
pub fn tile(rois: &[Rect], image_width: u32, image_height: u32, config: &TilingConfig) -> Vec<Rect> {
    let mut tiles = Vec::new();

    for roi in rois {
        let roi = roi.clamp_to(image_width, image_height);
        if roi.is_empty() {
            continue;
        }

        if config.tile_size == 0 || (roi.width <= config.tile_size && roi.height <= config.tile_size) {
            tiles.push(roi);
            continue;
        }

        let xs = axis_offsets(roi.width, config);
        let ys = axis_offsets(roi.height, config);
        for &(ty, th) in &ys {
            for &(tx, tw) in &xs {
                tiles.push(Rect::new(roi.x + tx, roi.y + ty, tw, th));
            }
        }
    }

    tiles
}

/// `(offset, length)` pairs covering `[0, length)` of one axis
fn axis_offsets(length: u32, config: &TilingConfig) -> Vec<(u32, u32)> {
    if length <= config.tile_size {
        return vec![(0, length)];
    }

    let stride = config.stride();
    let overlap = config.tile_size - stride.min(config.tile_size);
    let steps = (length - overlap).div_ceil(stride);
    (0..steps)
        .map(|i| {
            let offset = i * stride;
            (offset, config.tile_size.min(length - offset))
        })
        .collect()
}
