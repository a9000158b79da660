//! Cross-tile deduplication, reading-order sort and display identifiers.
//!
//! Overlapping tiles can report the same real change twice. Candidates are
//! accepted first-seen-wins: a later candidate whose box overlaps an accepted
//! one by more than the IoU threshold is dropped, never merged. Identifiers
//! are only assigned after the final sort, so identical input always yields
//! identical IDs no matter in which order tiles completed.

use crate::config::ConsolidationConfig;
use crate::models::{BoundingBox, ChangeCandidate, DiffItem};

/// Intersection over union; zero when the boxes do not overlap
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let intersection = a.intersection_area(b);
    if intersection <= 0.0 {
        return 0.0;
    }
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Drop candidates overlapping an earlier accepted candidate by more than `threshold`
pub fn deduplicate(candidates: Vec<ChangeCandidate>, threshold: f64) -> Vec<ChangeCandidate> {
    let mut accepted: Vec<ChangeCandidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let duplicate = accepted.iter().any(|existing| iou(&candidate.bbox, &existing.bbox) > threshold);
        if duplicate {
            tracing::trace!(title = %candidate.title, "dropping duplicate detection");
            continue;
        }
        accepted.push(candidate);
    }

    accepted
}

/// Sort into reading order: top to bottom, and left to right within a row.
///
/// Two detections share a row when their top edges lie within `row_tolerance`
/// pixels of each other. After a top-to-bottom sort each detection is moved
/// left past its same-row neighbours that sit further right, stopping at the
/// first one that is more than `row_tolerance` above it. Every adjacent pair
/// of the result is then either in one row with x ascending, or in different
/// rows with y ascending.
pub fn into_reading_order(mut items: Vec<ChangeCandidate>, row_tolerance: f64) -> Vec<ChangeCandidate> {
    items.sort_by(|a, b| a.bbox.y.total_cmp(&b.bbox.y).then(a.bbox.x.total_cmp(&b.bbox.x)));

    let mut ordered: Vec<ChangeCandidate> = Vec::with_capacity(items.len());
    for item in items {
        let mut pos = ordered.len();
        while pos > 0 {
            let prev = &ordered[pos - 1].bbox;
            if item.bbox.y - prev.y > row_tolerance || prev.x <= item.bbox.x {
                break;
            }
            pos -= 1;
        }
        ordered.insert(pos, item);
    }

    ordered
}

/// Format a sequence number as a display id, e.g. `#0007`
pub fn display_id(sequential_id: u32) -> String {
    format!("#{:04}", sequential_id)
}

/// Deduplicate, sort into reading order and number the detections
pub fn consolidate(candidates: Vec<ChangeCandidate>, config: &ConsolidationConfig) -> Vec<DiffItem> {
    let received = candidates.len();
    let unique = deduplicate(candidates, config.iou_threshold);
    let unique = into_reading_order(unique, config.row_tolerance);

    let items: Vec<DiffItem> = unique
        .into_iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let sequential_id = idx as u32 + 1;
            DiffItem {
                sequential_id,
                display_id: display_id(sequential_id),
                area_size: candidate.bbox.area(),
                bbox: candidate.bbox,
                change_kind: candidate.kind,
                category: candidate.category,
                title: candidate.title,
                description: candidate.description,
                moved_from: candidate.moved_from,
            }
        })
        .collect();

    tracing::debug!(received, kept = items.len(), "consolidated detections");
    items
}
