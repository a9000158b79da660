use serde::Deserialize;
use serde_json::Value;

use crate::error::AnnotationError;
use crate::models::{BoundingBox, ChangeCandidate, ChangeCategory, ChangeKind, Point, Rect};

/// One change as reported by the service, coordinates still normalized
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCandidate {
    pub title: String,
    /// Absent and `null` both read as empty
    #[serde(default)]
    pub description: Option<String>,
    pub category: ChangeCategory,
    #[serde(rename = "type", alias = "changeKind")]
    pub kind: ChangeKind,
    /// `[xmin, ymin, xmax, ymax]`
    pub box_2d: Vec<f64>,
    /// `[x, y]`
    #[serde(default)]
    pub moved_from: Option<Vec<f64>>,
}

impl RawCandidate {
    /// Map into global pixel space of the tile this answer belongs to
    pub fn into_candidate(self, tile: &Rect, range: f64) -> ChangeCandidate {
        let corners = match self.box_2d[..] {
            [x0, y0, x1, y1, ..] => [x0, y0, x1, y1],
            // parse_candidates never yields these
            _ => [0.0; 4],
        };
        let bbox = map_normalized_box(corners, tile, range);
        let moved_from = self
            .moved_from
            .filter(|p| p.len() >= 2 && p[0].is_finite() && p[1].is_finite())
            .map(|p| Point {
                x: tile.x as f64 + p[0].clamp(0.0, range) / range * tile.width as f64,
                y: tile.y as f64 + p[1].clamp(0.0, range) / range * tile.height as f64,
            });

        ChangeCandidate {
            title: self.title,
            description: self.description.unwrap_or_default(),
            category: self.category,
            kind: self.kind,
            bbox,
            moved_from,
        }
    }
}

/// Clamp a normalized `[xmin, ymin, xmax, ymax]` box to `[0, range]` and map it
/// into global pixels: `x = tile.x + xmin / range * tile.width`, same for y.
/// Inverted edges are swapped.
pub fn map_normalized_box(box_2d: [f64; 4], tile: &Rect, range: f64) -> BoundingBox {
    let [x0, y0, x1, y1] = box_2d.map(|v| v.clamp(0.0, range));
    let (xmin, xmax) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
    let (ymin, ymax) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };

    let tw = tile.width as f64;
    let th = tile.height as f64;
    BoundingBox::new(
        tile.x as f64 + xmin / range * tw,
        tile.y as f64 + ymin / range * th,
        (xmax - xmin) / range * tw,
        (ymax - ymin) / range * th,
    )
}

/// Parse the service's JSON answer.
///
/// The document must be a JSON array (optionally wrapped in a Markdown code
/// fence). Items that do not validate are skipped; a document that is not an
/// array at all is an error.
pub fn parse_candidates(text: &str) -> Result<Vec<RawCandidate>, AnnotationError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let document: Value = serde_json::from_str(body).map_err(|e| AnnotationError::MalformedOutput(e.to_string()))?;
    let Value::Array(entries) = document else {
        return Err(AnnotationError::MalformedOutput("expected a JSON array".to_string()));
    };

    let mut candidates = Vec::with_capacity(entries.len());
    for (idx, mut entry) in entries.into_iter().enumerate() {
        normalize_enum_case(&mut entry);
        match serde_json::from_value::<RawCandidate>(entry) {
            Ok(candidate) if has_valid_box(&candidate) => candidates.push(candidate),
            Ok(_) => tracing::debug!(index = idx, "skipping candidate with invalid box_2d"),
            Err(e) => tracing::debug!(index = idx, error = %e, "skipping unparsable candidate"),
        }
    }

    Ok(candidates)
}

fn has_valid_box(candidate: &RawCandidate) -> bool {
    candidate.box_2d.len() >= 4 && candidate.box_2d[..4].iter().all(|v| v.is_finite())
}

/// Models sometimes answer `"added"` where `"ADDED"` is expected
fn normalize_enum_case(entry: &mut Value) {
    let Value::Object(map) = entry else {
        return;
    };
    for key in ["category", "type", "changeKind"] {
        if let Some(Value::String(s)) = map.get_mut(key) {
            *s = s.trim().to_uppercase();
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening fence line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
