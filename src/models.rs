use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer pixel rectangle in "before"-image space (ROIs and tiles)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// True when the rectangles overlap or lie within `distance` pixels of each other
    pub fn is_near(&self, other: &Rect, distance: u32) -> bool {
        let d = distance as i64;
        let (ax, ay, ar, ab) = (self.x as i64, self.y as i64, self.right() as i64, self.bottom() as i64);
        let (bx, by, br, bb) = (other.x as i64, other.y as i64, other.right() as i64, other.bottom() as i64);

        !(bx > ar + d || br + d < ax || by > ab + d || bb + d < ay)
    }

    /// Grow by `padding` on every side, then clamp to `[0, width] x [0, height]`
    pub fn pad_clamped(&self, padding: u32, width: u32, height: u32) -> Rect {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = self.right().saturating_add(padding);
        let bottom = self.bottom().saturating_add(padding);
        Rect::new(x, y, right - x, bottom - y).clamp_to(width, height)
    }

    /// Clip to image bounds
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.right().min(width);
        let bottom = self.bottom().min(height);
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Detection box in global pixel space. Fractional because it is mapped back
/// from the annotation service's normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Area of the overlap, zero when the boxes only touch or are disjoint
    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x1 < x2 && y1 < y2 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    /// Clip to image bounds
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f64, height as f64);
        let x = self.x.clamp(0.0, w);
        let y = self.y.clamp(0.0, h);
        let right = self.right().clamp(0.0, w);
        let bottom = self.bottom().clamp(0.0, h);
        BoundingBox::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }
}

impl From<Rect> for BoundingBox {
    fn from(r: Rect) -> Self {
        BoundingBox::new(r.x as f64, r.y as f64, r.width as f64, r.height as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// User-supplied registration of the "after" drawing onto the "before" drawing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffineAlignment {
    /// Translation in pixels
    pub x: f64,
    pub y: f64,
    /// Uniform scale factor
    pub scale: f64,
    /// Degrees, about the overlay's own center
    pub rotation: f64,
    /// Only used for visual composition, never for diffing
    pub opacity: f64,
}

impl AffineAlignment {
    pub fn is_identity(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.scale == 1.0 && self.rotation == 0.0
    }
}

impl Default for AffineAlignment {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            rotation: 0.0,
            opacity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisMode {
    /// Overview: rooms, walls, structural changes
    Macro,
    /// Detail: wiring, piping, equipment symbols
    Micro,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Macro => write!(f, "MACRO"),
            AnalysisMode::Micro => write!(f, "MICRO"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeCategory {
    Wiring,
    Equipment,
    Area,
    Text,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeCategory::Wiring => "WIRING",
            ChangeCategory::Equipment => "EQUIPMENT",
            ChangeCategory::Area => "AREA",
            ChangeCategory::Text => "TEXT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Moved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Removed => "REMOVED",
            ChangeKind::Modified => "MODIFIED",
            ChangeKind::Moved => "MOVED",
        };
        f.write_str(s)
    }
}

/// One labeled change reported for a single tile, already in global pixel space
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCandidate {
    pub title: String,
    pub description: String,
    pub category: ChangeCategory,
    pub kind: ChangeKind,
    pub bbox: BoundingBox,
    pub moved_from: Option<Point>,
}

/// A finalized, deduplicated change with its display identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffItem {
    pub sequential_id: u32,
    pub display_id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub area_size: f64,
    pub change_kind: ChangeKind,
    pub category: ChangeCategory,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_from: Option<Point>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub items: Vec<DiffItem>,
    pub total_tokens: u64,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
