pub mod compositor;
pub mod roi;
pub mod tiler;

pub use compositor::{BlendMode, OverlayTransform, compose, render_aligned};
pub use roi::{DetectionOutput, detect, detect_rois, merge_rects};
pub use tiler::tile;
