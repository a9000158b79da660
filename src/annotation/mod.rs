//! Semantic labeling of tile crops by an external multimodal model.
//!
//! The pipeline only depends on the [`Annotator`] capability: given the
//! "before" and aligned "after" crops of one tile and the analysis mode, return
//! the model's raw JSON answer and its token usage. Parsing, coordinate mapping
//! and failure handling live in [`orchestrator`] so every backend is treated
//! the same way.

#[cfg(feature = "gemini")]
pub mod gemini;
pub mod orchestrator;
pub mod parse;
pub mod prompt;

use std::sync::Arc;

use crate::error::AnnotationError;
use crate::models::{AnalysisMode, Rect};

#[cfg(feature = "gemini")]
pub use gemini::GeminiAnnotator;
pub use orchestrator::{TileAnnotations, annotate_tiles};
pub use parse::{RawCandidate, map_normalized_box, parse_candidates};

/// An encoded image crop sent to the service
#[derive(Debug, Clone)]
pub struct EncodedCrop {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Everything the service gets to see for one tile
#[derive(Debug, Clone)]
pub struct AnnotationRequest {
    pub tile_index: usize,
    /// Tile rectangle in "before"-image space
    pub tile: Rect,
    pub mode: AnalysisMode,
    pub before: EncodedCrop,
    pub after: EncodedCrop,
}

/// Raw answer for one tile
#[derive(Debug, Clone, Default)]
pub struct AnnotationResponse {
    /// JSON array of change candidates with `box_2d` in normalized space
    pub raw_text: String,
    /// `None` when the service omitted usage; counted as zero
    pub tokens_used: Option<u64>,
}

/// External labeling capability.
///
/// Backends are shared by every tile of a batch and the returned future must
/// be `Send`, so a whole analysis can run on a spawned task.
pub trait Annotator: Send + Sync {
    fn annotate(
        &self,
        request: &AnnotationRequest,
    ) -> impl Future<Output = Result<AnnotationResponse, AnnotationError>> + Send;
}

impl<T: Annotator> Annotator for Arc<T> {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> {
        self.as_ref().annotate(request).await
    }
}

impl<T: Annotator> Annotator for &T {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<AnnotationResponse, AnnotationError> {
        (**self).annotate(request).await
    }
}
