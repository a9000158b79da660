pub mod annotation;
pub mod cancel;
pub mod config;
pub mod consolidate;
pub mod debug;
pub mod detection;
pub mod error;
pub mod export;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod progress;

pub use annotation::{AnnotationRequest, AnnotationResponse, Annotator, EncodedCrop};
#[cfg(feature = "gemini")]
pub use annotation::GeminiAnnotator;
pub use cancel::CancelSignal;
pub use config::AnalysisConfig;
pub use error::{AnalysisError, AnnotationError, ConfigError, ExportError};
pub use loader::{ImageSource, RasterImage};
pub use models::{
    AffineAlignment, AnalysisMode, AnalysisResult, BoundingBox, ChangeCandidate, ChangeCategory, ChangeKind, DiffItem,
    Point, Rect,
};
pub use pipeline::{AnalysisRequest, Pipeline};
pub use progress::{Progress, ProgressSink};
