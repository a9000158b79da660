use thiserror::Error;

/// Failure of a whole analysis run. Per-tile annotation failures never show up here.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// User-initiated stop. Not a failure.
    #[error("analysis cancelled")]
    Cancelled,

    #[error("failed to load {source_name}: {reason}")]
    ImageLoad { source_name: String, reason: String },

    #[error("{source_name} has no pixels")]
    EmptyImage { source_name: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("debug output failed: {0}")]
    Debug(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AnalysisError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Cancelled)
    }
}

/// Failure of a single call to the annotation service
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("cannot connect to annotation service at {0}")]
    Connection(String),

    #[error("annotation request timed out after {0}s")]
    Timeout(u64),

    #[error("annotation service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("annotation service response could not be parsed: {0}")]
    ResponseParsing(String),

    #[error("malformed annotation output: {0}")]
    MalformedOutput(String),

    #[error("no API key configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    #[error("failed to encode tile crop: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure while writing the composite image or the JSON report
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("failed to load font {path}")]
    Font { path: String },
}
