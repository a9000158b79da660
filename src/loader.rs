use image::{DynamicImage, ImageReader, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::AnalysisError;

/// Decoded RGBA raster. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pixels: RgbaImage,
}

impl RasterImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgba8())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

/// Where an input drawing comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    #[cfg(feature = "gemini")]
    Url(String),
    Decoded(DynamicImage),
}

impl ImageSource {
    fn describe(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bytes(bytes) => format!("{} bytes in memory", bytes.len()),
            #[cfg(feature = "gemini")]
            ImageSource::Url(url) => url.clone(),
            ImageSource::Decoded(img) => format!("decoded {}x{}", img.width(), img.height()),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        ImageSource::Decoded(image)
    }
}

/// Resolve a source into a decoded raster. Decoding runs on the blocking pool.
pub async fn load(source: ImageSource, name: &str) -> Result<RasterImage, AnalysisError> {
    let source_name = format!("{name} image ({})", source.describe());
    let load_err = |reason: String| AnalysisError::ImageLoad {
        source_name: source_name.clone(),
        reason,
    };

    let decoded = match source {
        ImageSource::Decoded(image) => image,
        ImageSource::Path(path) => tokio::task::spawn_blocking(move || decode_file(&path))
            .await?
            .map_err(load_err)?,
        ImageSource::Bytes(bytes) => tokio::task::spawn_blocking(move || decode_bytes(&bytes))
            .await?
            .map_err(load_err)?,
        #[cfg(feature = "gemini")]
        ImageSource::Url(url) => {
            let bytes = fetch_url(&url).await.map_err(load_err)?;
            tokio::task::spawn_blocking(move || decode_bytes(&bytes))
                .await?
                .map_err(load_err)?
        }
    };

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(AnalysisError::EmptyImage { source_name });
    }

    tracing::debug!(source = %source_name, width = decoded.width(), height = decoded.height(), "image loaded");
    Ok(RasterImage::from_dynamic(decoded))
}

/// Load the before/after pair concurrently
pub async fn load_pair(before: ImageSource, after: ImageSource) -> Result<(RasterImage, RasterImage), AnalysisError> {
    tokio::try_join!(load(before, "before"), load(after, "after"))
}

fn decode_file(path: &Path) -> Result<DynamicImage, String> {
    ImageReader::open(path)
        .map_err(|e| e.to_string())?
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| format!("Failed to decode image: {}", e))
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, String> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .decode()
        .map_err(|e| format!("Failed to decode image: {}", e))
}

#[cfg(feature = "gemini")]
async fn fetch_url(url: &str) -> Result<Vec<u8>, String> {
    let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status.as_u16()));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}
