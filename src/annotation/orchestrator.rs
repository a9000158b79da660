//! Fan tile requests out to the annotation service in bounded batches.
//!
//! Batches run strictly one after another and are merged in tile order, so the
//! number of calls in flight never exceeds `batch_size` and the merged output
//! never depends on network timing. A tile whose call fails or whose answer
//! cannot be parsed contributes nothing; the run carries on.

use futures::future::join_all;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::annotation::parse::parse_candidates;
use crate::annotation::{AnnotationRequest, Annotator, EncodedCrop};
use crate::cancel::CancelSignal;
use crate::config::BatchConfig;
use crate::debug::DebugOutput;
use crate::detection::compositor::render_aligned;
use crate::error::{AnalysisError, AnnotationError};
use crate::loader::RasterImage;
use crate::models::{AffineAlignment, AnalysisMode, ChangeCandidate, Rect};
use crate::progress::{Progress, ProgressSink};

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Merged output of all tiles of a run
#[derive(Debug, Clone, Default)]
pub struct TileAnnotations {
    pub candidates: Vec<ChangeCandidate>,
    pub tokens_used: u64,
    pub failed_tiles: usize,
}

/// Inputs shared by every tile of a run
pub struct TileContext<'a> {
    pub before: &'a RasterImage,
    pub after: &'a RasterImage,
    pub alignment: &'a AffineAlignment,
    pub mode: AnalysisMode,
    pub config: &'a BatchConfig,
    pub debug: Option<&'a DebugOutput>,
}

/// Annotate every tile, `config.batch_size` at a time.
///
/// The cancel signal is checked before the run and before each batch; a set
/// signal aborts with [`AnalysisError::Cancelled`] and discards everything
/// gathered so far.
pub async fn annotate_tiles<A: Annotator>(
    annotator: &A,
    context: &TileContext<'_>,
    tiles: &[Rect],
    progress: &dyn ProgressSink,
    cancel: &CancelSignal,
) -> Result<TileAnnotations, AnalysisError> {
    cancel.check()?;

    let total = tiles.len();
    let batch_size = context.config.batch_size.max(1);
    let mut merged = TileAnnotations::default();
    let mut completed = 0;

    for (batch_index, batch) in tiles.chunks(batch_size).enumerate() {
        cancel.check()?;

        let first = batch_index * batch_size;
        let requests: Vec<Result<AnnotationRequest, image::ImageError>> = batch
            .iter()
            .enumerate()
            .map(|(offset, tile)| prepare_request(context, first + offset, *tile))
            .collect();

        if let Some(debug) = context.debug {
            for request in requests.iter().flatten() {
                debug.save_tile(request.tile_index, &request.before.data, &request.after.data)?;
            }
        }

        let calls = requests.iter().map(|request| async move {
            match request {
                Ok(request) => annotator.annotate(request).await,
                Err(e) => Err(AnnotationError::Encode(e.to_string())),
            }
        });
        let responses = join_all(calls).await;

        // Fan in sequentially, in tile order
        for ((offset, tile), response) in batch.iter().enumerate().zip(responses) {
            let tile_index = first + offset;
            let parsed = response.and_then(|r| parse_candidates(&r.raw_text).map(|c| (c, r.tokens_used)));
            match parsed {
                Ok((raw, tokens)) => {
                    let tokens = tokens.unwrap_or(0);
                    tracing::debug!(tile_index, tile = %tile, candidates = raw.len(), tokens, "tile annotated");
                    merged.tokens_used += tokens;
                    merged.candidates.extend(
                        raw.into_iter()
                            .map(|c| c.into_candidate(tile, context.config.coordinate_range)),
                    );
                }
                Err(e) => {
                    tracing::warn!(tile_index, tile = %tile, error = %e, "annotation failed for tile, skipping");
                    merged.failed_tiles += 1;
                }
            }
        }

        completed += batch.len();
        progress.report(&Progress::Annotating { completed, total });
    }

    Ok(merged)
}

/// Crop the before image and render the aligned after image for one tile
fn prepare_request(context: &TileContext<'_>, tile_index: usize, tile: Rect) -> Result<AnnotationRequest, image::ImageError> {
    let before_crop = image::imageops::crop_imm(context.before.pixels(), tile.x, tile.y, tile.width, tile.height).to_image();
    let after_crop = render_aligned(context.after, context.alignment, tile, PAPER);

    Ok(AnnotationRequest {
        tile_index,
        tile,
        mode: context.mode,
        before: encode_jpeg(before_crop, context.config.jpeg_quality)?,
        after: encode_jpeg(after_crop, context.config.jpeg_quality)?,
    })
}

fn encode_jpeg(crop: RgbaImage, quality: u8) -> Result<EncodedCrop, image::ImageError> {
    let (width, height) = crop.dimensions();
    let rgb = DynamicImage::ImageRgba8(crop).to_rgb8();

    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality).encode_image(&rgb)?;

    Ok(EncodedCrop {
        mime_type: "image/jpeg",
        data,
        width,
        height,
    })
}
