use std::path::PathBuf;

use tracing::Instrument;

use crate::annotation::orchestrator::TileContext;
use crate::annotation::{Annotator, annotate_tiles};
use crate::cancel::CancelSignal;
use crate::config::AnalysisConfig;
use crate::consolidate::consolidate;
use crate::debug::DebugOutput;
use crate::detection::{detect, tile};
use crate::error::AnalysisError;
use crate::loader::{ImageSource, load_pair};
use crate::models::{AffineAlignment, AnalysisMode, AnalysisResult};
use crate::progress::{Progress, ProgressSink};

/// Inputs of one analysis run
#[derive(Debug)]
pub struct AnalysisRequest {
    pub before: ImageSource,
    pub after: ImageSource,
    pub alignment: AffineAlignment,
    pub mode: AnalysisMode,
    /// Clusters closer than this many pixels are merged into one region
    pub merge_distance: u32,
}

/// Drawing comparison pipeline: load, detect, tile, annotate, consolidate.
///
/// A `Pipeline` holds only configuration and the annotation backend. Every
/// call to [`Pipeline::analyze`] owns its own image buffers, so one instance can
/// serve several runs.
pub struct Pipeline<A> {
    annotator: A,
    config: AnalysisConfig,
    debug: Option<DebugOutput>,
}

impl<A: Annotator> Pipeline<A> {
    pub fn new(annotator: A) -> Self {
        Self {
            annotator,
            config: AnalysisConfig::default(),
            debug: None,
        }
    }

    /// Replace the tuning parameters. The configuration is validated first.
    pub fn with_config(mut self, config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self, AnalysisError> {
        self.debug = Some(DebugOutput::new(output_dir)?);
        Ok(self)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn annotator(&self) -> &A {
        &self.annotator
    }

    /// Run one analysis.
    ///
    /// Returns [`AnalysisError::Cancelled`] when `cancel` is set at any
    /// checkpoint; all work done so far is dropped. An image pair without
    /// differences yields an empty result and no annotation calls.
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> Result<AnalysisResult, AnalysisError> {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("analysis", %run_id, mode = %request.mode);

        let outcome = self.run(request, progress, cancel).instrument(span.clone()).await;
        span.in_scope(|| match &outcome {
            Ok(result) => tracing::info!(
                items = result.items.len(),
                total_tokens = result.total_tokens,
                "analysis finished"
            ),
            Err(e) if e.is_cancelled() => tracing::info!("analysis cancelled"),
            Err(e) => tracing::error!(error = %e, "analysis failed"),
        });
        outcome
    }

    async fn run(
        &self,
        request: AnalysisRequest,
        progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> Result<AnalysisResult, AnalysisError> {
        let AnalysisRequest {
            before,
            after,
            alignment,
            mode,
            merge_distance,
        } = request;

        // Phase 1: load both images
        cancel.check()?;
        progress.report(&Progress::Loading);
        let (before, after) = load_pair(before, after).await?;
        cancel.check()?;
        tracing::debug!(
            before = ?before.dimensions(),
            after = ?after.dimensions(),
            "images loaded"
        );

        // Phase 2: locate changed regions
        tokio::task::yield_now().await;
        progress.report(&Progress::Scanning);
        let sensitivity = self.config.detection.sensitivity_for(mode);
        let detection = detect(
            &before,
            &after,
            &alignment,
            sensitivity,
            merge_distance,
            &self.config.detection,
        );
        cancel.check()?;
        if let Some(debug) = &self.debug {
            debug.save_difference(&detection.difference)?;
            debug.save_rois(&before, &detection.rois)?;
        }

        if detection.rois.is_empty() {
            tracing::info!("no changed regions found");
            progress.report(&Progress::Done { items: 0 });
            return Ok(AnalysisResult::empty());
        }

        // Phase 3: split regions into request-sized tiles
        progress.report(&Progress::Tiling {
            regions: detection.rois.len(),
        });
        let (width, height) = before.dimensions();
        let tiles = tile(&detection.rois, width, height, &self.config.tiling);
        tracing::debug!(rois = detection.rois.len(), tiles = tiles.len(), "tiling finished");

        // Phase 4: annotate tiles in batches
        let context = TileContext {
            before: &before,
            after: &after,
            alignment: &alignment,
            mode,
            config: &self.config.batch,
            debug: self.debug.as_ref(),
        };
        let annotations = annotate_tiles(&self.annotator, &context, &tiles, progress, cancel).await?;
        if annotations.failed_tiles > 0 {
            tracing::warn!(
                failed = annotations.failed_tiles,
                total = tiles.len(),
                "some tiles produced no annotations"
            );
        }

        // Phase 5: deduplicate, order and number
        progress.report(&Progress::Consolidating);
        let items = consolidate(annotations.candidates, &self.config.consolidation);
        progress.report(&Progress::Done { items: items.len() });

        Ok(AnalysisResult {
            items,
            total_tokens: annotations.tokens_used,
        })
    }
}
