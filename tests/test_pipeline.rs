mod common;

use common::*;
use drawdiff::config::BatchConfig;
use drawdiff::{
    AffineAlignment, AnalysisConfig, AnalysisError, AnalysisMode, AnalysisRequest, AnalysisResult, AnnotationError,
    AnnotationResponse, BoundingBox, CancelSignal, ChangeKind, ImageSource, Pipeline, Point, Progress,
};
use image::RgbaImage;
use std::sync::Arc;

fn request(before: RgbaImage, after: RgbaImage) -> AnalysisRequest {
    AnalysisRequest {
        before: source(before),
        after: source(after),
        alignment: AffineAlignment::default(),
        mode: AnalysisMode::Macro,
        merge_distance: 20,
    }
}

/// One change in a 400x400 drawing; detected as the single tile (20, 20) 200x200
fn single_change() -> AnalysisRequest {
    request(blank_drawing(400, 400), drawing_with(400, 400, &[(100, 100, 40, 40)]))
}

/// A long bar detected as ROI (20, 100) 1960x200, swept into three tiles
fn wide_change() -> AnalysisRequest {
    request(blank_drawing(2000, 400), drawing_with(2000, 400, &[(100, 180, 1800, 40)]))
}

fn with_batch_size(batch_size: usize) -> AnalysisConfig {
    AnalysisConfig {
        batch: BatchConfig {
            batch_size,
            ..BatchConfig::default()
        },
        ..AnalysisConfig::default()
    }
}

#[tokio::test]
async fn test_identical_images_skip_annotation() -> anyhow::Result<()> {
    let drawing = drawing_with(300, 300, &[(40, 40, 100, 10)]);
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(10));
    let log = ProgressLog::default();
    let sink = log.sink();

    let result = pipeline
        .analyze(request(drawing.clone(), drawing), &sink, &CancelSignal::new())
        .await?;

    assert_eq!(result, AnalysisResult::empty());
    assert_eq!(pipeline.annotator().calls(), 0);
    let events = log.events();
    assert_eq!(events.last(), Some(&Progress::Done { items: 0 }));
    assert!(!events.iter().any(|e| matches!(e, Progress::Annotating { .. })));
    Ok(())
}

#[tokio::test]
async fn test_single_change_is_mapped_to_global_space() -> anyhow::Result<()> {
    let annotator = MockAnnotator::answering(&candidate_json("ADDED", [400.0, 400.0, 600.0, 600.0]), Some(120));
    let pipeline = Pipeline::new(annotator);

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(pipeline.annotator().calls(), 1);
    assert_eq!(result.total_tokens, 120);
    assert_eq!(result.items.len(), 1);

    let item = &result.items[0];
    assert_eq!(item.display_id, "#0001");
    assert_eq!(item.change_kind, ChangeKind::Added);
    assert_eq!(item.bbox, BoundingBox::new(100.0, 100.0, 40.0, 40.0));
    assert_eq!(item.area_size, 1600.0);
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_coordinates_are_clamped() -> anyhow::Result<()> {
    let annotator = MockAnnotator::answering(&candidate_json("REMOVED", [-50.0, 500.0, 1400.0, 1000.0]), Some(1));
    let pipeline = Pipeline::new(annotator);

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(result.items[0].bbox, BoundingBox::new(20.0, 120.0, 200.0, 100.0));
    Ok(())
}

#[tokio::test]
async fn test_batches_bound_concurrency() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(7)).with_config(with_batch_size(2))?;
    let log = ProgressLog::default();
    let sink = log.sink();

    let result = pipeline.analyze(wide_change(), &sink, &CancelSignal::new()).await?;

    let annotator = pipeline.annotator();
    assert_eq!(annotator.calls(), 3);
    assert_eq!(annotator.max_in_flight(), 2);
    assert_eq!(annotator.seen_tiles(), vec![0, 1, 2]);
    assert_eq!(result.items.len(), 3);
    assert_eq!(result.total_tokens, 21);

    let annotating: Vec<Progress> = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, Progress::Annotating { .. }))
        .collect();
    assert_eq!(
        annotating,
        vec![
            Progress::Annotating { completed: 2, total: 3 },
            Progress::Annotating { completed: 3, total: 3 },
        ]
    );
    assert_eq!(annotating[0].to_string(), "Annotating: 2 of 3 tiles");
    Ok(())
}

#[tokio::test]
async fn test_default_batch_never_exceeds_three() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1));
    pipeline.analyze(wide_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;
    assert!(pipeline.annotator().max_in_flight() <= 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_tile_is_swallowed() -> anyhow::Result<()> {
    let whole_tile = candidate_json("MODIFIED", [0.0, 0.0, 1000.0, 1000.0]);
    let annotator = MockAnnotator::new(move |request| {
        if request.tile_index == 1 {
            return Err(AnnotationError::Http {
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        Ok(AnnotationResponse {
            raw_text: whole_tile.clone(),
            tokens_used: Some(50),
        })
    });
    let pipeline = Pipeline::new(annotator);

    let result = pipeline.analyze(wide_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(pipeline.annotator().calls(), 3);
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.total_tokens, 100);
    assert_eq!(result.items[0].bbox.x, 20.0);
    assert_eq!(result.items[1].bbox.x, 1420.0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_output_contributes_nothing() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::answering("I could not find any JSON here", Some(40)));

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert!(result.is_empty());
    assert_eq!(result.total_tokens, 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_answer_is_not_a_failure() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::answering("[]", Some(15)));

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert!(result.is_empty());
    assert_eq!(result.total_tokens, 15);
    Ok(())
}

#[tokio::test]
async fn test_missing_usage_counts_as_zero() -> anyhow::Result<()> {
    let annotator = MockAnnotator::answering(&candidate_json("ADDED", [0.0, 0.0, 500.0, 500.0]), None);
    let pipeline = Pipeline::new(annotator);

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.total_tokens, 0);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_tiles_are_deduplicated() -> anyhow::Result<()> {
    // Every tile reports the same global box (800, 100) 100x100 relative to its own origin
    let annotator = MockAnnotator::new(|request| {
        let tile = request.tile;
        let to_norm = |global: f64, origin: u32, size: u32| (global - origin as f64) / size as f64 * 1000.0;
        let x0 = to_norm(800.0, tile.x, tile.width);
        let x1 = to_norm(900.0, tile.x, tile.width);
        let y0 = to_norm(100.0, tile.y, tile.height);
        let y1 = to_norm(200.0, tile.y, tile.height);
        Ok(AnnotationResponse {
            raw_text: if (0.0..=1000.0).contains(&x0) && (0.0..=1000.0).contains(&x1) {
                candidate_json("ADDED", [x0, y0, x1, y1])
            } else {
                "[]".to_string()
            },
            tokens_used: Some(1),
        })
    });
    let pipeline = Pipeline::new(annotator);

    let result = pipeline.analyze(wide_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(result.total_tokens, 3);
    assert_eq!(result.items.len(), 1);
    assert!((result.items[0].bbox.x - 800.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn test_moved_from_is_mapped() -> anyhow::Result<()> {
    let text = r#"[{"title":"Panel","description":"","category":"EQUIPMENT","type":"MOVED",
        "box_2d":[500,500,600,600],"moved_from":[0,500]}]"#;
    let pipeline = Pipeline::new(MockAnnotator::answering(text, Some(1)));

    let result = pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert_eq!(result.items[0].moved_from, Some(Point { x: 20.0, y: 120.0 }));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_start_makes_no_calls() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let outcome = pipeline.analyze(wide_change(), &|_: &Progress| {}, &cancel).await;

    assert!(matches!(outcome, Err(AnalysisError::Cancelled)));
    assert_eq!(pipeline.annotator().calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_between_batches_discards_results() -> anyhow::Result<()> {
    let cancel = CancelSignal::new();
    let annotator = MockAnnotator::whole_tile(1).cancel_after(1, cancel.clone());
    let pipeline = Pipeline::new(annotator).with_config(with_batch_size(1))?;

    let outcome = pipeline.analyze(wide_change(), &|_: &Progress| {}, &cancel).await;

    let err = outcome.expect_err("run should stop");
    assert!(err.is_cancelled());
    assert_eq!(pipeline.annotator().calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_loading_stops_before_detection() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1));
    let cancel = CancelSignal::new();
    let log = ProgressLog::default();
    let record = log.sink();
    let trip = cancel.clone();
    let sink = move |p: &Progress| {
        record(p);
        if *p == Progress::Loading {
            trip.cancel();
        }
    };

    let outcome = pipeline.analyze(wide_change(), &sink, &cancel).await;

    assert!(matches!(outcome, Err(AnalysisError::Cancelled)));
    assert_eq!(pipeline.annotator().calls(), 0);
    assert_eq!(log.events(), vec![Progress::Loading]);
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_scanning_stops_before_tiling() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let out = dir.path().join("debug");
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1)).with_debug(out.clone())?;
    let cancel = CancelSignal::new();
    let log = ProgressLog::default();
    let record = log.sink();
    let trip = cancel.clone();
    let sink = move |p: &Progress| {
        record(p);
        if *p == Progress::Scanning {
            trip.cancel();
        }
    };

    let outcome = pipeline.analyze(wide_change(), &sink, &cancel).await;

    assert!(matches!(outcome, Err(AnalysisError::Cancelled)));
    assert_eq!(pipeline.annotator().calls(), 0);
    assert_eq!(log.events(), vec![Progress::Loading, Progress::Scanning]);
    // Nothing from the detection result is written once cancelled
    assert!(!out.join("00_difference.png").exists());
    assert!(!out.join("01_rois.png").exists());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_image_fails_the_run() -> anyhow::Result<()> {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1));
    let request = AnalysisRequest {
        before: ImageSource::Bytes(vec![0x00, 0x01, 0x02]),
        ..single_change()
    };

    let outcome = pipeline.analyze(request, &|_: &Progress| {}, &CancelSignal::new()).await;

    match outcome {
        Err(AnalysisError::ImageLoad { source_name, .. }) => assert!(source_name.starts_with("before")),
        other => panic!("expected an image load error, got {other:?}"),
    }
    assert_eq!(pipeline.annotator().calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() -> anyhow::Result<()> {
    let outcome = Pipeline::new(MockAnnotator::whole_tile(1)).with_config(with_batch_size(0));
    assert!(matches!(outcome, Err(AnalysisError::Config(_))));
    Ok(())
}

#[tokio::test]
async fn test_debug_output_is_written() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let out = dir.path().join("debug");
    let pipeline = Pipeline::new(MockAnnotator::answering("[]", None)).with_debug(out.clone())?;

    pipeline.analyze(single_change(), &|_: &Progress| {}, &CancelSignal::new()).await?;

    assert!(out.join("00_difference.png").exists());
    assert!(out.join("01_rois.png").exists());
    assert!(out.join("02_tiles").join("01_before.jpg").exists());
    assert!(out.join("02_tiles").join("01_after.jpg").exists());
    Ok(())
}

#[tokio::test]
async fn test_debug_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("leftover.txt"), "x")?;

    let outcome = Pipeline::new(MockAnnotator::whole_tile(1)).with_debug(dir.path().to_path_buf());
    assert!(matches!(outcome, Err(AnalysisError::Debug(_))));
    Ok(())
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn test_analysis_future_is_send() {
    let pipeline = Pipeline::new(MockAnnotator::whole_tile(1));
    let cancel = CancelSignal::new();
    let sink = |_: &Progress| {};

    let run = pipeline.analyze(single_change(), &sink, &cancel);
    assert_send(&run);
}

#[cfg(feature = "gemini")]
#[test]
fn test_gemini_analysis_future_is_send() -> anyhow::Result<()> {
    use drawdiff::GeminiAnnotator;
    use drawdiff::config::GeminiConfig;

    let config = GeminiConfig {
        api_key: Some("test-key".to_string()),
        ..GeminiConfig::default()
    };
    let pipeline = Pipeline::new(GeminiAnnotator::new(&config, 1000.0)?);
    let cancel = CancelSignal::new();
    let sink = |_: &Progress| {};

    let run = pipeline.analyze(single_change(), &sink, &cancel);
    assert_send(&run);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_analysis_runs_on_a_spawned_task() -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::new(MockAnnotator::whole_tile(42)));
    let cancel = CancelSignal::new();

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.analyze(single_change(), &|_: &Progress| {}, &cancel).await })
    };
    let result = task.await??;

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.total_tokens, 42);
    assert_eq!(pipeline.annotator().calls(), 1);
    Ok(())
}
