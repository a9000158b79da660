use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use drawdiff::export::{ExportStyle, save_composite, write_report};
use drawdiff::loader::load_pair;
use drawdiff::{
    AffineAlignment, AnalysisConfig, AnalysisMode, AnalysisRequest, CancelSignal, GeminiAnnotator, ImageSource, Pipeline,
    Progress,
};

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Rooms, walls and other structural changes
    Macro,
    /// Wiring, piping and equipment symbols
    Micro,
}

impl From<ModeArg> for AnalysisMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Macro => AnalysisMode::Macro,
            ModeArg::Micro => AnalysisMode::Micro,
        }
    }
}

#[derive(Parser)]
#[command(name = "drawdiff")]
#[command(about = "Find and label the differences between two versions of a technical drawing")]
struct Cli {
    /// Path to the "before" drawing
    #[arg(value_name = "BEFORE")]
    before: PathBuf,

    /// Path to the "after" drawing
    #[arg(value_name = "AFTER")]
    after: PathBuf,

    /// Analysis mode
    #[arg(long, value_enum, default_value = "macro")]
    mode: ModeArg,

    /// Merge changed areas closer than this many pixels
    #[arg(long, default_value_t = 20)]
    merge_distance: u32,

    /// Horizontal offset of the "after" drawing in pixels
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    offset_x: f64,

    /// Vertical offset of the "after" drawing in pixels
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    offset_y: f64,

    /// Uniform scale of the "after" drawing
    #[arg(long, default_value_t = 1.0)]
    scale: f64,

    /// Rotation of the "after" drawing in degrees, about its own center
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    rotation: f64,

    /// Overlay opacity used for the exported composite
    #[arg(long, default_value_t = 0.5)]
    opacity: f64,

    /// JSON file with tuning parameters and service settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Write an annotated composite PNG
    #[arg(long, value_name = "PNG")]
    export: Option<PathBuf>,

    /// Write a JSON report
    #[arg(long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// Font for composite labels (defaults to a system font)
    #[arg(long, value_name = "TTF")]
    font: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();

    let default_filter = if args.verbose { "drawdiff=debug" } else { "drawdiff=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    };

    let annotator = GeminiAnnotator::new(&config.gemini, config.batch.coordinate_range)?;
    tracing::info!(model = annotator.model(), "annotation backend ready");

    let mut pipeline = Pipeline::new(annotator).with_config(config)?;
    if let Some(debug_dir) = args.debug_out.clone() {
        pipeline = pipeline.with_debug(debug_dir)?;
    }

    let alignment = AffineAlignment {
        x: args.offset_x,
        y: args.offset_y,
        scale: args.scale,
        rotation: args.rotation,
        opacity: args.opacity.clamp(0.0, 1.0),
    };

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current batch");
            on_interrupt.cancel();
        }
    });

    let request = AnalysisRequest {
        before: ImageSource::Path(args.before.clone()),
        after: ImageSource::Path(args.after.clone()),
        alignment,
        mode: args.mode.into(),
        merge_distance: args.merge_distance,
    };
    let progress = |p: &Progress| eprintln!("{}", p);

    let result = match pipeline.analyze(request, &progress, &cancel).await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => {
            println!("analysis cancelled");
            return Ok(ExitCode::from(130));
        }
        Err(e) => return Err(e.into()),
    };

    if result.is_empty() {
        println!("No differences found.");
    } else {
        println!("\n=== Detected Changes ===");
        println!("Total changes: {}", result.items.len());
        for item in &result.items {
            println!(
                "  {} [{} / {}] {} at ({:.0}, {:.0}) {:.0}x{:.0}",
                item.display_id,
                item.change_kind,
                item.category,
                item.title,
                item.bbox.x,
                item.bbox.y,
                item.bbox.width,
                item.bbox.height
            );
            if args.verbose && !item.description.is_empty() {
                println!("        {}", item.description);
            }
        }
    }
    println!("Tokens used: {}", result.total_tokens);

    if let Some(path) = &args.report {
        write_report(path, &result, &alignment)?;
    }

    if let Some(path) = &args.export {
        let style = match &args.font {
            Some(font) => ExportStyle::with_font_path(font)?,
            None => ExportStyle::with_system_font(),
        };
        let (before, after) = load_pair(args.before.into(), args.after.into()).await?;
        save_composite(path, &before, &after, &alignment, &result.items, &style)?;
    }

    Ok(ExitCode::SUCCESS)
}
