use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tile_stitcher::{StatusEvent, StitchConfig, StitchRange, Stitcher, status_channel};

/// Stitch a grid of viewport captures (R<row>_C<col>.png) into one
/// seamless mosaic PNG.
#[derive(Parser, Debug)]
#[command(name = "stitch")]
#[command(about = "Stitch a grid of R<row>_C<col>.png tiles into one mosaic")]
struct Args {
    /// Directory containing the tile images
    input_dir: PathBuf,

    /// Output PNG path
    #[arg(default_value = "mosaic.png")]
    output: PathBuf,

    /// JSON config file; CLI flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Expected horizontal overlap in percent (1-100)
    #[arg(long)]
    overlap_h: Option<u32>,

    /// Expected vertical overlap in percent (1-100)
    #[arg(long)]
    overlap_v: Option<u32>,

    /// Minimum effective match score to keep a pair
    #[arg(long)]
    min_score: Option<f32>,

    /// Restrict stitching to a tile window: r_min,r_max,c_min,c_max
    #[arg(long, value_name = "R0,R1,C0,C1")]
    range: Option<String>,

    /// Feature detector budget per tile
    #[arg(long)]
    nfeatures: Option<usize>,

    /// Solver iteration cap
    #[arg(long)]
    lsqr_iter: Option<usize>,

    /// Grid-anchor regularization strength
    #[arg(long)]
    initial_pos_weight: Option<f64>,

    /// LRU bound for the tile caches
    #[arg(long)]
    cache_items: Option<usize>,

    /// Also write a low-resolution preview PNG
    #[arg(long)]
    preview: bool,

    /// Downscale factor for the preview (0-1]
    #[arg(long)]
    preview_scale: Option<f32>,

    /// Also write a scatter plot of the pairwise offsets
    #[arg(long)]
    heatmap: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let (sink, events) = status_channel(256);
    let stitcher =
        Stitcher::new(&args.input_dir, &args.output, config)?.with_status_sink(sink);

    let worker = thread::spawn(move || stitcher.run());

    for event in events {
        match event {
            StatusEvent::Status(message) => println!("  {message}"),
            StatusEvent::Progress(percent) => println!("  [{percent:3}%]"),
            StatusEvent::ProgressPair(src, dst) => {
                tracing::debug!("matching pair {src} -> {dst}")
            }
            StatusEvent::Error(message) => eprintln!("error: {message}"),
            StatusEvent::Done(message) => println!("{message}"),
        }
    }

    worker
        .join()
        .map_err(|_| anyhow!("stitching thread panicked"))??;
    Ok(())
}

fn build_config(args: &Args) -> Result<StitchConfig> {
    let mut config = match &args.config {
        Some(path) => StitchConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StitchConfig::default(),
    };

    if let Some(v) = args.overlap_h {
        config.overlap_h_pct = v;
    }
    if let Some(v) = args.overlap_v {
        config.overlap_v_pct = v;
    }
    if let Some(v) = args.min_score {
        config.min_score_threshold = v;
    }
    if let Some(v) = args.nfeatures {
        config.nfeatures = v;
    }
    if let Some(v) = args.lsqr_iter {
        config.lsqr_iter = v;
    }
    if let Some(v) = args.initial_pos_weight {
        config.initial_pos_weight = v;
    }
    if let Some(v) = args.cache_items {
        config.cache_max_items = v;
    }
    if let Some(v) = args.preview_scale {
        config.preview_scale = v;
    }
    if args.preview {
        config.generate_preview = true;
    }
    if args.heatmap {
        config.generate_heatmap = true;
    }
    if let Some(spec) = &args.range {
        config.stitch_range = Some(parse_range(spec)?);
    }
    Ok(config)
}

/// Parse "r_min,r_max,c_min,c_max" into a stitch window.
fn parse_range(spec: &str) -> Result<StitchRange> {
    let parts: Vec<u32> = spec
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid range '{spec}'"))?;
    if parts.len() != 4 {
        return Err(anyhow!(
            "range must be r_min,r_max,c_min,c_max (got '{spec}')"
        ));
    }
    Ok(StitchRange {
        r_min: parts[0],
        r_max: parts[1],
        c_min: parts[2],
        c_max: parts[3],
    })
}
