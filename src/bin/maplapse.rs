use std::{path::PathBuf, process::Command as ProcessCommand, time::Duration};

use clap::{Parser, Subcommand};

use maplapse::{
    BrowserConfig, CaptureSettings, PipelineRun, PositionSweep, RunConfig, is_ffmpeg_on_path,
};

#[derive(Parser, Debug)]
#[command(name = "maplapse", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: host the map, capture the sweep, encode the MP4.
    Render(RenderArgs),
    /// Report whether the external tools the pipeline needs are available.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Pre-processed dataset (JSON array of records).
    #[arg(long)]
    data: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Playback frame rate.
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// First slider position of the sweep.
    #[arg(long, default_value_t = 0)]
    start: u32,

    /// Last slider position of the sweep (inclusive when the stride lands on it).
    #[arg(long, default_value_t = 100)]
    end: u32,

    /// Slider stride; smaller is smoother and slower to capture.
    #[arg(long, default_value_t = 2)]
    stride: u32,

    /// Settle delay after each slider move, in milliseconds.
    #[arg(long, default_value_t = 500)]
    settle_ms: u64,

    /// Viewport width (must be even).
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Viewport height (must be even).
    #[arg(long, default_value_t = 940)]
    height: u32,

    /// chromedriver binary (resolved via PATH by default).
    #[arg(long, default_value = "chromedriver")]
    chromedriver: PathBuf,

    /// Explicit browser binary, for platforms with non-standard placement.
    #[arg(long)]
    browser_binary: Option<PathBuf>,

    /// Visible label of the view-mode button to activate.
    #[arg(long, default_value = "Heat Map")]
    mode_label: String,

    /// CSS selector of the time-slider element.
    #[arg(long, default_value = "#dateSlider")]
    slider: String,

    /// CSS selector whose presence marks the page as ready.
    #[arg(long, default_value = "#map")]
    ready_selector: String,

    /// Readiness-probe timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    ready_timeout_secs: u64,

    /// Visualization page to serve instead of the built-in one.
    #[arg(long)]
    page: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// chromedriver binary to probe.
    #[arg(long, default_value = "chromedriver")]
    chromedriver: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Check(args) => cmd_check(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut cfg = RunConfig::new(args.data, args.out);
    cfg.fps = args.fps;
    cfg.sweep = PositionSweep {
        start: args.start,
        end: args.end,
        stride: args.stride,
    };
    cfg.capture = CaptureSettings {
        slider_selector: args.slider,
        settle: Duration::from_millis(args.settle_ms),
    };
    cfg.browser = BrowserConfig {
        viewport: (args.width, args.height),
        chromedriver: args.chromedriver,
        browser_binary: args.browser_binary,
        ..BrowserConfig::default()
    };
    cfg.mode_label = args.mode_label;
    cfg.ready_selector = args.ready_selector;
    cfg.ready_timeout = Duration::from_secs(args.ready_timeout_secs);
    cfg.page_path = args.page;

    let artifact = PipelineRun::new().execute(&cfg)?;
    eprintln!(
        "wrote {} ({} frames, {} fps, {}x{})",
        artifact.path.display(),
        artifact.frame_count,
        artifact.fps,
        artifact.width,
        artifact.height
    );
    Ok(())
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let ffmpeg = is_ffmpeg_on_path();
    let chromedriver = ProcessCommand::new(&args.chromedriver)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    eprintln!("ffmpeg:       {}", if ffmpeg { "ok" } else { "missing" });
    eprintln!(
        "chromedriver: {} ({})",
        if chromedriver { "ok" } else { "missing" },
        args.chromedriver.display()
    );

    if ffmpeg && chromedriver {
        Ok(())
    } else {
        anyhow::bail!("missing external tools; see report above")
    }
}
