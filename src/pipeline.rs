use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;

use crate::{
    assemble::{EncodeConfig, VideoArtifact, assemble},
    controller::{BrowserConfig, Controller},
    dataset::Dataset,
    error::MaplapseResult,
    host::MapHost,
    sequencer::{CaptureSettings, PositionSweep, capture_sweep},
};

/// Run lifecycle. Terminal states are `Done` and `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ServerUp,
    BrowserReady,
    Capturing,
    Encoding,
    Done,
    Failed,
}

/// Everything one run needs, validated up front before any resource exists.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub out_path: PathBuf,
    pub fps: u32,
    pub sweep: PositionSweep,
    pub capture: CaptureSettings,
    pub browser: BrowserConfig,
    /// Visible label of the button that switches the page into the captured
    /// visualization mode.
    pub mode_label: String,
    /// CSS selector of the element whose presence means the page is ready.
    pub ready_selector: String,
    pub ready_timeout: Duration,
    pub host_timeout: Duration,
    /// Page file to serve instead of the built-in one.
    pub page_path: Option<PathBuf>,
    /// Where the run-scoped frame directory is created (system temp dir when
    /// unset). The directory is named per run and removed on every exit path.
    pub frames_root: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(data_path: impl Into<PathBuf>, out_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            out_path: out_path.into(),
            fps: 10,
            sweep: PositionSweep::default(),
            capture: CaptureSettings::default(),
            browser: BrowserConfig::default(),
            mode_label: "Heat Map".to_string(),
            ready_selector: "#map".to_string(),
            ready_timeout: Duration::from_secs(30),
            host_timeout: Duration::from_secs(10),
            page_path: None,
            frames_root: None,
        }
    }

    pub fn validate(&self) -> MaplapseResult<()> {
        self.sweep.validate()?;
        self.browser.validate()?;
        EncodeConfig::new(&self.out_path, self.fps).validate()?;
        Ok(())
    }
}

/// One end-to-end run: dataset → host → browser → capture → encode.
///
/// Cleanup is not a stage but a property of the resources themselves: the
/// frame directory ([`tempfile::TempDir`]), the render session and the host
/// all release in `Drop` with failures swallowed, so the session is closed,
/// the host stopped and the frames removed on success, failure and unwind
/// alike, and the first error always propagates untouched.
pub struct PipelineRun {
    state: RunState,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        tracing::info!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    #[tracing::instrument(skip_all, fields(out = %cfg.out_path.display()))]
    pub fn execute(&mut self, cfg: &RunConfig) -> MaplapseResult<VideoArtifact> {
        let result = self.drive(cfg);
        match &result {
            Ok(artifact) => {
                self.advance(RunState::Done);
                tracing::info!(frames = artifact.frame_count, "run complete");
            }
            Err(err) => {
                self.advance(RunState::Failed);
                tracing::error!(%err, "run failed");
            }
        }
        result
    }

    fn drive(&mut self, cfg: &RunConfig) -> MaplapseResult<VideoArtifact> {
        cfg.validate()?;

        let dataset = Dataset::load(&cfg.data_path)?;

        // Run-scoped name, removed by RAII: a hard crash of this process is
        // the only way to leak it, and a fresh run never reuses a stale one.
        let frames_dir = match &cfg.frames_root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("create frames root '{}'", root.display()))?;
                tempfile::Builder::new()
                    .prefix("maplapse-frames-")
                    .tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix("maplapse-frames-").tempdir(),
        }
        .context("create run frame directory")?;

        let mut host = match &cfg.page_path {
            Some(page) => MapHost::start_with_page(dataset, page)?,
            None => MapHost::start(dataset)?,
        };
        host.wait_reachable(cfg.host_timeout)?;
        self.advance(RunState::ServerUp);

        let controller = Controller::new(cfg.browser.clone());
        let mut session = controller.open(&host.endpoint())?;
        controller.wait_ready(&mut session, &cfg.ready_selector, cfg.ready_timeout)?;
        controller.select_mode(&mut session, &cfg.mode_label)?;
        self.advance(RunState::BrowserReady);

        self.advance(RunState::Capturing);
        let frames = capture_sweep(&mut session, cfg.sweep, frames_dir.path(), &cfg.capture)?;

        // The browser has no further part to play; release it before the
        // encoder starts rather than holding it through a long encode.
        session.close();

        self.advance(RunState::Encoding);
        let artifact = assemble(&frames, &EncodeConfig::new(&cfg.out_path, cfg.fps))?;

        host.stop();
        Ok(artifact)
    }
}
