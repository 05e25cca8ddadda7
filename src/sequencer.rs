use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde_json::json;

use crate::{
    controller::RenderSession,
    error::{MaplapseError, MaplapseResult},
};

/// The ordered set of time-slider positions a run captures, as an inclusive
/// range walked at a fixed stride. Smaller strides mean smoother animation at
/// a higher capture cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionSweep {
    pub start: u32,
    pub end: u32,
    pub stride: u32,
}

impl Default for PositionSweep {
    fn default() -> Self {
        // Full slider domain at stride 2: 51 positions.
        Self {
            start: 0,
            end: 100,
            stride: 2,
        }
    }
}

impl PositionSweep {
    /// Reject degenerate sweeps before any resource is acquired — an empty
    /// position set must never reach the browser, let alone the encoder.
    pub fn validate(&self) -> MaplapseResult<()> {
        if self.stride == 0 {
            return Err(MaplapseError::validation("sweep stride must be >= 1"));
        }
        if self.start > self.end {
            return Err(MaplapseError::validation(format!(
                "sweep is empty: start {} > end {}",
                self.start, self.end
            )));
        }
        if self.end > 999 {
            // Frame names are zero-padded to three digits so lexical and
            // numeric ordering coincide for the encoder's file listing.
            return Err(MaplapseError::validation("sweep end must be <= 999"));
        }
        Ok(())
    }

    /// All positions in capture order: strictly increasing by construction.
    pub fn positions(&self) -> Vec<u32> {
        (self.start..=self.end).step_by(self.stride as usize).collect()
    }
}

/// One captured still, identified by its slider position. Positions double as
/// sequence indices: strictly increasing, same stride that drove the slider,
/// not gap-free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub index: u32,
    pub position: u32,
    pub path: PathBuf,
}

pub fn frame_file_name(position: u32) -> String {
    format!("frame_{position:03}.png")
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// CSS selector of the time-slider element.
    pub slider_selector: String,
    /// Fallback settle delay after each slider mutation; render completion is
    /// not observable from outside the page, so this is the one place a fixed
    /// wait is accepted.
    pub settle: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            slider_selector: "#dateSlider".to_string(),
            settle: Duration::from_millis(500),
        }
    }
}

const SET_SLIDER_SCRIPT: &str = "\
    const el = document.querySelector(arguments[0]);\
    if (!el) { return false; }\
    el.value = arguments[1];\
    el.dispatchEvent(new Event('input'));\
    return true;";

/// Drive the slider through the sweep and capture one still per position.
///
/// Strictly sequential: the session is shared mutable state and is taken by
/// `&mut` for the whole loop, so no two positions can ever be in flight at
/// once. A failure aborts the remaining positions; frames already written
/// stay on disk for the cleanup pass and their count travels in the error.
#[tracing::instrument(skip(session, settings), fields(positions = sweep.positions().len()))]
pub fn capture_sweep(
    session: &mut RenderSession,
    sweep: PositionSweep,
    frames_dir: &Path,
    settings: &CaptureSettings,
) -> MaplapseResult<Vec<Frame>> {
    sweep.validate()?;

    let mut frames: Vec<Frame> = Vec::new();
    for position in sweep.positions() {
        capture_position(session, position, frames_dir, settings).map_err(|err| {
            MaplapseError::CaptureFailed {
                position,
                frames_captured: frames.len(),
                message: err.to_string(),
            }
        })?;
        frames.push(Frame {
            index: position,
            position,
            path: frames_dir.join(frame_file_name(position)),
        });
        tracing::debug!(position, "frame captured");
    }

    tracing::info!(frames = frames.len(), "capture sweep complete");
    Ok(frames)
}

fn capture_position(
    session: &mut RenderSession,
    position: u32,
    frames_dir: &Path,
    settings: &CaptureSettings,
) -> MaplapseResult<()> {
    let moved = session.client()?.execute(
        SET_SLIDER_SCRIPT,
        vec![json!(settings.slider_selector), json!(position)],
    )?;
    if moved != json!(true) {
        return Err(MaplapseError::control_not_found(format!(
            "time slider '{}' not present in page",
            settings.slider_selector
        )));
    }

    std::thread::sleep(settings.settle);

    let png = session.client()?.screenshot_png()?;
    // A capture that does not decode would poison the encoder much later;
    // reject it at the site where the position is still known.
    image::load_from_memory(&png)
        .map_err(|e| MaplapseError::validation(format!("screenshot did not decode: {e}")))?;

    let path = frames_dir.join(frame_file_name(position));
    std::fs::write(&path, &png).map_err(|e| {
        MaplapseError::validation(format!("cannot write frame '{}': {e}", path.display()))
    })?;
    Ok(())
}
