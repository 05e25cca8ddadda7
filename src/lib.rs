#![forbid(unsafe_code)]

//! maplapse renders a time-evolving geospatial visualization as a video: it
//! hosts the map page locally, drives a headless browser through an ordered
//! set of time-slider positions, captures one still per position and encodes
//! the stills into a single MP4 via the system `ffmpeg`.

pub mod assemble;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod sequencer;
pub mod webdriver;

pub use assemble::{EncodeConfig, VideoArtifact, assemble, is_ffmpeg_on_path};
pub use controller::{BrowserConfig, Controller, RenderSession};
pub use dataset::{Dataset, GeoRecord};
pub use error::{MaplapseError, MaplapseResult};
pub use host::MapHost;
pub use pipeline::{PipelineRun, RunConfig, RunState};
pub use sequencer::{CaptureSettings, Frame, PositionSweep, capture_sweep};
