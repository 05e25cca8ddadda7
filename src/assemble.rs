use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use anyhow::Context as _;

use crate::{
    error::{MaplapseError, MaplapseResult},
    sequencer::Frame,
};

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub fps: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl EncodeConfig {
    pub fn new(out_path: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            fps,
            out_path: out_path.into(),
            overwrite: true,
        }
    }

    pub fn validate(&self) -> MaplapseResult<()> {
        if self.fps == 0 {
            return Err(MaplapseError::validation("encode fps must be non-zero"));
        }
        Ok(())
    }
}

/// The final output of a successful run. Produced exactly once; dimensions
/// are the even-normalized ones actually encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Floor both dimensions to even values, as required by yuv420p encoders.
pub fn even_dims(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

fn ensure_parent_dir(path: &Path) -> MaplapseResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Encode the ordered frame set into a single MP4.
///
/// Frames are decoded here and streamed to ffmpeg as rawvideo over stdin, so
/// the artifact's frame count equals the input frame count by construction.
/// Artifact creation is all-or-nothing: once encoding has started, any
/// failure removes the partial output. Rejections before that point must not
/// touch `out_path` — whatever sits there was not produced by this run.
pub fn assemble(frames: &[Frame], cfg: &EncodeConfig) -> MaplapseResult<VideoArtifact> {
    cfg.validate()?;
    if frames.is_empty() {
        return Err(MaplapseError::validation(
            "cannot assemble a video from an empty frame set",
        ));
    }
    if !frames.windows(2).all(|w| w[1].index > w[0].index) {
        return Err(MaplapseError::validation(
            "frame set must be strictly increasing by sequence index",
        ));
    }

    let first = decode_frame(&frames[0])?;
    let (in_w, in_h) = (first.width(), first.height());
    let (out_w, out_h) = even_dims(in_w, in_h);
    if out_w == 0 || out_h == 0 {
        return Err(MaplapseError::validation(
            "frames are too small to encode (normalized dimension is zero)",
        ));
    }

    ensure_parent_dir(&cfg.out_path)?;
    if !cfg.overwrite && cfg.out_path.exists() {
        return Err(MaplapseError::validation(format!(
            "output file '{}' already exists",
            cfg.out_path.display()
        )));
    }
    if !is_ffmpeg_on_path() {
        return Err(MaplapseError::encode_failed(
            "ffmpeg is required for MP4 encoding, but was not found on PATH",
        ));
    }

    let encoder = FfmpegEncoder::spawn(cfg, in_w, in_h, out_w, out_h)?;
    // From here on ffmpeg owns the output path; clean up on every failure.
    if let Err(err) = stream_frames(frames, &first, in_w, in_h, encoder) {
        let _ = std::fs::remove_file(&cfg.out_path);
        return Err(err);
    }

    if !cfg.out_path.exists() {
        return Err(MaplapseError::encode_failed(format!(
            "ffmpeg exited cleanly but produced no output at '{}'",
            cfg.out_path.display()
        )));
    }

    tracing::info!(
        path = %cfg.out_path.display(),
        frames = frames.len(),
        fps = cfg.fps,
        "video assembled"
    );
    Ok(VideoArtifact {
        path: cfg.out_path.clone(),
        fps: cfg.fps,
        width: out_w,
        height: out_h,
        frame_count: frames.len(),
    })
}

fn stream_frames(
    frames: &[Frame],
    first: &image::RgbaImage,
    in_w: u32,
    in_h: u32,
    mut encoder: FfmpegEncoder,
) -> MaplapseResult<()> {
    if let Err(err) = feed_frames(&mut encoder, frames, first, in_w, in_h) {
        // Kill the child before the caller removes the output, or ffmpeg
        // could finalize the file on EOF after the removal.
        encoder.abort();
        return Err(err);
    }
    encoder.finish()
}

fn feed_frames(
    encoder: &mut FfmpegEncoder,
    frames: &[Frame],
    first: &image::RgbaImage,
    in_w: u32,
    in_h: u32,
) -> MaplapseResult<()> {
    encoder.write_frame(first.as_raw())?;
    for frame in &frames[1..] {
        let image = decode_frame(frame)?;
        if image.width() != in_w || image.height() != in_h {
            return Err(MaplapseError::validation(format!(
                "frame size mismatch at index {}: got {}x{}, expected {in_w}x{in_h}",
                frame.index,
                image.width(),
                image.height()
            )));
        }
        encoder.write_frame(image.as_raw())?;
    }
    Ok(())
}

fn decode_frame(frame: &Frame) -> MaplapseResult<image::RgbaImage> {
    let bytes = std::fs::read(&frame.path).map_err(|e| {
        MaplapseError::encode_failed(format!(
            "cannot read frame '{}': {e}",
            frame.path.display()
        ))
    })?;
    let image = image::load_from_memory(&bytes).map_err(|e| {
        MaplapseError::encode_failed(format!(
            "cannot decode frame '{}': {e}",
            frame.path.display()
        ))
    })?;
    Ok(image.to_rgba8())
}

/// System-`ffmpeg` encoder fed rawvideo RGBA over stdin. Audio is disabled
/// (this pipeline never has an audio track) and output is yuv420p H.264 with
/// an explicit scale to even dimensions for codec compatibility.
struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegEncoder {
    fn spawn(
        cfg: &EncodeConfig,
        in_w: u32,
        in_h: u32,
        out_w: u32,
        out_h: u32,
    ) -> MaplapseResult<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{in_w}x{in_h}"),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-vf",
            &format!("scale={out_w}:{out_h}"),
            "-movflags",
            "+faststart",
        ])
        .arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            MaplapseError::encode_failed(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MaplapseError::encode_failed("failed to open ffmpeg stdin"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    fn write_frame(&mut self, rgba: &[u8]) -> MaplapseResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MaplapseError::encode_failed(
                "ffmpeg encoder is already finalized",
            ));
        };
        stdin.write_all(rgba).map_err(|e| {
            MaplapseError::encode_failed(format!("failed to write frame to ffmpeg stdin: {e}"))
        })
    }

    fn abort(mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn finish(mut self) -> MaplapseResult<()> {
        drop(self.stdin.take());

        let output = self.child.wait_with_output().map_err(|e| {
            MaplapseError::encode_failed(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MaplapseError::encode_failed(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
