//! Cleanup invariants: however a run dies, the frame directory is gone and
//! the output path untouched.

use std::path::PathBuf;

use maplapse::{PipelineRun, RunConfig, RunState};

fn write_dataset(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("data.json");
    std::fs::write(
        &path,
        r#"[{"id": "p1", "lat": 42.88, "lng": -78.87, "date": "2024-01-02"}]"#,
    )
    .unwrap();
    path
}

#[test]
fn failure_after_host_start_leaves_no_frame_directory() {
    let scratch = tempfile::tempdir().unwrap();
    let data_path = write_dataset(scratch.path());
    let frames_root = scratch.path().join("frames");
    let out_path = scratch.path().join("out.mp4");

    let mut cfg = RunConfig::new(&data_path, &out_path);
    cfg.frames_root = Some(frames_root.clone());
    // Guaranteed to fail at browser launch, well after the host and the
    // frame directory exist.
    cfg.browser.chromedriver = PathBuf::from("/nonexistent/chromedriver");

    let mut run = PipelineRun::new();
    let err = run.execute(&cfg).unwrap_err();
    assert!(err.to_string().contains("chromedriver"));
    assert_eq!(run.state(), RunState::Failed);

    // The run-scoped directory under frames_root must have been removed.
    let leftovers: Vec<_> = std::fs::read_dir(&frames_root)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(
        leftovers.is_empty(),
        "frame directory leaked: {leftovers:?}"
    );
    assert!(!out_path.exists(), "no artifact may exist for a failed run");
}

#[test]
fn missing_dataset_leaves_nothing_behind() {
    let scratch = tempfile::tempdir().unwrap();
    let frames_root = scratch.path().join("frames");
    let out_path = scratch.path().join("out.mp4");

    let mut cfg = RunConfig::new(scratch.path().join("absent.json"), &out_path);
    cfg.frames_root = Some(frames_root.clone());

    let mut run = PipelineRun::new();
    assert!(run.execute(&cfg).is_err());
    assert_eq!(run.state(), RunState::Failed);

    // Loading fails before the frame directory is created.
    assert!(!frames_root.exists() || std::fs::read_dir(&frames_root).unwrap().next().is_none());
    assert!(!out_path.exists());
}
