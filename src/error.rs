pub type MaplapseResult<T> = Result<T, MaplapseError>;

/// Every failure in the pipeline is fatal to the run; nothing here is retried.
/// Variants that correspond to a pipeline stage carry the diagnostic context
/// captured at the failure site.
#[derive(thiserror::Error, Debug)]
pub enum MaplapseError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("render timeout: {message} (url: {url})")]
    RenderTimeout {
        message: String,
        url: String,
        /// Page markup at the moment the probe gave up, truncated for sanity.
        page_source: String,
    },

    #[error("control not found: {0}")]
    ControlNotFound(String),

    #[error("capture failed at position {position} after {frames_captured} frame(s): {message}")]
    CaptureFailed {
        position: u32,
        frames_captured: usize,
        message: String,
    },

    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MaplapseError {
    pub fn data_unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }

    pub fn host_unreachable(msg: impl Into<String>) -> Self {
        Self::HostUnreachable(msg.into())
    }

    pub fn control_not_found(msg: impl Into<String>) -> Self {
        Self::ControlNotFound(msg.into())
    }

    pub fn encode_failed(msg: impl Into<String>) -> Self {
        Self::EncodeFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            MaplapseError::data_unavailable("x")
                .to_string()
                .contains("data unavailable:")
        );
        assert!(
            MaplapseError::host_unreachable("x")
                .to_string()
                .contains("host unreachable:")
        );
        assert!(
            MaplapseError::control_not_found("x")
                .to_string()
                .contains("control not found:")
        );
        assert!(
            MaplapseError::encode_failed("x")
                .to_string()
                .contains("encode failed:")
        );
        assert!(
            MaplapseError::validation("x")
                .to_string()
                .contains("validation error:")
        );
    }

    #[test]
    fn capture_failed_reports_partial_progress() {
        let err = MaplapseError::CaptureFailed {
            position: 42,
            frames_captured: 21,
            message: "screenshot request failed".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("position 42"));
        assert!(text.contains("21 frame(s)"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = MaplapseError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
