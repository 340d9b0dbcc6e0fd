//! Central error types for Lupe.
//!
//! Per-frame failures (`InvalidRegion`, `GpuDraw`) are recovered where they
//! happen by skipping the frame. Session-control misuse is surfaced to the
//! caller. Nothing in here is meant to terminate the process.

use std::fmt;

use thiserror::Error;

/// Pipeline stage a shader source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Main error type for magnifier operations.
#[derive(Error, Debug)]
pub enum MagnifierError {
    /// Degenerate crop geometry; the frame is dropped
    #[error("Invalid region: {reason}")]
    InvalidRegion { reason: String },

    /// Capture token rejected or capture source could not be opened
    #[error("Capture session unavailable: {0}")]
    SessionUnavailable(String),

    /// `start` called while a capture session is already running
    #[error("Capture already running")]
    AlreadyCapturing,

    /// Shader asset id not present in the asset store
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// Shader asset is not a valid two-section document
    #[error("Malformed shader asset '{asset}': {reason}")]
    ShaderParse { asset: String, reason: String },

    /// A single shader stage failed to compile
    #[error("Shader compile failed ({stage} stage): {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    /// Stages compiled but could not be linked into a program
    #[error("Shader link failed: {0}")]
    ShaderLink(String),

    /// GPU setup or resource error (wgpu)
    #[error("GPU error: {0}")]
    GpuError(String),

    /// A draw call failed; the cycle is skipped
    #[error("GPU draw error: {0}")]
    GpuDraw(String),

    /// Capture session ended out-of-band (permission revoked, display gone)
    #[error("Capture session revoked: {0}")]
    ExternalRevocation(String),

    /// Configuration value rejected
    #[error("Invalid configuration for {field}: {reason}")]
    Config { field: String, reason: String },

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding/decoding failed
    #[error("Image error: {0}")]
    Image(String),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl MagnifierError {
    /// Shorthand for an `InvalidRegion` error.
    pub fn invalid_region(reason: impl Into<String>) -> Self {
        MagnifierError::InvalidRegion {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `Config` error.
    pub fn config(field: &str, reason: impl Into<String>) -> Self {
        MagnifierError::Config {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors confined to a single frame: log, skip, keep going.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            MagnifierError::InvalidRegion { .. } | MagnifierError::GpuDraw(_)
        )
    }

    /// Shader failures leave the previously active program in place.
    pub fn is_shader_failure(&self) -> bool {
        matches!(
            self,
            MagnifierError::ShaderNotFound(_)
                | MagnifierError::ShaderParse { .. }
                | MagnifierError::ShaderCompile { .. }
                | MagnifierError::ShaderLink(_)
        )
    }
}

impl From<image::ImageError> for MagnifierError {
    fn from(err: image::ImageError) -> Self {
        MagnifierError::Image(err.to_string())
    }
}

impl From<String> for MagnifierError {
    fn from(msg: String) -> Self {
        MagnifierError::Other(msg)
    }
}

impl From<&str> for MagnifierError {
    fn from(msg: &str) -> Self {
        MagnifierError::Other(msg.to_string())
    }
}

/// Extension trait for adding context to Results.
///
/// Similar to anyhow's `Context` trait, this allows chaining context
/// information onto errors for better debugging.
pub trait ResultExt<T> {
    /// Add context to an error, converting it to MagnifierError::Other.
    fn context(self, msg: &str) -> MagnifierResult<T>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> MagnifierResult<T>;
}

impl<T, E: fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> MagnifierResult<T> {
        self.map_err(|e| MagnifierError::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> MagnifierResult<T> {
        self.map_err(|e| MagnifierError::Other(format!("{}: {}", f(), e)))
    }
}

/// Extension trait for adding context to Option types.
pub trait OptionExt<T> {
    /// Convert None to MagnifierError::Other with the given message.
    fn context(self, msg: &str) -> MagnifierResult<T>;

    /// Convert None to MagnifierError::Other with a lazily evaluated message.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> MagnifierResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, msg: &str) -> MagnifierResult<T> {
        self.ok_or_else(|| MagnifierError::Other(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> MagnifierResult<T> {
        self.ok_or_else(|| MagnifierError::Other(f()))
    }
}

/// Type alias for Results using MagnifierError.
pub type MagnifierResult<T> = Result<T, MagnifierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MagnifierError::invalid_region("crop width is 0");
        assert_eq!(err.to_string(), "Invalid region: crop width is 0");

        let err = MagnifierError::ShaderCompile {
            stage: ShaderStage::Fragment,
            log: "expected ';'".to_string(),
        };
        assert!(err.to_string().contains("fragment stage"));
        assert!(err.to_string().contains("expected ';'"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MagnifierError = io_err.into();
        assert!(matches!(err, MagnifierError::Io(_)));
    }

    #[test]
    fn test_from_string() {
        let err: MagnifierError = "test error".into();
        assert!(matches!(err, MagnifierError::Other(_)));
    }

    #[test]
    fn test_classification() {
        assert!(MagnifierError::invalid_region("x").is_frame_local());
        assert!(MagnifierError::GpuDraw("lost".into()).is_frame_local());
        assert!(!MagnifierError::AlreadyCapturing.is_frame_local());
        assert!(!MagnifierError::SessionUnavailable("bad token".into()).is_frame_local());

        assert!(MagnifierError::ShaderNotFound("crt".into()).is_shader_failure());
        assert!(MagnifierError::ShaderLink("location 2".into()).is_shader_failure());
        assert!(!MagnifierError::GpuError("no adapter".into()).is_shader_failure());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<(), &str> = Err("original error");
        let with_context = result.context("operation failed");

        assert!(matches!(with_context, Err(MagnifierError::Other(_))));
        let msg = with_context.unwrap_err().to_string();
        assert!(msg.contains("operation failed"));
        assert!(msg.contains("original error"));
    }

    #[test]
    fn test_result_ext_with_context() {
        let result: Result<(), &str> = Err("inner");
        let with_context = result.with_context(|| format!("ctx-{}", 42));

        let msg = with_context.unwrap_err().to_string();
        assert!(msg.contains("ctx-42"));
        assert!(msg.contains("inner"));
    }

    #[test]
    fn test_result_ext_ok_passthrough() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(result.context("should not appear").unwrap(), 42);
    }

    #[test]
    fn test_option_ext_context() {
        let opt: Option<i32> = None;
        let result = opt.context("value was missing");

        assert!(matches!(result, Err(MagnifierError::Other(_))));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("value was missing"));
    }

    #[test]
    fn test_option_ext_with_context() {
        let opt: Option<i32> = None;
        let result = opt.with_context(|| format!("missing monitor {}", 5));
        assert!(result.unwrap_err().to_string().contains("missing monitor 5"));
    }
}
