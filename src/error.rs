//! Error types for proxyfleet

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to write config {}: {source}", .path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Settings parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Port range starting at {base} cannot hold {count} ports")]
    PortRange { base: u16, count: usize },

    #[error("Source directory not found: {}", .0.display())]
    SourceDir(PathBuf),

    #[error("Worker pool needs at least one worker")]
    InvalidConcurrency,

    #[error("Signal handler error: {0}")]
    Signal(String),

    #[error("Session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// Classification of a failed container runtime call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// Name or port already taken, object already exists
    Conflict,
    /// Container, image or network does not exist
    NotFound,
    /// Object still referenced (e.g. network with active endpoints)
    InUse,
    /// Daemon unreachable
    Unavailable,
    Other,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeErrorKind::Conflict => "conflict",
            RuntimeErrorKind::NotFound => "not found",
            RuntimeErrorKind::InUse => "in use",
            RuntimeErrorKind::Unavailable => "unavailable",
            RuntimeErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Unavailable, message)
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == RuntimeErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RuntimeErrorKind::NotFound
    }
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::conflict("name \"a\" is already in use");
        assert_eq!(err.to_string(), "conflict: name \"a\" is already in use");
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_fleet_error_from_runtime() {
        let err: FleetError = RuntimeError::unavailable("daemon down").into();
        assert!(err.to_string().contains("unavailable"));
    }
}
