//! Typed error taxonomy for the container lifecycle core.
//!
//! Library code returns `Result<T, Error>`; the CLI layer wraps these with
//! `anyhow::Context` for human-facing messages (`Error` implements
//! `std::error::Error` so `anyhow::Error: From<Error>` comes for free).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the container lifecycle core.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation requires a running (non-stopped) container.
    #[error("container is not running")]
    NotRunning,

    /// Operation requires a paused container.
    #[error("container is not paused")]
    NotPaused,

    /// Operation is illegal while the container is paused or stopped.
    #[error("container is paused or stopped")]
    PausedOrStopped,

    /// The C/R helper's reported version is below the minimum supported.
    #[error("criu version {found} is too old, need at least {minimum}")]
    VersionTooOld { found: u32, minimum: u32 },

    /// A required C/R helper feature is missing.
    #[error("criu is missing required feature: {0}")]
    FeatureMissing(String),

    /// Invalid or contradictory configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A syscall failed.
    #[error("syscall {call} failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: nix::Error,
    },

    /// The C/R helper reported `success=false`.
    #[error("criu request type {request_type} failed: errno {errno}, log {log}")]
    HelperFailure {
        request_type: String,
        errno: i32,
        log: String,
    },

    /// The init stub failed to bootstrap, or exited abnormally.
    #[error("container child failed: {0}")]
    ChildFailure(String),

    /// The thing we were about to create already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Illegal state transition.
    #[error("illegal transition from {from} via {action}")]
    IllegalTransition { from: &'static str, action: &'static str },

    /// Wrapped I/O error, with the path it concerns when known.
    #[error("io error at {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// Wrapped `nix` error with no more specific classification.
    #[error(transparent)]
    Nix(#[from] nix::Error),

    /// Catch-all for conditions with no dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: Some(path.into()),
            source,
        }
    }

    pub fn syscall(call: &'static str, source: nix::Error) -> Self {
        Error::Syscall { call, source }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { path: None, source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Other(format!("json error: {source}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Filter "the process is already gone" style termination errors, matching
/// the propagation policy in spec §7: hook failures terminate the child and
/// surface the hook error, but terminate errors matching these patterns are
/// swallowed.
pub fn is_benign_terminate_error(err: &Error) -> bool {
    let msg = err.to_string();
    ["already exited", "process done", "wait already called", "No such process"]
        .iter()
        .any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_too_old_message() {
        let err = Error::VersionTooOld {
            found: 20000,
            minimum: 30000,
        };
        let msg = err.to_string();
        assert!(msg.contains("20000"));
        assert!(msg.contains("30000"));
    }

    #[test]
    fn benign_terminate_errors_detected() {
        let err = Error::ChildFailure("process already exited".to_string());
        assert!(is_benign_terminate_error(&err));

        let err = Error::ChildFailure("bootstrap failed: ENOENT".to_string());
        assert!(!is_benign_terminate_error(&err));
    }

    #[test]
    fn helper_failure_message_contains_fields() {
        let err = Error::HelperFailure {
            request_type: "DUMP".to_string(),
            errno: 22,
            log: "/tmp/dump.log".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DUMP"));
        assert!(msg.contains("22"));
        assert!(msg.contains("/tmp/dump.log"));
    }
}
