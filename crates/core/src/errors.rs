//! Error types for the dir-merge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and the
//! top-level [`SessionError`] carries the taxonomy every CLI command reports:
//! validation, missing or duplicate sessions, wrong location, a vanished
//! staging directory, external tool failures and filesystem failures.

use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type returned by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A user-supplied path is unusable.
    #[error("{0}")]
    Validation(String),

    /// `merge` was requested while a session record already exists.
    #[error(
        "a merge session is already active (staging repo: {}); run 'dir-merge finish' from inside it or 'dir-merge abort' to discard it",
        .staging.display()
    )]
    AlreadyActive { staging: PathBuf },

    /// `finish` was invoked outside the staging directory.
    #[error(
        "finish must be run from within the staging repository\nExpected: {}\nCurrent:  {}",
        .expected.display(),
        .actual.display()
    )]
    WrongLocation { expected: PathBuf, actual: PathBuf },

    /// The staging directory disappeared out-of-band.
    #[error("staging repository not found: {}; session cleared, nothing was applied", .0.display())]
    StagingMissing(PathBuf),

    /// A state-machine transition was invalid.
    #[error("invalid session state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A version-control, mirror or shell subprocess failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The session record could not be read, written or found.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A filesystem operation failed.
    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error means "there is no session to operate on".
    pub fn is_no_active_session(&self) -> bool {
        matches!(self, Self::Store(StoreError::NoActiveSession))
    }
}

// ---------------------------------------------------------------------------
// External tool errors
// ---------------------------------------------------------------------------

/// Errors from external subprocesses (`git`, `rsync`, the interactive shell).
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary was not found on `$PATH`.
    #[error("{0} binary not found; is it installed and on PATH?")]
    BinaryNotFound(String),

    /// A command exited with a non-zero status.
    #[error("{tool} command failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        stderr: String,
    },

    /// The in-process mirror backend hit a filesystem error.
    #[error("mirror failed at '{}': {source}", .path.display())]
    MirrorFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O wrapper (spawn, wait).
    #[error("tool I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Session store errors
// ---------------------------------------------------------------------------

/// Errors from the single-slot session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The slot is empty.
    #[error("no active merge session")]
    NoActiveSession,

    /// The slot exists but does not hold a valid record.
    #[error("session record at '{path}' is unreadable: {detail}")]
    Corrupt { path: String, detail: String },

    /// Generic I/O error reading or writing the slot.
    #[error("session store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SessionError::WrongLocation {
            expected: PathBuf::from("/tmp/dir-merge-abc"),
            actual: PathBuf::from("/home/me"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Expected: /tmp/dir-merge-abc"));
        assert!(msg.contains("Current:  /home/me"));

        let err = ToolError::CommandFailed {
            tool: "rsync".into(),
            exit_code: 23,
            stderr: "partial transfer".into(),
        };
        assert_eq!(
            err.to_string(),
            "rsync command failed (exit 23): partial transfer"
        );

        let err = ConfigError::InvalidValue {
            field: "tools.git".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("tools.git"));
    }

    #[test]
    fn test_session_error_from_subsystem() {
        let err: SessionError = StoreError::NoActiveSession.into();
        assert!(err.is_no_active_session());
        assert_eq!(err.to_string(), "no active merge session");

        let err: SessionError = ToolError::BinaryNotFound("git".into()).into();
        assert!(matches!(err, SessionError::Tool(_)));
        assert!(!err.is_no_active_session());
    }
}
