//! Data models for dir-merge.
//!
//! [`Session`] is the persisted unit of work; [`SessionState`] is the
//! controller's lifecycle state machine.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process::ShellHandle;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The active merge session, as written to the session store.
///
/// Paths are stored as absolute strings. `shell_pid` is absent in the
/// phase-1 record and filled in once the interactive shell has been spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Staging repo path; doubles as the session identifier.
    pub staging_path: PathBuf,
    /// Working directory `merge` was invoked from.
    pub original_cwd: PathBuf,
    /// Where `finish` propagates the resolved tree.
    pub output_dir: PathBuf,
    /// Base tree, committed as BASE.
    pub source_dir: PathBuf,
    /// Overlay tree.
    pub target_dir: PathBuf,
    /// Interactive shell, once spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_pid: Option<ShellHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The session identifier shown to the user: the staging directory name.
    pub fn id(&self) -> String {
        self.staging_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.staging_path.display().to_string())
    }

    /// Whether `path` names this session's staging directory.
    pub fn is_staging(&self, path: &Path) -> bool {
        self.staging_path == path
    }
}

// ---------------------------------------------------------------------------
// Session state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Starting,
    Active,
    Finishing,
    Aborting,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (NoSession, Starting)
                | (Starting, Active)
                | (Starting, Aborting)
                | (Active, Finishing)
                | (Active, Aborting)
                | (Finishing, NoSession)
                | (Aborting, NoSession)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSession => "no_session",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Finishing => "finishing",
            Self::Aborting => "aborting",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            staging_path: PathBuf::from("/tmp/dir-merge-abc123"),
            original_cwd: PathBuf::from("/home/me"),
            output_dir: PathBuf::from("/home/me/out"),
            source_dir: PathBuf::from("/home/me/src"),
            target_dir: PathBuf::from("/home/me/tgt"),
            shell_pid: None,
            started_at: None,
        }
    }

    #[test]
    fn test_session_id_is_staging_dir_name() {
        assert_eq!(sample().id(), "dir-merge-abc123");
    }

    #[test]
    fn test_phase_one_record_has_no_pid() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["staging_path"], "/tmp/dir-merge-abc123");
        assert_eq!(json["source_dir"], "/home/me/src");
        assert!(json.get("shell_pid").is_none());
    }

    #[test]
    fn test_phase_two_record_pid_is_string() {
        let mut session = sample();
        session.shell_pid = ShellHandle::new(987);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["shell_pid"], "987");

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(NoSession.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Active));
        assert!(Active.can_transition_to(Finishing));
        assert!(Finishing.can_transition_to(NoSession));
        assert!(Active.can_transition_to(Aborting));
        assert!(Aborting.can_transition_to(NoSession));

        assert!(!NoSession.can_transition_to(Finishing));
        assert!(!NoSession.can_transition_to(Active));
        assert!(!Active.can_transition_to(Starting));
        assert!(!Aborting.can_transition_to(Active));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::NoSession.to_string(), "no_session");
        assert_eq!(SessionState::Finishing.to_string(), "finishing");
    }
}
