//! Read-only view of the active session.

use tracing::{debug, warn};

use crate::errors::SessionError;
use crate::mirror::Mirror;
use crate::models::Session;
use crate::process::Signaller;
use crate::staging::StagingRepo;
use crate::store::SessionStore;
use crate::vcs::VersionControl;

/// Live working-tree state of the staging repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// No modifications or untracked files.
    Clean,
    /// One `git status --short` line per entry.
    Changes(Vec<String>),
    /// The staging directory no longer exists.
    StagingMissing,
    /// The status query failed; the reason is informational only.
    Unavailable(String),
}

/// Everything `status` reports.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub session: Session,
    /// `Some(alive)` when a shell pid is recorded.
    pub shell_alive: Option<bool>,
    pub live: LiveStatus,
}

/// Inspects the session store and the staging repo without mutating either.
pub struct StatusReporter<'a, S, V, M, P> {
    store: &'a S,
    staging: &'a StagingRepo<V, M>,
    signaller: &'a P,
}

impl<'a, S, V, M, P> StatusReporter<'a, S, V, M, P>
where
    S: SessionStore,
    V: VersionControl,
    M: Mirror,
    P: Signaller,
{
    pub fn new(store: &'a S, staging: &'a StagingRepo<V, M>, signaller: &'a P) -> Self {
        Self {
            store,
            staging,
            signaller,
        }
    }

    /// Build a report. Fails only if there is no active session.
    pub async fn report(&self) -> Result<StatusReport, SessionError> {
        let session = self.store.load()?;
        let shell_alive = session.shell_pid.map(|h| self.signaller.is_alive(h));

        let live = if !session.staging_path.is_dir() {
            LiveStatus::StagingMissing
        } else {
            match self.staging.status_short(&session.staging_path).await {
                Ok(out) => parse_short_status(&out),
                Err(e) => {
                    warn!(error = %e, "live status unavailable");
                    LiveStatus::Unavailable(e.to_string())
                }
            }
        };
        debug!(?live, "status collected");

        Ok(StatusReport {
            session,
            shell_alive,
            live,
        })
    }
}

fn parse_short_status(output: &str) -> LiveStatus {
    let lines: Vec<String> = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        LiveStatus::Clean
    } else {
        LiveStatus::Changes(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_status() {
        assert_eq!(parse_short_status(""), LiveStatus::Clean);
        assert_eq!(parse_short_status("\n"), LiveStatus::Clean);
        assert_eq!(
            parse_short_status(" M a.txt\n?? b.txt\n"),
            LiveStatus::Changes(vec![" M a.txt".into(), "?? b.txt".into()])
        );
    }
}
