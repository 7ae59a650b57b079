//! Session lifecycle orchestration.
//!
//! The [`SessionController`] drives one merge session through its phases:
//!
//! 1. **Start**: allocate a staging directory, copy the source tree into it,
//!    commit that as BASE, overlay the target tree and stage it, then persist
//!    the session record (phase 1).
//! 2. **Interactive window**: spawn the shell inside the staging directory,
//!    persist its pid (phase 2) and block until it exits. If the session is
//!    still recorded afterwards, the pid is dropped from the record (phase 3).
//! 3. **Finish**: run from inside that shell by a separate process. Resets
//!    the staging tree to its committed/staged state, mirrors it to the
//!    output directory, removes staging and the record, then kills the shell.
//!
//! `abort` performs the teardown of step 3 without propagating anything.
//!
//! The controller's [`SessionState`] is process-local. Each CLI invocation
//! derives it from the session record, which is the only state shared
//! between the `merge` process and the later `finish` process.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::ExitStatus;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::config::MergeConfig;
use crate::errors::{SessionError, StoreError};
use crate::mirror::{Mirror, MirrorBackend};
use crate::models::{Session, SessionState};
use crate::process::{OsSignaller, ShellCommand, ShellHandle, Signaller};
use crate::staging::StagingRepo;
use crate::status::{StatusReport, StatusReporter};
use crate::store::{FileSessionStore, SessionStore};
use crate::vcs::{GitClient, VersionControl};

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Settings the controller needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Interactive shell to spawn inside the staging directory.
    pub shell: ShellCommand,
    /// Parent directory for staging repos.
    pub staging_root: PathBuf,
    /// Prefix for staging directory names.
    pub staging_prefix: String,
}

impl ControllerSettings {
    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            shell: ShellCommand::interactive(config.shell.resolve_program()),
            staging_root: config.staging_root(),
            staging_prefix: config.session.staging_prefix.clone(),
        }
    }
}

/// Arguments to `start`. Relative paths are resolved against `cwd`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Defaults to the source directory.
    pub output: Option<PathBuf>,
    /// Directory the user invoked the command from.
    pub cwd: PathBuf,
}

/// Result of the interactive window.
#[derive(Debug)]
pub struct ShellOutcome {
    /// The session as persisted in phase 2.
    pub session: Session,
    pub exit_status: ExitStatus,
    /// Whether the record still exists, i.e. the shell exited without `finish`.
    pub still_active: bool,
}

/// Result of a successful `finish`.
#[derive(Debug, Clone)]
pub struct FinishReport {
    pub session: Session,
    pub shell_killed: bool,
}

/// Result of `abort`.
#[derive(Debug, Clone)]
pub struct AbortReport {
    /// `None` when the record was unreadable and was discarded as-is.
    pub session: Option<Session>,
    pub shell_killed: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the session state machine and mediates between the staging repo,
/// the session store and the interactive shell.
pub struct SessionController<S, V, M, P> {
    store: S,
    staging: StagingRepo<V, M>,
    signaller: P,
    settings: ControllerSettings,
    state: SessionState,
}

/// Controller wired to the real filesystem, `git`, the configured mirror
/// backend and `kill(2)`.
pub type DefaultController = SessionController<FileSessionStore, GitClient, MirrorBackend, OsSignaller>;

impl DefaultController {
    pub fn from_config(config: &MergeConfig) -> Self {
        let staging = StagingRepo::new(
            GitClient::new(&config.tools.git),
            MirrorBackend::from_config(&config.tools),
            config.identity.clone(),
        );
        SessionController::new(
            FileSessionStore::new(config.session_file()),
            staging,
            OsSignaller,
            ControllerSettings::from_config(config),
        )
    }
}

impl<S, V, M, P> SessionController<S, V, M, P>
where
    S: SessionStore,
    V: VersionControl,
    M: Mirror,
    P: Signaller,
{
    pub fn new(store: S, staging: StagingRepo<V, M>, signaller: P, settings: ControllerSettings) -> Self {
        Self {
            store,
            staging,
            signaller,
            settings,
            state: SessionState::NoSession,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Derive the state from the session record: `Active` if one exists.
    pub fn sync_state(&mut self) -> Result<SessionState, SessionError> {
        self.state = match self.store.load_optional()? {
            Some(_) => SessionState::Active,
            None => SessionState::NoSession,
        };
        Ok(self.state)
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "session state transition");
        self.state = next;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Run a whole session: build staging, then block in the shell.
    pub async fn start(&mut self, request: &StartRequest) -> Result<ShellOutcome, SessionError> {
        let session = self.prepare(request).await?;
        self.enter_shell(session).await
    }

    /// Build the staging repo and write the phase-1 record.
    ///
    /// On failure the staging directory and any partial record are removed
    /// and the state returns to `NoSession`.
    #[instrument(skip(self, request), fields(source = %request.source.display(), target = %request.target.display()))]
    pub async fn prepare(&mut self, request: &StartRequest) -> Result<Session, SessionError> {
        if let Some(existing) = self.store.load_optional()? {
            self.state = SessionState::Active;
            return Err(SessionError::AlreadyActive {
                staging: existing.staging_path,
            });
        }
        self.state = SessionState::NoSession;

        let source_dir = resolve_existing_dir("source", &request.source, &request.cwd)?;
        let target_dir = resolve_existing_dir("target", &request.target, &request.cwd)?;
        let output_dir = match &request.output {
            Some(output) => resolve_output_dir(output, &request.cwd)?,
            None => source_dir.clone(),
        };

        self.transition(SessionState::Starting)?;

        let staging_path = match StagingRepo::<V, M>::allocate(
            &self.settings.staging_root,
            &self.settings.staging_prefix,
        ) {
            Ok(path) => path,
            Err(e) => {
                self.rollback_start(None);
                return Err(e);
            }
        };

        let session = Session {
            staging_path,
            original_cwd: request.cwd.clone(),
            output_dir,
            source_dir,
            target_dir,
            shell_pid: None,
            started_at: Some(Utc::now()),
        };

        if let Err(e) = self.build_staging(&session).await {
            warn!(error = %e, "start failed; tearing down staging directory");
            self.rollback_start(Some(&session.staging_path));
            return Err(e);
        }

        info!(staging = %session.staging_path.display(), "session prepared");
        Ok(session)
    }

    async fn build_staging(&self, session: &Session) -> Result<(), SessionError> {
        let staging = &session.staging_path;
        self.staging.create(&session.source_dir, staging).await?;
        self.staging.init_version_control(staging).await?;
        self.staging.overlay(&session.target_dir, staging).await?;
        self.staging.stage_all(staging).await?;
        self.store.save(session)?;
        debug!("phase-1 session record written");
        Ok(())
    }

    fn rollback_start(&mut self, staging: Option<&Path>) {
        self.state = SessionState::Aborting;
        if let Some(staging) = staging {
            if let Err(e) = self.staging.destroy(staging) {
                warn!(error = %e, path = %staging.display(), "could not remove staging directory");
            }
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "could not clear session record");
        }
        self.state = SessionState::NoSession;
    }

    /// Spawn the shell inside staging, record its pid and wait for it.
    #[instrument(skip(self, session), fields(staging = %session.staging_path.display()))]
    pub async fn enter_shell(&mut self, mut session: Session) -> Result<ShellOutcome, SessionError> {
        if self.state != SessionState::Starting {
            return Err(SessionError::InvalidStateTransition {
                from: self.state.to_string(),
                to: SessionState::Active.to_string(),
            });
        }

        let running = match self.settings.shell.spawn(&session.staging_path) {
            Ok(running) => running,
            Err(e) => {
                self.rollback_start(Some(&session.staging_path));
                return Err(e.into());
            }
        };

        session.shell_pid = running.handle();
        if let Err(e) = self.store.save(&session) {
            warn!(error = %e, "could not record shell pid; terminating shell");
            self.terminate_shell(session.shell_pid);
            if let Err(wait_err) = running.wait().await {
                debug!(error = %wait_err, "shell wait failed after termination");
            }
            self.rollback_start(Some(&session.staging_path));
            return Err(e.into());
        }
        self.transition(SessionState::Active)?;
        info!(pid = ?session.shell_pid.map(|h| h.pid()), "session active");

        let exit_status = running.wait().await?;
        let still_active = self.release_shell(&session);
        if !still_active {
            self.state = SessionState::NoSession;
        }

        Ok(ShellOutcome {
            session,
            exit_status,
            still_active,
        })
    }

    /// Phase 3: the shell is gone, so its pid must not be signalled later.
    /// Returns whether this session's record still exists.
    fn release_shell(&self, session: &Session) -> bool {
        let current = match self.store.load_optional() {
            Ok(Some(current)) => current,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "could not re-read session record after shell exit");
                return true;
            }
        };
        if !current.is_staging(&session.staging_path) {
            return false;
        }
        if current.shell_pid.is_some() && current.shell_pid == session.shell_pid {
            let mut cleared = current;
            cleared.shell_pid = None;
            if let Err(e) = self.store.save(&cleared) {
                warn!(error = %e, "could not clear shell pid from session record");
            } else {
                debug!("shell pid removed from session record");
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Finish
    // -----------------------------------------------------------------------

    /// Propagate the staged tree to the output directory and end the session.
    ///
    /// `cwd` must be the staging directory itself. Unstaged edits and
    /// untracked files in staging are discarded first.
    #[instrument(skip(self), fields(cwd = %cwd.display()))]
    pub async fn finish(&mut self, cwd: &Path) -> Result<FinishReport, SessionError> {
        let session = self.store.load()?;
        self.state = SessionState::Active;

        if canonical_or_self(cwd) != canonical_or_self(&session.staging_path) {
            return Err(SessionError::WrongLocation {
                expected: session.staging_path.clone(),
                actual: cwd.to_path_buf(),
            });
        }

        if !session.staging_path.is_dir() {
            self.transition(SessionState::Aborting)?;
            self.store.clear()?;
            self.transition(SessionState::NoSession)?;
            warn!(staging = %session.staging_path.display(), "staging directory vanished; session cleared");
            return Err(SessionError::StagingMissing(session.staging_path));
        }

        self.transition(SessionState::Finishing)?;
        let staging = &session.staging_path;
        let output = &session.output_dir;

        fs::create_dir_all(output).map_err(|e| SessionError::io(output, e))?;
        self.staging.reset_to_committed(staging).await?;
        self.staging.overlay(staging, output).await?;
        info!(output = %output.display(), "propagated staging tree to output");

        self.staging.destroy(staging)?;
        self.store.clear()?;
        self.transition(SessionState::NoSession)?;

        let shell_killed = self.terminate_shell(session.shell_pid);
        Ok(FinishReport {
            session,
            shell_killed,
        })
    }

    // -----------------------------------------------------------------------
    // Abort
    // -----------------------------------------------------------------------

    /// Discard the session without propagating. Works from any directory.
    ///
    /// An unreadable record is removed as-is.
    #[instrument(skip(self))]
    pub fn abort(&mut self) -> Result<AbortReport, SessionError> {
        let session = match self.store.load() {
            Ok(session) => session,
            Err(StoreError::Corrupt { path, detail }) => {
                warn!(path = %path, detail = %detail, "discarding unreadable session record");
                self.store.clear()?;
                self.state = SessionState::NoSession;
                return Ok(AbortReport {
                    session: None,
                    shell_killed: false,
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.state = SessionState::Active;
        self.transition(SessionState::Aborting)?;

        self.staging.destroy(&session.staging_path)?;
        self.store.clear()?;
        self.transition(SessionState::NoSession)?;
        info!(staging = %session.staging_path.display(), "session aborted");

        let shell_killed = self.terminate_shell(session.shell_pid);
        Ok(AbortReport {
            session: Some(session),
            shell_killed,
        })
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Read-only report on the active session.
    pub async fn status(&self) -> Result<StatusReport, SessionError> {
        StatusReporter::new(&self.store, &self.staging, &self.signaller)
            .report()
            .await
    }

    /// Best-effort SIGKILL. Never fails the caller.
    fn terminate_shell(&self, handle: Option<ShellHandle>) -> bool {
        let Some(handle) = handle else {
            return false;
        };
        if !self.signaller.is_alive(handle) {
            debug!(pid = handle.pid(), "recorded shell already gone");
            return false;
        }
        match self.signaller.kill(handle) {
            Ok(()) => true,
            Err(e) => {
                warn!(pid = handle.pid(), error = %e, "could not terminate interactive shell");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn resolve_existing_dir(label: &str, path: &Path, cwd: &Path) -> Result<PathBuf, SessionError> {
    if path.as_os_str().is_empty() {
        return Err(SessionError::Validation(format!("{} directory must not be empty", label)));
    }
    let abs = absolutize(path, cwd);
    match fs::metadata(&abs) {
        Ok(meta) if meta.is_dir() => abs.canonicalize().map_err(|e| SessionError::io(&abs, e)),
        Ok(_) => Err(SessionError::Validation(format!(
            "{} is not a directory: {}",
            label,
            abs.display()
        ))),
        Err(_) => Err(SessionError::Validation(format!(
            "{} directory does not exist: {}",
            label,
            abs.display()
        ))),
    }
}

/// The output directory may not exist yet; `finish` creates it.
fn resolve_output_dir(path: &Path, cwd: &Path) -> Result<PathBuf, SessionError> {
    if path.as_os_str().is_empty() {
        return Err(SessionError::Validation("output directory must not be empty".into()));
    }
    let abs = absolutize(path, cwd);
    match fs::metadata(&abs) {
        Ok(meta) if meta.is_dir() => abs.canonicalize().map_err(|e| SessionError::io(&abs, e)),
        Ok(_) => Err(SessionError::Validation(format!(
            "output exists and is not a directory: {}",
            abs.display()
        ))),
        Err(_) => Ok(normalize(&abs)),
    }
}

/// Lexically drop `.` and resolve `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| normalize(path))
}
