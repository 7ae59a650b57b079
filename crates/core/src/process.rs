//! The interactive shell and the back-reference to it.
//!
//! `merge` spawns the shell and blocks on it; `finish` runs later as a
//! separate process *inside* that shell and tears it down by pid. The two
//! invocations share nothing but the persisted [`ShellHandle`], so the handle
//! is a plain value rather than an owned child.

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::ToolError;

/// Environment variable exported into the interactive shell.
pub const SESSION_ENV_VAR: &str = "DIR_MERGE_SESSION";

// ---------------------------------------------------------------------------
// Shell handle
// ---------------------------------------------------------------------------

/// Persisted reference to the interactive shell process.
///
/// Serialized as a decimal string in the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellHandle {
    pid: u32,
}

impl ShellHandle {
    /// Create a handle for `pid`. Returns `None` unless `pid` is a positive
    /// `pid_t`: 0 addresses the process group and values that wrap to -1
    /// address every process the caller may signal.
    pub fn new(pid: u32) -> Option<Self> {
        let raw = i32::try_from(pid).ok()?;
        (raw > 0).then_some(Self { pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(unix)]
    fn raw(&self) -> Option<libc::pid_t> {
        libc::pid_t::try_from(self.pid).ok().filter(|pid| *pid > 0)
    }
}

impl fmt::Display for ShellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

impl Serialize for ShellHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pid.to_string())
    }
}

impl<'de> Deserialize<'de> for ShellHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        let pid = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|e| serde::de::Error::custom(format!("invalid shell pid '{}': {}", text, e)))?,
            Raw::Number(n) => n,
        };
        u32::try_from(pid)
            .ok()
            .and_then(ShellHandle::new)
            .ok_or_else(|| {
                serde::de::Error::custom(format!("shell pid must be a positive pid_t, got {}", pid))
            })
    }
}

// ---------------------------------------------------------------------------
// Signalling
// ---------------------------------------------------------------------------

/// Liveness query and forceful termination for a recorded shell.
pub trait Signaller {
    /// Whether a process with this pid currently exists.
    fn is_alive(&self, handle: ShellHandle) -> bool;

    /// Send an uncatchable kill signal.
    fn kill(&self, handle: ShellHandle) -> std::io::Result<()>;
}

impl<P: Signaller + ?Sized> Signaller for &P {
    fn is_alive(&self, handle: ShellHandle) -> bool {
        (**self).is_alive(handle)
    }

    fn kill(&self, handle: ShellHandle) -> std::io::Result<()> {
        (**self).kill(handle)
    }
}

/// [`Signaller`] backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignaller;

impl Signaller for OsSignaller {
    fn is_alive(&self, handle: ShellHandle) -> bool {
        #[cfg(unix)]
        {
            let Some(pid) = handle.raw() else {
                return false;
            };
            // Signal 0 only checks for existence.
            unsafe { libc::kill(pid, 0) == 0 }
        }

        #[cfg(not(unix))]
        {
            let _ = handle;
            false
        }
    }

    fn kill(&self, handle: ShellHandle) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let pid = handle.raw().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("refusing to signal pid {}", handle.pid),
                )
            })?;
            let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
            if rc == 0 {
                info!(pid = handle.pid, "sent SIGKILL to interactive shell");
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        }

        #[cfg(not(unix))]
        {
            let _ = handle;
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "process signalling is only supported on unix",
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Shell launcher
// ---------------------------------------------------------------------------

/// Program and arguments used for the interactive window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    /// An interactive shell with no extra arguments.
    pub fn interactive(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Spawn the shell in `cwd`, inheriting the terminal.
    pub fn spawn(&self, cwd: &Path) -> Result<RunningShell, ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(cwd)
            .env(SESSION_ENV_VAR, cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        debug!(program = %self.program, cwd = %cwd.display(), "spawning interactive shell");
        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::BinaryNotFound(self.program.clone())
            } else {
                ToolError::IoError(e)
            }
        })?;

        let handle = child.id().and_then(ShellHandle::new);
        info!(pid = ?handle.map(|h| h.pid()), "interactive shell started");
        Ok(RunningShell { child, handle })
    }
}

/// A spawned shell owned by the `merge` invocation.
#[derive(Debug)]
pub struct RunningShell {
    child: Child,
    handle: Option<ShellHandle>,
}

impl RunningShell {
    pub fn handle(&self) -> Option<ShellHandle> {
        self.handle
    }

    /// Block until the shell exits.
    ///
    /// Ctrl+C typed inside the shell reaches this process too (same
    /// foreground process group); it is swallowed so only the shell reacts.
    pub async fn wait(mut self) -> Result<ExitStatus, ToolError> {
        loop {
            tokio::select! {
                status = self.child.wait() => {
                    let status = status?;
                    info!(?status, "interactive shell exited");
                    return Ok(status);
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "failed to listen for Ctrl+C; waiting without it");
                        let status = self.child.wait().await?;
                        return Ok(status);
                    }
                    debug!("ignoring SIGINT while the interactive shell is running");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_rejects_zero() {
        assert!(ShellHandle::new(0).is_none());
        assert_eq!(ShellHandle::new(42).unwrap().pid(), 42);
    }

    #[test]
    fn test_handle_rejects_pids_outside_pid_t() {
        // Would become kill(-1, ..) or a negative group id after a cast.
        assert!(ShellHandle::new(u32::MAX).is_none());
        assert!(ShellHandle::new(1 << 31).is_none());
        assert_eq!(ShellHandle::new(i32::MAX as u32).unwrap().pid(), i32::MAX as u32);

        assert!(serde_json::from_str::<ShellHandle>("\"4294967295\"").is_err());
        assert!(serde_json::from_str::<ShellHandle>("\"2147483648\"").is_err());
        assert!(serde_json::from_str::<ShellHandle>("4294967295").is_err());
    }

    #[test]
    fn test_handle_serializes_as_string() {
        let handle = ShellHandle::new(4321).unwrap();
        assert_eq!(serde_json::to_string(&handle).unwrap(), "\"4321\"");

        let parsed: ShellHandle = serde_json::from_str("\"4321\"").unwrap();
        assert_eq!(parsed, handle);
        let parsed: ShellHandle = serde_json::from_str("4321").unwrap();
        assert_eq!(parsed, handle);
    }

    #[test]
    fn test_handle_rejects_non_positive() {
        assert!(serde_json::from_str::<ShellHandle>("\"-1\"").is_err());
        assert!(serde_json::from_str::<ShellHandle>("\"0\"").is_err());
        assert!(serde_json::from_str::<ShellHandle>("\"abc\"").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_os_signaller_sees_own_process() {
        let me = ShellHandle::new(std::process::id()).unwrap();
        assert!(OsSignaller.is_alive(me));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_runs_in_cwd_with_session_env() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellCommand {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                format!("pwd > out.txt; printf %s \"${}\" > env.txt", SESSION_ENV_VAR),
            ],
        };
        let running = shell.spawn(dir.path()).unwrap();
        assert!(running.handle().is_some());
        let status = running.wait().await.unwrap();
        assert!(status.success());

        let env = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert_eq!(env, dir.path().display().to_string());
        assert!(dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellCommand::interactive("/definitely/not/a/shell");
        let err = shell.spawn(dir.path()).unwrap_err();
        assert!(matches!(err, ToolError::BinaryNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_terminates_child() {
        let dir = tempfile::tempdir().unwrap();
        let shell = ShellCommand {
            program: "sleep".into(),
            args: vec!["30".into()],
        };
        let running = shell.spawn(dir.path()).unwrap();
        let handle = running.handle().unwrap();
        assert!(OsSignaller.is_alive(handle));

        OsSignaller.kill(handle).unwrap();
        let status = running.wait().await.unwrap();
        assert!(!status.success());
    }
}
