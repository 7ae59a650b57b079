//! Shared subprocess runner for the external tools.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ToolError;

/// Run `program args...`, optionally in `cwd`, capturing output.
///
/// Returns stdout on success. A non-zero exit becomes
/// [`ToolError::CommandFailed`]; a missing binary becomes
/// [`ToolError::BinaryNotFound`].
pub(crate) async fn run_tool<S: AsRef<std::ffi::OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<String, ToolError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(
        cmd = %format!(
            "{} {}",
            program,
            args.iter()
                .map(|a| a.as_ref().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        cwd = ?cwd,
        "running external command"
    );

    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::BinaryNotFound(program.to_string())
        } else {
            ToolError::IoError(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        warn!(program, exit_code, %stderr, "external command failed");
        return Err(ToolError::CommandFailed {
            tool: program.to_string(),
            exit_code,
            stderr,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
