//! Mirror backend that shells out to `rsync`.

use std::ffi::OsString;
use std::path::Path;

use tracing::{info, instrument};

use super::Mirror;
use crate::command::run_tool;
use crate::errors::ToolError;

/// `rsync -a --delete` with one `--exclude` per excluded name.
#[derive(Debug, Clone)]
pub struct RsyncMirror {
    binary: String,
}

impl RsyncMirror {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Full argument list for mirroring `src` into `dst`.
    pub fn args(src: &Path, dst: &Path, exclude: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-a".into(), "--delete".into()];
        for name in exclude {
            args.push(format!("--exclude={}", name).into());
        }
        args.push(with_trailing_slash(src));
        args.push(with_trailing_slash(dst));
        args
    }
}

impl Default for RsyncMirror {
    fn default() -> Self {
        Self::new("rsync")
    }
}

/// `dir/`: rsync copies the directory's contents rather than the directory.
fn with_trailing_slash(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_os_string();
    if !s.to_string_lossy().ends_with('/') {
        s.push("/");
    }
    s
}

impl Mirror for RsyncMirror {
    #[instrument(skip(self), fields(src = %src.display(), dst = %dst.display()))]
    async fn mirror(&self, src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), ToolError> {
        let args = Self::args(src, dst, exclude);
        run_tool(&self.binary, &args, None).await?;
        info!("rsync mirror completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsync_available() -> bool {
        std::process::Command::new("rsync")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_args_use_trailing_slashes() {
        let args = RsyncMirror::args(Path::new("/a/src"), Path::new("/b/dst/"), &[".git"]);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-a", "--delete", "--exclude=.git", "/a/src/", "/b/dst/"]);
    }

    #[tokio::test]
    async fn test_rsync_mirror_deletes_and_preserves_excluded() {
        if !rsync_available() {
            eprintln!("rsync not installed, skipping");
            return;
        }
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("keep.txt"), "new").unwrap();
        std::fs::write(dst.path().join("keep.txt"), "old").unwrap();
        std::fs::write(dst.path().join("stale.txt"), "gone").unwrap();
        std::fs::create_dir(dst.path().join(".git")).unwrap();
        std::fs::write(dst.path().join(".git/HEAD"), "ref").unwrap();

        RsyncMirror::default()
            .mirror(src.path(), dst.path(), &[".git"])
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(dst.path().join("keep.txt")).unwrap(), "new");
        assert!(!dst.path().join("stale.txt").exists());
        assert_eq!(std::fs::read_to_string(dst.path().join(".git/HEAD")).unwrap(), "ref");
    }

    #[tokio::test]
    async fn test_rsync_missing_source_fails() {
        if !rsync_available() {
            eprintln!("rsync not installed, skipping");
            return;
        }
        let dst = tempfile::tempdir().unwrap();
        let err = RsyncMirror::default()
            .mirror(&dst.path().join("missing"), dst.path(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::CommandFailed { .. }));
    }
}
