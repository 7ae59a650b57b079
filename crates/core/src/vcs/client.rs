//! `git` CLI client.

use std::path::Path;

use tracing::{info, instrument};

use super::VersionControl;
use crate::command::run_tool;
use crate::errors::ToolError;

/// Client for the `git` binary.
#[derive(Debug, Clone)]
pub struct GitClient {
    binary: String,
}

impl GitClient {
    /// Create a client invoking `binary` (usually just `"git"`).
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<String, ToolError> {
        run_tool(&self.binary, args, Some(dir)).await
    }
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new("git")
    }
}

impl VersionControl for GitClient {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn init(&self, dir: &Path) -> Result<(), ToolError> {
        self.run_git(dir, &["init", "--quiet"]).await?;
        info!("initialized git repository");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn set_identity(&self, dir: &Path, name: &str, email: &str) -> Result<(), ToolError> {
        self.run_git(dir, &["config", "user.email", email]).await?;
        self.run_git(dir, &["config", "user.name", name]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn add_all(&self, dir: &Path) -> Result<(), ToolError> {
        // --force: ignore rules must not decide what gets staged.
        self.run_git(dir, &["add", "--all", "--force", "."]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn commit(&self, dir: &Path, message: &str) -> Result<(), ToolError> {
        // --allow-empty: an empty source tree still yields a BASE commit.
        self.run_git(
            dir,
            &[
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "--allow-empty",
                "-m",
                message,
            ],
        )
        .await?;
        info!(message, "created commit");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn checkout_index(&self, dir: &Path) -> Result<(), ToolError> {
        // `checkout-index` instead of `checkout -- .`, which errors out when
        // the index is empty.
        self.run_git(dir, &["checkout-index", "--all", "--force"]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn clean(&self, dir: &Path) -> Result<(), ToolError> {
        // -x: ignored files are untracked too.
        self.run_git(dir, &["clean", "-f", "-d", "-x", "--quiet"]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn status_short(&self, dir: &Path) -> Result<String, ToolError> {
        // No optional locks: a status query must not refresh the index.
        self.run_git(dir, &["--no-optional-locks", "status", "--short"])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) -> GitClient {
        let git = GitClient::default();
        git.init(dir).await.unwrap();
        git.set_identity(dir, "dir-merge", "dir-merge@local").await.unwrap();
        git
    }

    #[tokio::test]
    async fn test_commit_and_status() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1").unwrap();
        let git = init_repo(dir.path()).await;
        git.add_all(dir.path()).await.unwrap();
        git.commit(dir.path(), "BASE").await.unwrap();
        assert_eq!(git.status_short(dir.path()).await.unwrap(), "");

        let repo = git2::Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("BASE\n"));
        assert_eq!(head.author().email(), Some("dir-merge@local"));

        std::fs::write(dir.path().join("a.txt"), "2").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        let status = git.status_short(dir.path()).await.unwrap();
        assert!(status.contains(" M a.txt"));
        assert!(status.contains("?? b.txt"));
    }

    #[tokio::test]
    async fn test_empty_tree_commit() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path()).await;
        git.add_all(dir.path()).await.unwrap();
        git.commit(dir.path(), "BASE").await.unwrap();
        git.checkout_index(dir.path()).await.unwrap();
        git.clean(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkout_index_and_clean() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tracked.txt"), "base").unwrap();
        let git = init_repo(dir.path()).await;
        git.add_all(dir.path()).await.unwrap();
        git.commit(dir.path(), "BASE").await.unwrap();

        std::fs::write(dir.path().join("tracked.txt"), "scribble").unwrap();
        std::fs::create_dir_all(dir.path().join("junk/deep")).unwrap();
        std::fs::write(dir.path().join("junk/deep/file"), "x").unwrap();

        git.checkout_index(dir.path()).await.unwrap();
        git.clean(dir.path()).await.unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("tracked.txt")).unwrap(), "base");
        assert!(!dir.path().join("junk").exists());
        assert!(dir.path().join(".git").exists());
    }

    #[tokio::test]
    async fn test_ignore_rules_do_not_affect_staging_or_clean() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        std::fs::write(dir.path().join("app.log"), "kept").unwrap();
        let git = init_repo(dir.path()).await;
        git.add_all(dir.path()).await.unwrap();
        git.commit(dir.path(), "BASE").await.unwrap();

        let repo = git2::Repository::open(dir.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("app.log").is_some());

        std::fs::write(dir.path().join("debug.log"), "scratch").unwrap();
        git.checkout_index(dir.path()).await.unwrap();
        git.clean(dir.path()).await.unwrap();

        assert!(!dir.path().join("debug.log").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("app.log")).unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_failure_outside_repo() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = GitClient::default();
        let err = git.commit(dir.path(), "BASE").await.unwrap_err();
        assert!(matches!(err, ToolError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitClient::new("/nonexistent/git");
        assert!(matches!(
            git.init(dir.path()).await,
            Err(ToolError::BinaryNotFound(_))
        ));
    }
}
