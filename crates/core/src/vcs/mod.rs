//! Version-control capability used by the staging repo.
//!
//! The staging repo needs only a handful of verbs, so they are expressed as
//! a narrow trait. [`GitClient`] implements it by shelling out to `git`.

pub mod client;

use std::path::Path;

use crate::errors::ToolError;

pub use client::GitClient;

/// Name of the metadata subtree that mirrors must never touch.
pub const METADATA_DIR: &str = ".git";

/// Message of the baseline commit.
pub const BASE_COMMIT_MESSAGE: &str = "BASE";

/// The version-control verbs the staging repo relies on.
#[allow(async_fn_in_trait)]
pub trait VersionControl {
    /// Create repository metadata in `dir`.
    async fn init(&self, dir: &Path) -> Result<(), ToolError>;

    /// Set the repository-local author/committer identity.
    async fn set_identity(&self, dir: &Path, name: &str, email: &str) -> Result<(), ToolError>;

    /// Stage every file in the working tree, ignore rules included.
    async fn add_all(&self, dir: &Path) -> Result<(), ToolError>;

    /// Commit the index with `message`.
    async fn commit(&self, dir: &Path, message: &str) -> Result<(), ToolError>;

    /// Overwrite the working tree with the index, discarding unstaged edits
    /// to tracked files.
    async fn checkout_index(&self, dir: &Path) -> Result<(), ToolError>;

    /// Remove untracked files and directories, ignored ones included.
    async fn clean(&self, dir: &Path) -> Result<(), ToolError>;

    /// Short-form status of the working tree, one entry per line.
    async fn status_short(&self, dir: &Path) -> Result<String, ToolError>;
}
