//! The disposable, version-controlled staging repository.
//!
//! Lifecycle: [`StagingRepo::allocate`] a fresh directory, [`create`] it from
//! the source tree, [`init_version_control`] to commit that as BASE,
//! [`overlay`] the target tree on top and [`stage_all`] it. At finish time,
//! [`reset_to_committed`] drops unstaged edits and untracked files before the
//! tree is mirrored out, and [`destroy`] removes the directory.
//!
//! Git does not track directories, so the empty ones present when the
//! overlay is staged are listed in [`EMPTY_DIRS_FILE`] inside the metadata
//! directory and recreated by the reset.
//!
//! [`create`]: StagingRepo::create
//! [`init_version_control`]: StagingRepo::init_version_control
//! [`overlay`]: StagingRepo::overlay
//! [`stage_all`]: StagingRepo::stage_all
//! [`reset_to_committed`]: StagingRepo::reset_to_committed
//! [`destroy`]: StagingRepo::destroy

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::config::IdentityConfig;
use crate::errors::SessionError;
use crate::mirror::Mirror;
use crate::vcs::{VersionControl, BASE_COMMIT_MESSAGE, METADATA_DIR};

/// List of staged empty directories, relative to the metadata directory.
pub const EMPTY_DIRS_FILE: &str = "dir-merge-empty-dirs.json";

/// Staging-repo operations over a version-control tool and a mirror.
#[derive(Debug, Clone)]
pub struct StagingRepo<V, M> {
    vcs: V,
    mirror: M,
    identity: IdentityConfig,
}

impl<V: VersionControl, M: Mirror> StagingRepo<V, M> {
    pub fn new(vcs: V, mirror: M, identity: IdentityConfig) -> Self {
        Self {
            vcs,
            mirror,
            identity,
        }
    }

    /// Create a new, uniquely named, empty directory under `root`.
    ///
    /// The returned path is canonical, so it compares equal to the working
    /// directory reported by a shell started inside it.
    pub fn allocate(root: &Path, prefix: &str) -> Result<PathBuf, SessionError> {
        fs::create_dir_all(root).map_err(|e| SessionError::io(root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(|e| SessionError::io(root, e))?
            .keep();
        let dir = dir.canonicalize().map_err(|e| SessionError::io(&dir, e))?;
        info!(path = %dir.display(), "allocated staging directory");
        Ok(dir)
    }

    /// Recursively copy `source` into `dest`, creating `dest` if absent.
    ///
    /// Nothing already in `dest` is deleted. `.git` directories in the source
    /// are not copied at any depth; the staging repo gets its own, and a
    /// nested one would be recorded as a gitlink instead of its files.
    #[instrument(skip(self), fields(source = %source.display(), dest = %dest.display()))]
    pub async fn create(&self, source: &Path, dest: &Path) -> Result<(), SessionError> {
        if !source.is_dir() {
            return Err(SessionError::io(
                source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
            ));
        }
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dest).map_err(|e| SessionError::io(&dest, e))?;
            copy_tree(&source, &dest)
        })
        .await
        .map_err(|e| SessionError::io("<copy task>", std::io::Error::other(e)))??;
        info!("copied source into staging directory");
        Ok(())
    }

    /// Initialize version control in `dest` and commit everything as BASE.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn init_version_control(&self, dest: &Path) -> Result<(), SessionError> {
        self.vcs.init(dest).await?;
        self.vcs
            .set_identity(dest, &self.identity.name, &self.identity.email)
            .await?;
        self.vcs.add_all(dest).await?;
        self.vcs.commit(dest, BASE_COMMIT_MESSAGE).await?;
        info!("committed BASE");
        Ok(())
    }

    /// Mirror `src` onto `dest`, leaving the metadata subtree alone.
    #[instrument(skip(self), fields(src = %src.display(), dest = %dest.display()))]
    pub async fn overlay(&self, src: &Path, dest: &Path) -> Result<(), SessionError> {
        self.mirror.mirror(src, dest, &[METADATA_DIR]).await?;
        info!("overlay applied");
        Ok(())
    }

    /// Stage the whole working tree without committing, and record its
    /// empty directories.
    ///
    /// Applied right after the overlay, so the target's contents form the
    /// staged state that [`reset_to_committed`](Self::reset_to_committed)
    /// preserves; later raw edits must be staged by the user to survive.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn stage_all(&self, dest: &Path) -> Result<(), SessionError> {
        self.vcs.add_all(dest).await?;

        let root = dest.to_path_buf();
        let empty = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            collect_empty_dirs(&root, Path::new(""), &mut found)?;
            Ok::<_, SessionError>(found)
        })
        .await
        .map_err(|e| SessionError::io("<scan task>", std::io::Error::other(e)))??;
        write_empty_dirs(dest, &empty)?;

        debug!(empty_dirs = empty.len(), "staged working tree");
        Ok(())
    }

    /// Discard unstaged modifications and remove untracked files, so only
    /// index/commit state remains in the working tree. Empty directories
    /// recorded by [`stage_all`](Self::stage_all) are recreated.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn reset_to_committed(&self, dest: &Path) -> Result<(), SessionError> {
        self.vcs.checkout_index(dest).await?;
        self.vcs.clean(dest).await?;
        restore_empty_dirs(dest)?;
        info!("staging repo reset to committed/staged state");
        Ok(())
    }

    /// Short-form status of the staging working tree.
    pub async fn status_short(&self, dest: &Path) -> Result<String, SessionError> {
        Ok(self.vcs.status_short(dest).await?)
    }

    /// Remove the staging directory. Succeeds if it is already gone.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub fn destroy(&self, dest: &Path) -> Result<(), SessionError> {
        match fs::remove_dir_all(dest) {
            Ok(()) => {
                info!("removed staging directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("staging directory already absent");
                Ok(())
            }
            Err(e) => Err(SessionError::io(dest, e)),
        }
    }
}

/// Recursively copy all entries of `src` into `dst`, overwriting files that
/// already exist. Metadata directories are skipped at every depth.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), SessionError> {
    let entries = fs::read_dir(src).map_err(|e| SessionError::io(src, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| SessionError::io(src, e))?;
        let file_name = entry.file_name();
        if file_name == METADATA_DIR {
            debug!(path = %entry.path().display(), "skipping source metadata directory");
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&file_name);
        let file_type = entry.file_type().map_err(|e| SessionError::io(&src_path, e))?;

        if file_type.is_dir() {
            if !dst_path.is_dir() {
                fs::create_dir_all(&dst_path).map_err(|e| SessionError::io(&dst_path, e))?;
            }
            copy_tree(&src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).map_err(|e| SessionError::io(&dst_path, e))?;
        }
    }

    Ok(())
}

/// Push every directory under `root.join(rel)` that has no entries, as a
/// path relative to `root`. Metadata directories are not descended into.
fn collect_empty_dirs(
    root: &Path,
    rel: &Path,
    found: &mut Vec<PathBuf>,
) -> Result<(), SessionError> {
    let dir = root.join(rel);
    let mut has_entries = false;
    for entry in fs::read_dir(&dir).map_err(|e| SessionError::io(&dir, e))? {
        let entry = entry.map_err(|e| SessionError::io(&dir, e))?;
        has_entries = true;
        if entry.file_name() == METADATA_DIR {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| SessionError::io(entry.path(), e))?;
        if file_type.is_dir() {
            collect_empty_dirs(root, &rel.join(entry.file_name()), found)?;
        }
    }
    if !has_entries && !rel.as_os_str().is_empty() {
        found.push(rel.to_path_buf());
    }
    Ok(())
}

fn empty_dirs_file(dest: &Path) -> PathBuf {
    dest.join(METADATA_DIR).join(EMPTY_DIRS_FILE)
}

fn write_empty_dirs(dest: &Path, dirs: &[PathBuf]) -> Result<(), SessionError> {
    let names: Vec<&str> = dirs
        .iter()
        .filter_map(|dir| {
            let name = dir.to_str();
            if name.is_none() {
                warn!(path = %dir.display(), "empty directory name is not UTF-8; it will not survive finish");
            }
            name
        })
        .collect();
    let path = empty_dirs_file(dest);
    let json = serde_json::to_vec_pretty(&names)
        .map_err(|e| SessionError::io(&path, std::io::Error::other(e)))?;
    fs::write(&path, json).map_err(|e| SessionError::io(&path, e))
}

/// Recreate the recorded empty directories that are still absent. An entry
/// is skipped when something other than a directory now occupies it or one
/// of its parents.
fn restore_empty_dirs(dest: &Path) -> Result<(), SessionError> {
    let path = empty_dirs_file(dest);
    let json = match fs::read(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SessionError::io(&path, e)),
    };
    let names: Vec<String> = serde_json::from_slice(&json)
        .map_err(|e| SessionError::io(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    for name in names {
        let rel = Path::new(&name);
        if !rel
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)))
        {
            warn!(path = %name, "ignoring malformed empty-directory entry");
            continue;
        }

        let mut current = dest.to_path_buf();
        let mut blocked = false;
        for component in rel.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    blocked = true;
                    break;
                }
                Err(_) => break,
            }
        }
        if blocked {
            debug!(path = %name, "empty directory replaced by a file; not restoring");
            continue;
        }
        let full = dest.join(rel);
        fs::create_dir_all(&full).map_err(|e| SessionError::io(&full, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), SessionError> {
    let target = fs::read_link(src).map_err(|e| SessionError::io(src, e))?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).map_err(|e| SessionError::io(dst, e))?;
    }
    std::os::unix::fs::symlink(&target, dst).map_err(|e| SessionError::io(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), SessionError> {
    fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| SessionError::io(dst, e))
}
