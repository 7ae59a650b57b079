//! In-process mirror backend for hosts without `rsync`.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use super::Mirror;
use crate::errors::ToolError;

/// Recursive copy followed by stale-entry removal, run on the blocking pool.
///
/// Excluded names are skipped at every depth on both sides, matching
/// `rsync --exclude=<name>`. Symlinks are recreated, not followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMirror;

impl Mirror for NativeMirror {
    #[instrument(skip(self), fields(src = %src.display(), dst = %dst.display()))]
    async fn mirror(&self, src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), ToolError> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        let exclude: HashSet<OsString> = exclude.iter().map(OsString::from).collect();

        tokio::task::spawn_blocking(move || mirror_tree(&src, &dst, &exclude))
            .await
            .map_err(|e| ToolError::IoError(std::io::Error::other(e)))??;
        info!("native mirror completed");
        Ok(())
    }
}

fn failed(path: &Path) -> impl FnOnce(std::io::Error) -> ToolError + '_ {
    move |source| ToolError::MirrorFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Mirror `src` onto `dst`, creating `dst` if needed.
pub fn mirror_tree(src: &Path, dst: &Path, exclude: &HashSet<OsString>) -> Result<(), ToolError> {
    let meta = fs::metadata(src).map_err(failed(src))?;
    if !meta.is_dir() {
        return Err(ToolError::MirrorFailed {
            path: src.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "source is not a directory"),
        });
    }
    fs::create_dir_all(dst).map_err(failed(dst))?;
    copy_entries(src, dst, exclude)?;
    remove_stale_entries(src, dst, exclude)
}

fn copy_entries(src: &Path, dst: &Path, exclude: &HashSet<OsString>) -> Result<(), ToolError> {
    for entry in fs::read_dir(src).map_err(failed(src))? {
        let entry = entry.map_err(failed(src))?;
        let name = entry.file_name();
        if exclude.contains(&name) {
            continue;
        }

        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let file_type = entry.file_type().map_err(failed(&src_path))?;

        if file_type.is_dir() {
            if existing_kind(&dst_path) != Some(Kind::Dir) {
                remove_entry(&dst_path)?;
                fs::create_dir(&dst_path).map_err(failed(&dst_path))?;
            }
            copy_entries(&src_path, &dst_path, exclude)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&src_path).map_err(failed(&src_path))?;
            remove_entry(&dst_path)?;
            make_symlink(&target, &dst_path)?;
        } else {
            if existing_kind(&dst_path).is_some_and(|k| k != Kind::File) {
                remove_entry(&dst_path)?;
            }
            fs::copy(&src_path, &dst_path).map_err(failed(&dst_path))?;
        }
    }
    Ok(())
}

fn remove_stale_entries(src: &Path, dst: &Path, exclude: &HashSet<OsString>) -> Result<(), ToolError> {
    for entry in fs::read_dir(dst).map_err(failed(dst))? {
        let entry = entry.map_err(failed(dst))?;
        let name = entry.file_name();
        if exclude.contains(&name) {
            continue;
        }

        let src_path = src.join(&name);
        let dst_path = entry.path();
        match existing_kind(&src_path) {
            None => {
                debug!(path = %dst_path.display(), "removing stale entry");
                remove_entry(&dst_path)?;
            }
            Some(Kind::Dir) => remove_stale_entries(&src_path, &dst_path, exclude)?,
            Some(_) => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
    Symlink,
}

fn existing_kind(path: &Path) -> Option<Kind> {
    let meta = fs::symlink_metadata(path).ok()?;
    let ft = meta.file_type();
    Some(if ft.is_symlink() {
        Kind::Symlink
    } else if ft.is_dir() {
        Kind::Dir
    } else {
        Kind::File
    })
}

fn remove_entry(path: &Path) -> Result<(), ToolError> {
    match existing_kind(path) {
        None => Ok(()),
        Some(Kind::Dir) => fs::remove_dir_all(path).map_err(failed(path)),
        Some(_) => fs::remove_file(path).map_err(failed(path)),
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<(), ToolError> {
    std::os::unix::fs::symlink(target, link).map_err(failed(link))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<(), ToolError> {
    let resolved: std::path::PathBuf = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    fs::copy(&resolved, link).map(|_| ()).map_err(failed(link))
}
