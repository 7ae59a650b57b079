//! Single-slot persistence for the active session.
//!
//! The presence of a record is the only signal that a session is active.
//! Writers are not locked against each other; one interactive user drives
//! one process tree at a time.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::Session;

/// Durable single-slot record of the active session.
pub trait SessionStore {
    /// Write `session` to the slot, replacing whatever was there.
    fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Read the slot. Fails with [`StoreError::NoActiveSession`] if empty.
    fn load(&self) -> Result<Session, StoreError>;

    /// Empty the slot. No-op if already empty.
    fn clear(&self) -> Result<(), StoreError>;

    /// Read the slot, mapping "empty" to `None`.
    fn load_optional(&self) -> Result<Option<Session>, StoreError> {
        match self.load() {
            Ok(session) => Ok(Some(session)),
            Err(StoreError::NoActiveSession) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// [`SessionStore`] backed by a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        })?;

        // Write-then-rename: the slot never holds a truncated record.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), staging = %session.staging_path.display(), "saved session record");
        Ok(())
    }

    fn load(&self) -> Result<Session, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NoActiveSession)
            }
            Err(e) => return Err(StoreError::IoError(e)),
        };
        serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared session record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::IoError(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// [`SessionStore`] held in memory. Lets the controller run without
/// touching the user's real session record.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: RefCell<Option<Session>>,
    writes: RefCell<usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        *self.writes.borrow()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        *self.slot.borrow_mut() = Some(session.clone());
        *self.writes.borrow_mut() += 1;
        Ok(())
    }

    fn load(&self) -> Result<Session, StoreError> {
        self.slot.borrow().clone().ok_or(StoreError::NoActiveSession)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.slot.borrow_mut().take();
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for &S {
    fn save(&self, session: &Session) -> Result<(), StoreError> {
        (**self).save(session)
    }

    fn load(&self) -> Result<Session, StoreError> {
        (**self).load()
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}
