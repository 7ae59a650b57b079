//! dir-merge core library.
//!
//! This crate reconciles a source and a target directory tree by staging the
//! merge in a throwaway git working copy: the source is committed as BASE,
//! the target is overlaid and staged on top, and the user resolves the result
//! with ordinary tools in an interactive shell before `finish` propagates it
//! to the output directory.
//!
//! Only index/commit state survives `finish`. Unstaged edits and untracked
//! files in the staging repo are discarded.

pub(crate) mod command;
pub mod config;
pub mod controller;
pub mod errors;
pub mod mirror;
pub mod models;
pub mod process;
pub mod staging;
pub mod status;
pub mod store;
pub mod vcs;

// Re-exports for convenience.
pub use config::MergeConfig;
pub use controller::{DefaultController, SessionController, StartRequest};
pub use errors::SessionError;
pub use models::{Session, SessionState};
pub use status::{LiveStatus, StatusReport};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
