//! Configuration for dir-merge.
//!
//! Everything has a built-in default, so the TOML file is optional. The file
//! lives next to the session record in `~/.config/dir-merge/` unless the CLI
//! is pointed elsewhere with `--config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Name of the per-user directory under `~/.config`.
pub const APP_DIR_NAME: &str = "dir-merge";

/// File name of the optional configuration file.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the single-slot session record.
pub const SESSION_FILE_NAME: &str = "session.json";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Session state and staging location settings.
    #[serde(default)]
    pub session: SessionSection,

    /// External tool selection.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Synthetic identity used for the BASE commit.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Interactive shell settings.
    #[serde(default)]
    pub shell: ShellConfig,
}

// ---------------------------------------------------------------------------
// Session section
// ---------------------------------------------------------------------------

/// Where session state and staging repos live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Directory holding `session.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Parent directory for staging repos. Defaults to the system temp dir.
    #[serde(default)]
    pub staging_root: Option<PathBuf>,

    /// Prefix for generated staging directory names.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            staging_root: None,
            staging_prefix: default_staging_prefix(),
            log_level: default_log_level(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".config").join(APP_DIR_NAME),
        None => PathBuf::from(".config").join(APP_DIR_NAME),
    }
}

fn default_staging_prefix() -> String {
    "dir-merge-".into()
}

fn default_log_level() -> String {
    "warn".into()
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Which mirror implementation to use for overlays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorKind {
    /// Shell out to `rsync --delete`.
    #[default]
    Rsync,
    /// In-process recursive copy with stale-entry removal.
    Native,
}

/// External binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path or name of the `git` binary.
    #[serde(default = "default_git")]
    pub git: String,

    /// Path or name of the `rsync` binary.
    #[serde(default = "default_rsync")]
    pub rsync: String,

    /// Mirror backend.
    #[serde(default)]
    pub mirror: MirrorKind,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            rsync: default_rsync(),
            mirror: MirrorKind::default(),
        }
    }
}

fn default_git() -> String {
    "git".into()
}

fn default_rsync() -> String {
    "rsync".into()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Fixed identity written into the staging repo's local git config, so the
/// BASE commit succeeds without any user-level git configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,

    #[serde(default = "default_identity_email")]
    pub email: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            email: default_identity_email(),
        }
    }
}

fn default_identity_name() -> String {
    "dir-merge".into()
}

fn default_identity_email() -> String {
    "dir-merge@local".into()
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Interactive shell settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Shell program. Falls back to `$SHELL`, then `/bin/bash`.
    #[serde(default)]
    pub program: Option<String>,
}

impl ShellConfig {
    /// The shell program to spawn for the interactive window.
    pub fn resolve_program(&self) -> String {
        if let Some(program) = self.program.as_deref().filter(|p| !p.is_empty()) {
            return program.to_string();
        }
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/bash".to_string())
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl MergeConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        default_state_dir().join(CONFIG_FILE_NAME)
    }

    /// Load a [`MergeConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse a configuration from TOML text and expand `~` in paths.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: MergeConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.expand_paths();
        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load the file at `path` if given, otherwise the default file if it
    /// exists, otherwise built-in defaults. The result is validated.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(explicit) => Self::load_from_file(explicit)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    debug!("no configuration file, using defaults");
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tools.git.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tools.git".into(),
                detail: "git binary must not be empty".into(),
            });
        }
        if self.tools.mirror == MirrorKind::Rsync && self.tools.rsync.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tools.rsync".into(),
                detail: "rsync binary must not be empty when tools.mirror = \"rsync\"".into(),
            });
        }
        if self.identity.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "identity.name".into(),
                detail: "identity name must not be empty".into(),
            });
        }
        if self.identity.email.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "identity.email".into(),
                detail: "identity email must not be empty".into(),
            });
        }
        if self.session.staging_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "session.staging_prefix".into(),
                detail: "staging prefix must not be empty".into(),
            });
        }
        if self.session.staging_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(ConfigError::InvalidValue {
                field: "session.staging_prefix".into(),
                detail: "staging prefix must not contain a path separator".into(),
            });
        }
        Ok(())
    }

    /// Path of the single-slot session record.
    pub fn session_file(&self) -> PathBuf {
        self.session.state_dir.join(SESSION_FILE_NAME)
    }

    /// Parent directory for new staging repos.
    pub fn staging_root(&self) -> PathBuf {
        self.session
            .staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn expand_paths(&mut self) {
        self.session.state_dir = expand_tilde(&self.session.state_dir);
        if let Some(root) = self.session.staging_root.take() {
            self.session.staging_root = Some(expand_tilde(&root));
        }
    }

    /// Generate a commented TOML template with the default values.
    pub fn default_template() -> &'static str {
        r#"# dir-merge configuration
# Every key is optional.

[session]
# state_dir = "~/.config/dir-merge"
# staging_root = "/tmp"
staging_prefix = "dir-merge-"
log_level = "warn"

[tools]
git = "git"
rsync = "rsync"
# "rsync" or "native"
mirror = "rsync"

[identity]
name = "dir-merge"
email = "dir-merge@local"

[shell]
# program = "/bin/zsh"   # defaults to $SHELL
"#
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MergeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tools.git, "git");
        assert_eq!(config.tools.mirror, MirrorKind::Rsync);
        assert_eq!(config.identity.email, "dir-merge@local");
        assert!(config.session_file().ends_with("dir-merge/session.json"));
    }

    #[test]
    fn test_template_parses() {
        let config = MergeConfig::from_toml(MergeConfig::default_template()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.session.staging_prefix, "dir-merge-");
        assert!(config.session.staging_root.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = MergeConfig::from_toml(
            r#"
[tools]
mirror = "native"

[shell]
program = "/bin/sh"
"#,
        )
        .unwrap();
        assert_eq!(config.tools.mirror, MirrorKind::Native);
        assert_eq!(config.tools.rsync, "rsync");
        assert_eq!(config.identity.name, "dir-merge");
        assert_eq!(config.shell.resolve_program(), "/bin/sh");
    }

    #[test]
    fn test_invalid_mirror_kind_rejected() {
        let err = MergeConfig::from_toml("[tools]\nmirror = \"scp\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        let mut config = MergeConfig::default();
        config.identity.email = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("identity.email"));
    }

    #[test]
    fn test_validate_rejects_prefix_with_separator() {
        let mut config = MergeConfig::default();
        config.session.staging_prefix = "a/b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MergeConfig::load_or_default(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x/y")), home.join("x/y"));
        }
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }
}
