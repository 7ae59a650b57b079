//! Overlay primitive: make one tree's contents match another's.
//!
//! Mirroring copies `src`'s *contents* into `dst`'s *contents* and deletes
//! whatever `dst` has that `src` lacks. Entries whose name is in the exclude
//! list are neither copied nor deleted, which is how the staging repo's
//! `.git` survives an overlay.

pub mod native;
pub mod rsync;

use std::path::Path;

use crate::config::{MirrorKind, ToolsConfig};
use crate::errors::ToolError;

pub use native::NativeMirror;
pub use rsync::RsyncMirror;

/// Mirror-with-deletion capability.
#[allow(async_fn_in_trait)]
pub trait Mirror {
    /// Make `dst` structurally equal to `src`, except for excluded names.
    ///
    /// A failure may leave `dst` partially updated.
    async fn mirror(&self, src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), ToolError>;
}

/// Backend chosen at runtime from configuration.
#[derive(Debug, Clone)]
pub enum MirrorBackend {
    Rsync(RsyncMirror),
    Native(NativeMirror),
}

impl MirrorBackend {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        match tools.mirror {
            MirrorKind::Rsync => Self::Rsync(RsyncMirror::new(&tools.rsync)),
            MirrorKind::Native => Self::Native(NativeMirror),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rsync(_) => "rsync",
            Self::Native(_) => "native",
        }
    }
}

impl Mirror for MirrorBackend {
    async fn mirror(&self, src: &Path, dst: &Path, exclude: &[&str]) -> Result<(), ToolError> {
        match self {
            Self::Rsync(m) => m.mirror(src, dst, exclude).await,
            Self::Native(m) => m.mirror(src, dst, exclude).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_config() {
        let mut tools = ToolsConfig::default();
        assert_eq!(MirrorBackend::from_config(&tools).name(), "rsync");
        tools.mirror = MirrorKind::Native;
        assert_eq!(MirrorBackend::from_config(&tools).name(), "native");
    }
}
