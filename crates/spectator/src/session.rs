//! Anonymous spectator session token.
//!
//! One random token per install, stored in the platform data dir. It only
//! makes votes and likes idempotent per spectator; anyone can mint a new one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use uuid::Uuid;

const SESSION_FILE: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Read the token at `path`, minting and saving a new one when the file
    /// is missing or does not hold a token.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Ok(raw) = fs::read_to_string(path) {
            let raw = raw.trim();
            if Uuid::parse_str(raw).is_ok() {
                return Ok(Self(raw.to_string()));
            }
            tracing::warn!(path = %path.display(), "replacing unreadable session token");
        }

        let token = Self::generate();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, &token.0).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "created session token");
        Ok(token)
    }

    /// `override_path` (tilde-expanded) or `<data dir>/session`.
    pub fn default_path(override_path: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = override_path {
            return Ok(PathBuf::from(shellexpand::tilde(path).to_string()));
        }
        let dirs = ProjectDirs::from("dev", "live-board", "spectator")
            .context("no home directory for the session token")?;
        Ok(dirs.data_dir().join(SESSION_FILE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
