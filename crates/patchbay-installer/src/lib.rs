//! Patchbay Installer
//!
//! Writes the bootstrap stub that makes the host application load patchbay
//! at startup, and removes it again. The stub is a directory holding an
//! `index.js` that requires the entry point and a `package.json` naming
//! it as `main`. The directory itself is the "installed" marker.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Stub loader file name
pub const INDEX_FILE: &str = "index.js";

/// Stub manifest file name
pub const MANIFEST_FILE: &str = "package.json";

/// Installer errors
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(
        "an injector is already in place at {}; remove it and try again",
        .0.display()
    )]
    AlreadyInstalled(PathBuf),

    #[error("there is nothing to remove at {}", .0.display())]
    NotInstalled(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl InstallError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Installer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Directory the host application loads its code from
    pub app_dir: PathBuf,
    /// Script the stub requires
    pub entry_point: PathBuf,
}

impl InstallerConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML config file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InstallError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        toml::from_str(&raw).map_err(|source| InstallError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    #[inline]
    #[must_use]
    pub fn with_app_dir(mut self, app_dir: impl Into<PathBuf>) -> Self {
        self.app_dir = app_dir.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<PathBuf>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("/opt/discord-canary/resources/app"),
            entry_point: PathBuf::from("src/patcher.js"),
        }
    }
}

/// Whether the stub is present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Installed,
    NotInstalled,
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => f.write_str("installed"),
            Self::NotInstalled => f.write_str("not installed"),
        }
    }
}

/// Installs and removes the bootstrap stub
#[derive(Debug, Clone)]
pub struct Installer {
    config: InstallerConfig,
}

impl Installer {
    #[must_use]
    pub fn new(config: InstallerConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> InstallStatus {
        if self.config.app_dir.exists() {
            InstallStatus::Installed
        } else {
            InstallStatus::NotInstalled
        }
    }

    /// Write the stub and return its directory
    ///
    /// Both files are written into a staging directory beside the marker,
    /// which is then renamed into place, so the marker never exists half
    /// written. The parent directory must already exist.
    pub fn install(&self) -> Result<PathBuf, InstallError> {
        let app_dir = &self.config.app_dir;
        if app_dir.exists() {
            return Err(InstallError::AlreadyInstalled(app_dir.clone()));
        }

        let staging = staging_dir(app_dir);
        fs::create_dir(&staging).map_err(|e| InstallError::io(&staging, e))?;

        if let Err(error) = self.write_stub(&staging).and_then(|()| {
            fs::rename(&staging, app_dir).map_err(|e| InstallError::io(app_dir, e))
        }) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::warn!(path = %staging.display(), "failed to clean staging dir: {cleanup}");
            }
            return Err(error);
        }

        tracing::info!(
            app_dir = %app_dir.display(),
            entry_point = %self.config.entry_point.display(),
            "installed bootstrap stub"
        );
        Ok(app_dir.clone())
    }

    /// Delete the stub files and the marker directory
    ///
    /// Anything else found in the directory is left alone and makes the
    /// final directory removal fail.
    pub fn remove(&self) -> Result<(), InstallError> {
        let app_dir = &self.config.app_dir;
        if !app_dir.exists() {
            return Err(InstallError::NotInstalled(app_dir.clone()));
        }

        for name in [MANIFEST_FILE, INDEX_FILE] {
            let path = app_dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "stub file already gone");
                }
                Err(e) => return Err(InstallError::io(&path, e)),
            }
        }
        fs::remove_dir(app_dir).map_err(|e| InstallError::io(app_dir, e))?;

        tracing::info!(app_dir = %app_dir.display(), "removed bootstrap stub");
        Ok(())
    }

    fn write_stub(&self, dir: &Path) -> Result<(), InstallError> {
        let index = dir.join(INDEX_FILE);
        fs::write(&index, index_source(&self.config.entry_point))
            .map_err(|e| InstallError::io(&index, e))?;

        let manifest = dir.join(MANIFEST_FILE);
        let body = serde_json::json!({ "main": INDEX_FILE }).to_string();
        fs::write(&manifest, body).map_err(|e| InstallError::io(&manifest, e))
    }
}

/// `require('<entry>')` with the path escaped for a single-quoted JS string
#[must_use]
pub fn index_source(entry_point: &Path) -> String {
    let escaped = entry_point
        .to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "\\'");
    format!("require('{escaped}')")
}

fn staging_dir(app_dir: &Path) -> PathBuf {
    let name = app_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = format!(".{name}.{}.staging", uuid::Uuid::new_v4().simple());
    match app_dir.parent() {
        Some(parent) => parent.join(staging),
        None => PathBuf::from(staging),
    }
}
