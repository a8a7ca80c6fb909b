use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::Serialize;
use tracing::debug;

use crate::config::{REGISTRY_FILE_NAME, Settings};
use crate::error::RefmanError;

/// Where the registry for one operation lives. Computed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryLocation {
    pub path: Utf8PathBuf,
    pub is_global: bool,
}

impl RegistryLocation {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    cwd: Utf8PathBuf,
    global_dir: Option<Utf8PathBuf>,
}

impl PathResolver {
    pub fn new(settings: &Settings) -> Result<Self, RefmanError> {
        let cwd = std::env::current_dir()
            .map_err(|err| RefmanError::PathResolution(format!("current directory: {err}")))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
            RefmanError::PathResolution(format!(
                "current directory is not valid UTF-8: {}",
                path.display()
            ))
        })?;

        let global_dir = match &settings.home {
            Some(home) => Some(Utf8PathBuf::from(home)),
            None => ProjectDirs::from("", "", "refman").and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.config_dir().to_path_buf()).ok()
            }),
        };

        Ok(Self { cwd, global_dir })
    }

    pub fn with_roots(cwd: Utf8PathBuf, global_dir: Option<Utf8PathBuf>) -> Self {
        Self { cwd, global_dir }
    }

    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Explicit path beats the global flag, which beats `./refman.toml`.
    pub fn resolve(
        &self,
        requested_path: Option<&str>,
        global: bool,
    ) -> Result<RegistryLocation, RefmanError> {
        let location = match requested_path {
            Some(requested) => RegistryLocation {
                path: self.resolve_explicit(requested)?,
                is_global: false,
            },
            None if global => {
                let dir = self.global_dir.as_ref().ok_or_else(|| {
                    RefmanError::PathResolution(
                        "no global configuration directory for this user".to_string(),
                    )
                })?;
                RegistryLocation {
                    path: dir.join(REGISTRY_FILE_NAME),
                    is_global: true,
                }
            }
            None => RegistryLocation {
                path: self.cwd.join(REGISTRY_FILE_NAME),
                is_global: false,
            },
        };

        debug!(path = %location.path, global = location.is_global, "resolved registry");
        Ok(location)
    }

    fn resolve_explicit(&self, requested: &str) -> Result<Utf8PathBuf, RefmanError> {
        if requested.trim().is_empty() {
            return Err(RefmanError::PathResolution(
                "registry path must not be empty".to_string(),
            ));
        }

        let mut path = self.cwd.join(requested);
        if path.is_dir() {
            path.push(REGISTRY_FILE_NAME);
        }

        let parent = path.parent().unwrap_or(&self.cwd);
        if !parent.is_dir() {
            return Err(RefmanError::PathResolution(format!(
                "parent directory {parent} does not exist"
            )));
        }
        Ok(path)
    }
}
