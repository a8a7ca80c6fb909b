use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::config::{DocumentLoader, RegistryDocument};
use crate::error::RefmanError;
use crate::location::RegistryLocation;
use crate::project::Project;

/// Reads and atomically writes registry files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStore;

impl RegistryStore {
    pub fn read(&self, location: &RegistryLocation) -> Result<Project, RefmanError> {
        let path = location.path();
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => RefmanError::RegistryNotFound(path.to_owned()),
            _ => RefmanError::Filesystem(format!("read {path}: {err}")),
        })?;

        let document: RegistryDocument =
            toml::from_str(&content).map_err(|err| RefmanError::RegistryParse {
                path: path.to_owned(),
                message: err.to_string(),
            })?;
        let project = DocumentLoader::resolve_document(document).map_err(|message| {
            RefmanError::RegistryParse {
                path: path.to_owned(),
                message,
            }
        })?;

        debug!(%path, datasets = project.len(), "loaded registry");
        Ok(project)
    }

    /// Replace the registry file. The previous file survives any failure.
    pub fn write(&self, location: &RegistryLocation, project: &Project) -> Result<(), RefmanError> {
        let path = location.path();
        let temp = stage(path, project)?;
        temp.persist(path.as_std_path())
            .map_err(|err| write_error(path, err.error))?;
        debug!(%path, datasets = project.len(), "wrote registry");
        Ok(())
    }

    /// Like [`RegistryStore::write`] but never overwrites an existing file.
    pub fn create_new(
        &self,
        location: &RegistryLocation,
        project: &Project,
    ) -> Result<(), RefmanError> {
        let path = location.path();
        if path.exists() {
            return Err(RefmanError::RegistryAlreadyExists(path.to_owned()));
        }
        let temp = stage(path, project)?;
        temp.persist_noclobber(path.as_std_path())
            .map_err(|err| match err.error.kind() {
                io::ErrorKind::AlreadyExists => RefmanError::RegistryAlreadyExists(path.to_owned()),
                _ => write_error(path, err.error),
            })?;
        debug!(%path, "created registry");
        Ok(())
    }
}

pub fn render(project: &Project) -> Result<String, String> {
    toml::to_string_pretty(&DocumentLoader::to_document(project)).map_err(|err| err.to_string())
}

/// Serialize into a synced temp file next to `path`.
fn stage(path: &Utf8Path, project: &Project) -> Result<NamedTempFile, RefmanError> {
    let content = render(project).map_err(|message| RefmanError::RegistryWrite {
        path: path.to_owned(),
        message,
    })?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| write_error(path, err))?;

    let mut temp = Builder::new()
        .prefix(".refman")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| write_error(path, err))?;
    temp.write_all(content.as_bytes())
        .map_err(|err| write_error(path, err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| write_error(path, err))?;
    Ok(temp)
}

fn write_error(path: &Utf8Path, err: io::Error) -> RefmanError {
    RefmanError::RegistryWrite {
        path: path.to_owned(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::RefDataset;

    #[test]
    fn rendered_registry_uses_dataset_tables() {
        let dataset = RefDataset::try_new(
            "t1",
            Some("https://host/a.fasta".to_string()),
            None,
            None,
            None,
            None,
            None,
        )
        .unwrap();
        let project = Project::new(Some("Demo".to_string()), None)
            .register(dataset)
            .unwrap();

        let rendered = render(&project).unwrap();
        assert!(rendered.contains("title = \"Demo\""));
        assert!(rendered.contains("[datasets.t1]"));
        assert!(rendered.contains("fasta = \"https://host/a.fasta\""));
        assert!(!rendered.contains("genbank"));
    }

    #[test]
    fn temp_file_lands_next_to_registry() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("refman.toml")).unwrap();
        let staged = stage(&path, &Project::default()).unwrap();
        assert_eq!(staged.path().parent(), Some(temp.path()));
    }
}
