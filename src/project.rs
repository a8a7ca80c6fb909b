use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::RefDataset;
use crate::error::RefmanError;

/// In-memory contents of one registry file.
///
/// Mutating operations consume the project and hand back the updated value;
/// persisting it is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Project {
    title: Option<String>,
    description: Option<String>,
    datasets: BTreeMap<String, RefDataset>,
}

impl Project {
    pub fn new(title: Option<String>, description: Option<String>) -> Self {
        Self {
            title: title.filter(|value| !value.trim().is_empty()),
            description: description.filter(|value| !value.trim().is_empty()),
            datasets: BTreeMap::new(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Insert `dataset` under its label, replacing any previous entry wholesale.
    pub fn register(mut self, dataset: RefDataset) -> Result<Self, RefmanError> {
        dataset.validate()?;
        self.datasets.insert(dataset.label.clone(), dataset);
        Ok(self)
    }

    pub fn get_dataset(&self, label: &str) -> Result<&RefDataset, RefmanError> {
        self.datasets
            .get(label)
            .ok_or_else(|| RefmanError::DatasetNotFound(label.to_string()))
    }

    pub fn get_datasets(&self) -> Vec<&RefDataset> {
        self.datasets.values().collect()
    }

    pub fn get_dataset_urls(&self, label: &str) -> Result<Vec<String>, RefmanError> {
        Ok(self.get_dataset(label)?.urls())
    }

    pub fn is_registered(&self, label: &str) -> bool {
        self.datasets.contains_key(label)
    }

    pub fn remove(mut self, label: &str) -> Result<Self, RefmanError> {
        self.datasets
            .remove(label)
            .ok_or_else(|| RefmanError::DatasetNotFound(label.to_string()))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::FileSource;

    fn remote(label: &str, url: &str) -> RefDataset {
        let mut dataset = RefDataset::empty(label);
        dataset.fasta = Some(FileSource::parse(url).unwrap());
        dataset
    }

    #[test]
    fn register_replaces_existing_label() {
        let project = Project::new(Some("Demo".to_string()), None)
            .register(remote("t1", "https://host/a.fasta"))
            .unwrap();

        let mut replacement = RefDataset::empty("t1");
        replacement.bed = Some(FileSource::parse("https://host/a.bed").unwrap());
        let project = project.register(replacement).unwrap();

        let dataset = project.get_dataset("t1").unwrap();
        assert!(dataset.fasta.is_none());
        assert!(dataset.bed.is_some());
        assert_eq!(project.len(), 1);
    }

    #[test]
    fn remove_missing_label_is_an_error() {
        let err = Project::default().remove("nope").unwrap_err();
        assert_matches!(err, RefmanError::DatasetNotFound(label) if label == "nope");
    }

    #[test]
    fn blank_title_is_dropped() {
        let project = Project::new(Some("  ".to_string()), Some("refs".to_string()));
        assert_eq!(project.title(), None);
        assert_eq!(project.description(), Some("refs"));
    }
}
