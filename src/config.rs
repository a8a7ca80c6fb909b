use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{FileKind, FileSource, RefDataset};
use crate::project::Project;

/// On-disk shape of a registry file. Unknown keys are ignored on read and file
/// locations stay raw strings until [`DocumentLoader`] interprets them.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RegistryDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatasetEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fasta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genbank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gfa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed: Option<String>,
}

pub struct DocumentLoader;

impl DocumentLoader {
    /// Convert a parsed document into the validated project model.
    pub fn resolve_document(document: RegistryDocument) -> Result<Project, String> {
        let mut project = Project::new(document.title, document.description);
        for (label, entry) in document.datasets {
            let dataset = RefDataset {
                label: label.clone(),
                fasta: entry.fasta.map(FileSource::from_stored),
                genbank: entry.genbank.map(FileSource::from_stored),
                gfa: entry.gfa.map(FileSource::from_stored),
                gff: entry.gff.map(FileSource::from_stored),
                gtf: entry.gtf.map(FileSource::from_stored),
                bed: entry.bed.map(FileSource::from_stored),
            };
            for (kind, source) in dataset.files() {
                if let FileSource::Unparsed { raw, reason } = source {
                    warn!(%label, %kind, value = %raw, %reason, "unusable file location");
                }
            }
            project = project
                .register(dataset)
                .map_err(|err| format!("dataset '{label}': {err}"))?;
        }
        Ok(project)
    }

    pub fn to_document(project: &Project) -> RegistryDocument {
        let datasets = project
            .get_datasets()
            .into_iter()
            .map(|dataset| {
                let entry = DatasetEntry {
                    fasta: dataset.get(FileKind::Fasta).map(ToString::to_string),
                    genbank: dataset.get(FileKind::Genbank).map(ToString::to_string),
                    gfa: dataset.get(FileKind::Gfa).map(ToString::to_string),
                    gff: dataset.get(FileKind::Gff).map(ToString::to_string),
                    gtf: dataset.get(FileKind::Gtf).map(ToString::to_string),
                    bed: dataset.get(FileKind::Bed).map(ToString::to_string),
                };
                (dataset.label.clone(), entry)
            })
            .collect();

        RegistryDocument {
            title: project.title().map(str::to_string),
            description: project.description().map(str::to_string),
            datasets,
        }
    }
}

pub const REGISTRY_FILE_NAME: &str = "refman.toml";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PARALLELISM: usize = 4;

/// Runtime knobs read from `REFMAN_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub home: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub parallelism: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("REFMAN_HOME").filter(|value| !value.trim().is_empty());
        let timeout = parse_var(&lookup, "REFMAN_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS).max(1);
        let max_retries = parse_var(&lookup, "REFMAN_MAX_RETRIES", DEFAULT_MAX_RETRIES);
        let parallelism = parse_var(&lookup, "REFMAN_PARALLELISM", DEFAULT_PARALLELISM).max(1);

        Self {
            home,
            timeout: Duration::from_secs(timeout),
            max_retries,
            parallelism,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring invalid setting");
            default
        }),
        None => default,
    }
}
