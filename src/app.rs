use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::RefDataset;
use crate::download::{CancelToken, Downloader, FetchReport, FileOutcome};
use crate::error::RefmanError;
use crate::location::{PathResolver, RegistryLocation};
use crate::project::Project;
use crate::remote::RemoteClient;
use crate::store::RegistryStore;

/// Which registry an operation targets: an explicit path, the global one, or
/// `./refman.toml`.
#[derive(Debug, Clone, Default)]
pub struct RegistryTarget {
    pub path: Option<String>,
    pub global: bool,
}

impl RegistryTarget {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn global() -> Self {
        Self {
            path: None,
            global: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub location: RegistryLocation,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
    pub location: RegistryLocation,
    pub label: String,
    pub replaced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub location: RegistryLocation,
    pub title: Option<String>,
    pub description: Option<String>,
    pub datasets: Vec<RefDataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub location: RegistryLocation,
    pub report: FetchReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub location: RegistryLocation,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing` at info level.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// The five registry operations, each a read-only or read-modify-write cycle
/// against one registry file.
pub struct App<C: RemoteClient> {
    resolver: PathResolver,
    store: RegistryStore,
    downloader: Downloader<C>,
}

impl<C: RemoteClient> App<C> {
    pub fn new(resolver: PathResolver, downloader: Downloader<C>) -> Self {
        Self {
            resolver,
            store: RegistryStore,
            downloader,
        }
    }

    pub fn resolve(&self, target: &RegistryTarget) -> Result<RegistryLocation, RefmanError> {
        self.resolver.resolve(target.path.as_deref(), target.global)
    }

    pub fn init(
        &self,
        title: Option<String>,
        description: Option<String>,
        target: &RegistryTarget,
        sink: &dyn ProgressSink,
    ) -> Result<InitResult, RefmanError> {
        let location = self.resolve(target)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; registry {}", location.path),
            elapsed: None,
        });

        let project = Project::new(title, description);
        self.store.create_new(&location, &project)?;
        sink.event(ProgressEvent {
            message: "phase=Store; created registry".to_string(),
            elapsed: None,
        });

        Ok(InitResult {
            location,
            title: project.title().map(str::to_string),
            description: project.description().map(str::to_string),
        })
    }

    pub fn register(
        &self,
        dataset: RefDataset,
        target: &RegistryTarget,
        sink: &dyn ProgressSink,
    ) -> Result<RegisterResult, RefmanError> {
        dataset.validate()?;
        let location = self.resolve(target)?;
        let project = self.store.read(&location)?;

        let label = dataset.label.clone();
        let replaced = project.is_registered(&label);
        let project = project.register(dataset)?;
        self.store.write(&location, &project)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} '{label}'",
                if replaced { "replaced" } else { "registered" }
            ),
            elapsed: None,
        });

        Ok(RegisterResult {
            location,
            label,
            replaced,
        })
    }

    pub fn list(
        &self,
        label: Option<&str>,
        target: &RegistryTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, RefmanError> {
        let location = self.resolve(target)?;
        let project = self.store.read(&location)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} datasets registered", project.len()),
            elapsed: None,
        });

        let datasets = match label {
            Some(label) => vec![project.get_dataset(label)?.clone()],
            None => project.get_datasets().into_iter().cloned().collect(),
        };

        Ok(ListResult {
            location,
            title: project.title().map(str::to_string),
            description: project.description().map(str::to_string),
            datasets,
        })
    }

    /// Fetch one dataset (or all of them) into `dest`, defaulting to the
    /// working directory. Fails only if nothing could be fetched.
    pub fn download(
        &self,
        label: Option<&str>,
        dest: Option<&Utf8Path>,
        force: bool,
        target: &RegistryTarget,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, RefmanError> {
        let location = self.resolve(target)?;
        let project = self.store.read(&location)?;
        let selected = match label {
            Some(label) => {
                project.get_dataset(label)?;
                1
            }
            None => project.len(),
        };
        let dest = match dest {
            Some(dest) => self.resolver.cwd().join(dest),
            None => self.resolver.cwd().to_owned(),
        };

        sink.event(ProgressEvent {
            message: format!("phase=Prepare; {selected} datasets into {dest}"),
            elapsed: None,
        });
        let start = Instant::now();
        let report = self.downloader.fetch_selected(
            &project.get_datasets(),
            label,
            &dest,
            force,
            cancel,
        )?;
        for file in &report.files {
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Fetch; {} {} {}",
                    file.label,
                    file.kind,
                    outcome_word(&file.outcome)
                ),
                elapsed: None,
            });
        }
        sink.event(ProgressEvent {
            message: format!(
                "phase=Verify; {}/{} files available",
                report.succeeded(),
                report.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        if report.all_failed() {
            return Err(RefmanError::DownloadFailed {
                report: Box::new(report),
            });
        }
        Ok(DownloadResult { location, report })
    }

    pub fn remove(
        &self,
        label: &str,
        target: &RegistryTarget,
        sink: &dyn ProgressSink,
    ) -> Result<RemoveResult, RefmanError> {
        let location = self.resolve(target)?;
        let project = self.store.read(&location)?.remove(label)?;
        self.store.write(&location, &project)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; removed '{label}'"),
            elapsed: None,
        });

        Ok(RemoveResult {
            location,
            label: label.to_string(),
        })
    }
}

fn outcome_word(outcome: &FileOutcome) -> String {
    match outcome {
        FileOutcome::Downloaded { path } => format!("downloaded -> {path}"),
        FileOutcome::AlreadyPresent { path } => format!("already present at {path}"),
        FileOutcome::Failed { reason } => format!("failed: {reason}"),
    }
}
