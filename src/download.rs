//! Turning registered file locations into files on disk.
//!
//! Every file in a request is attempted independently: a failure is recorded in
//! the [`FetchReport`] and never aborts its siblings. Bytes are streamed into a
//! temp file inside the destination directory and renamed into place only once
//! the transfer completed.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::domain::{FileKind, FileSource, RefDataset};
use crate::error::RefmanError;
use crate::remote::RemoteClient;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Caller-controlled cancellation with an optional deadline. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= end {
                return true;
            }
            thread::sleep((end - now).min(SLEEP_SLICE));
        }
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Re-fetch files that already exist in the destination.
    pub force: bool,
    pub retry: RetryPolicy,
    pub parallelism: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            force: false,
            retry: RetryPolicy::default(),
            parallelism: 4,
        }
    }
}

impl FetchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            force: false,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                ..RetryPolicy::default()
            },
            parallelism: settings.parallelism,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Connection-level failure, after `attempts` tries.
    Network { message: String, attempts: u32 },
    Status { status: u16, attempts: u32 },
    /// The stored location could not be interpreted.
    InvalidUrl { value: String, reason: String },
    Terminal { message: String },
    Cancelled,
}

impl FailureReason {
    fn from_error(err: RefmanError, attempts: u32) -> Self {
        match err {
            RefmanError::Cancelled => FailureReason::Cancelled,
            RefmanError::HttpStatus { status, .. } => FailureReason::Status { status, attempts },
            RefmanError::Network { message, .. } => FailureReason::Network { message, attempts },
            RefmanError::InvalidUrl { value, reason, .. } => {
                FailureReason::InvalidUrl { value, reason }
            }
            other => FailureReason::Terminal {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network { message, attempts } => {
                write!(f, "{message} (after {attempts} attempts)")
            }
            FailureReason::Status { status, attempts } => {
                write!(f, "HTTP status {status} (after {attempts} attempts)")
            }
            FailureReason::InvalidUrl { value, reason } => {
                write!(f, "invalid location {value}: {reason}")
            }
            FailureReason::Terminal { message } => write!(f, "{message}"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Downloaded { path: Utf8PathBuf },
    AlreadyPresent { path: Utf8PathBuf },
    Failed { reason: FailureReason },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, FileOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub label: String,
    pub kind: FileKind,
    pub source: String,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub destination: Utf8PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<FileReport>,
}

impl FetchReport {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn outcome(&self, label: &str, kind: FileKind) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|file| file.label == label && file.kind == kind)
            .map(|file| &file.outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|file| file.outcome.is_success())
            .count()
    }

    /// True when files were requested and none of them made it.
    pub fn all_failed(&self) -> bool {
        !self.files.is_empty() && self.succeeded() == 0
    }
}

#[derive(Debug, Clone)]
struct Job {
    label: String,
    kind: FileKind,
    source: FileSource,
    target: Utf8PathBuf,
    /// Index of an earlier job fetching the same source to the same file.
    same_as: Option<usize>,
}

pub struct Downloader<C: RemoteClient> {
    client: C,
    options: FetchOptions,
}

impl<C: RemoteClient> Downloader<C> {
    pub fn new(client: C, options: FetchOptions) -> Self {
        Self { client, options }
    }

    pub fn fetch(
        &self,
        dataset: &RefDataset,
        dest_dir: &Utf8Path,
        cancel: &CancelToken,
    ) -> Result<FetchReport, RefmanError> {
        self.fetch_all(&[dataset], dest_dir, cancel)
    }

    /// Fetch every file of every dataset into `dest_dir`. Only failure to
    /// create the destination is an error; per-file problems land in the report.
    pub fn fetch_all(
        &self,
        datasets: &[&RefDataset],
        dest_dir: &Utf8Path,
        cancel: &CancelToken,
    ) -> Result<FetchReport, RefmanError> {
        self.fetch_selected(datasets, None, dest_dir, self.options.force, cancel)
    }

    /// Like [`Downloader::fetch_all`], but only the dataset labeled `only` is
    /// fetched when given. File names are still assigned across all of
    /// `datasets`, so a file lands under the same name whichever subset is
    /// requested.
    pub fn fetch_selected(
        &self,
        datasets: &[&RefDataset],
        only: Option<&str>,
        dest_dir: &Utf8Path,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<FetchReport, RefmanError> {
        let started_at = Utc::now();
        fs::create_dir_all(dest_dir.as_std_path())
            .map_err(|err| RefmanError::Filesystem(format!("create {dest_dir}: {err}")))?;

        let mut jobs = plan_jobs(datasets, dest_dir);
        if let Some(label) = only {
            jobs.retain(|job| job.label == label);
        }
        link_duplicates(&mut jobs);
        let outcomes = self.run_jobs(&jobs, force, cancel);

        let mut files: Vec<FileReport> = Vec::with_capacity(jobs.len());
        for (job, outcome) in jobs.into_iter().zip(outcomes) {
            let outcome = match (job.same_as, outcome) {
                (_, Some(outcome)) => outcome,
                (Some(primary), None) => files[primary].outcome.clone(),
                (None, None) => FileOutcome::Failed {
                    reason: FailureReason::Terminal {
                        message: "download worker stopped unexpectedly".to_string(),
                    },
                },
            };
            files.push(FileReport {
                label: job.label,
                kind: job.kind,
                source: job.source.to_string(),
                outcome,
            });
        }

        Ok(FetchReport {
            destination: dest_dir.to_owned(),
            started_at,
            finished_at: Utc::now(),
            files,
        })
    }

    fn run_jobs(
        &self,
        jobs: &[Job],
        force: bool,
        cancel: &CancelToken,
    ) -> Vec<Option<FileOutcome>> {
        let primaries: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.same_as.is_none())
            .map(|(index, _)| index)
            .collect();
        let workers = self.options.parallelism.clamp(1, primaries.len().max(1));
        let next = AtomicUsize::new(0);

        let finished: Vec<(usize, FileOutcome)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let slot = next.fetch_add(1, Ordering::Relaxed);
                            let Some(&index) = primaries.get(slot) else {
                                break;
                            };
                            done.push((index, self.fetch_one(&jobs[index], force, cancel)));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap_or_default())
                .collect()
        });

        let mut outcomes = vec![None; jobs.len()];
        for (index, outcome) in finished {
            outcomes[index] = Some(outcome);
        }
        outcomes
    }

    fn fetch_one(&self, job: &Job, force: bool, cancel: &CancelToken) -> FileOutcome {
        let result = match &job.source {
            FileSource::Unparsed { raw, reason } => Err((
                RefmanError::InvalidUrl {
                    label: job.label.clone(),
                    kind: job.kind,
                    value: raw.clone(),
                    reason: reason.clone(),
                },
                0,
            )),
            _ if cancel.is_cancelled() => Err((RefmanError::Cancelled, 0)),
            _ if !force && job.target.exists() => {
                debug!(label = %job.label, kind = %job.kind, path = %job.target, "already present");
                return FileOutcome::AlreadyPresent {
                    path: job.target.clone(),
                };
            }
            FileSource::Local(path) => copy_local(path, &job.target)
                .map(|bytes| (bytes, 1))
                .map_err(|err| (err, 1)),
            FileSource::Remote(url) => self.fetch_remote(url, &job.target, cancel),
        };

        match result {
            Ok((bytes, attempts)) => {
                info!(
                    label = %job.label,
                    kind = %job.kind,
                    path = %job.target,
                    bytes,
                    attempts,
                    "downloaded"
                );
                FileOutcome::Downloaded {
                    path: job.target.clone(),
                }
            }
            Err((err, attempts)) => {
                let reason = FailureReason::from_error(err, attempts);
                warn!(
                    label = %job.label,
                    kind = %job.kind,
                    source = %job.source,
                    %reason,
                    "download failed"
                );
                FileOutcome::Failed { reason }
            }
        }
    }

    /// Retry loop around single transfers. Returns bytes written and attempts used.
    fn fetch_remote(
        &self,
        url: &Url,
        target: &Utf8Path,
        cancel: &CancelToken,
    ) -> Result<(u64, u32), (RefmanError, u32)> {
        let policy = &self.options.retry;
        let mut attempt = 0u32;
        loop {
            match self.transfer(url, target, cancel) {
                Ok(bytes) => return Ok((bytes, attempt + 1)),
                Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(%url, attempt = attempt + 1, ?delay, error = %err, "retrying");
                    if !cancel.sleep(delay) {
                        return Err((RefmanError::Cancelled, attempt + 1));
                    }
                    attempt += 1;
                }
                Err(err) => return Err((err, attempt + 1)),
            }
        }
    }

    fn transfer(
        &self,
        url: &Url,
        target: &Utf8Path,
        cancel: &CancelToken,
    ) -> Result<u64, RefmanError> {
        let mut temp = temp_beside(target)?;
        let bytes = self.client.fetch(url, temp.as_file_mut(), cancel)?;
        temp.as_file_mut()
            .flush()
            .map_err(|err| RefmanError::Filesystem(err.to_string()))?;
        temp.persist(target.as_std_path())
            .map_err(|err| RefmanError::Filesystem(format!("persist {target}: {}", err.error)))?;
        Ok(bytes)
    }
}

fn copy_local(source: &Utf8Path, target: &Utf8Path) -> Result<u64, RefmanError> {
    let mut input = fs::File::open(source.as_std_path())
        .map_err(|err| RefmanError::Filesystem(format!("open {source}: {err}")))?;
    let mut temp = temp_beside(target)?;
    let bytes = std::io::copy(&mut input, temp.as_file_mut())
        .map_err(|err| RefmanError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(target.as_std_path())
        .map_err(|err| RefmanError::Filesystem(format!("persist {target}: {}", err.error)))?;
    Ok(bytes)
}

fn temp_beside(target: &Utf8Path) -> Result<NamedTempFile, RefmanError> {
    let parent = target
        .parent()
        .ok_or_else(|| RefmanError::Filesystem(format!("invalid destination {target}")))?;
    Builder::new()
        .prefix(".refman-part")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| RefmanError::Filesystem(err.to_string()))
}

/// Assign every file a distinct destination name derived from its source.
/// Names depend only on the datasets and their order, never on which of them
/// a request selects.
fn plan_jobs(datasets: &[&RefDataset], dest_dir: &Utf8Path) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::new();
    let mut claimed: HashMap<String, String> = HashMap::new();

    for dataset in datasets {
        for (kind, source) in dataset.files() {
            let base = target_name(source, &dataset.label, kind);
            let name = if matches!(source, FileSource::Unparsed { .. }) {
                // never written, so it claims nothing
                base
            } else {
                let source_key = source.to_string();
                let candidates = [
                    base.clone(),
                    sanitize(&format!("{}-{base}", dataset.label)),
                    sanitize(&format!("{}-{kind}-{base}", dataset.label)),
                ];
                // the last candidate embeds label and kind, which are unique together
                let name = candidates
                    .iter()
                    .find(|candidate| {
                        claimed
                            .get(*candidate)
                            .is_none_or(|owner| *owner == source_key)
                    })
                    .unwrap_or(&candidates[2])
                    .clone();
                claimed.entry(name.clone()).or_insert(source_key);
                name
            };

            jobs.push(Job {
                label: dataset.label.clone(),
                kind,
                source: source.clone(),
                target: dest_dir.join(&name),
                same_as: None,
            });
        }
    }
    jobs
}

/// Point each job at the first earlier job writing the same source to the
/// same file, so that file is fetched once.
fn link_duplicates(jobs: &mut [Job]) {
    let mut first: HashMap<Utf8PathBuf, usize> = HashMap::new();
    for index in 0..jobs.len() {
        if matches!(jobs[index].source, FileSource::Unparsed { .. }) {
            continue;
        }
        match first.get(&jobs[index].target) {
            Some(&primary) if jobs[primary].source == jobs[index].source => {
                jobs[index].same_as = Some(primary);
            }
            Some(_) => {}
            None => {
                first.insert(jobs[index].target.clone(), index);
            }
        }
    }
}

fn target_name(source: &FileSource, label: &str, kind: FileKind) -> String {
    source
        .file_name()
        .map(|name| sanitize(&name))
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| sanitize(&format!("{label}.{}", kind.default_extension())))
}

fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect()
}
