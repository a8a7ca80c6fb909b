use std::fmt;
use std::fs;

use camino::Utf8PathBuf;
use reqwest::Url;
use serde::Serialize;

use crate::error::RefmanError;

/// The closed set of reference file kinds a dataset can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Fasta,
    Genbank,
    Gfa,
    Gff,
    Gtf,
    Bed,
}

impl FileKind {
    /// Fixed field order used wherever files are enumerated.
    pub const ALL: [FileKind; 6] = [
        FileKind::Fasta,
        FileKind::Genbank,
        FileKind::Gfa,
        FileKind::Gff,
        FileKind::Gtf,
        FileKind::Bed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Fasta => "fasta",
            FileKind::Genbank => "genbank",
            FileKind::Gfa => "gfa",
            FileKind::Gff => "gff",
            FileKind::Gtf => "gtf",
            FileKind::Bed => "bed",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            FileKind::Fasta => "fasta",
            FileKind::Genbank => "gbk",
            FileKind::Gfa => "gfa",
            FileKind::Gff => "gff",
            FileKind::Gtf => "gtf",
            FileKind::Bed => "bed",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a registered reference file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum FileSource {
    Remote(Url),
    Local(Utf8PathBuf),
    /// A stored value that does not parse. Kept verbatim so the registry still
    /// loads; fetching it fails for that file only.
    Unparsed { raw: String, reason: String },
}

impl FileSource {
    /// Syntactic parse only. Local paths are not checked for existence here so
    /// that a registry referencing a since-moved file still loads.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let value = raw.trim();
        if value.is_empty() {
            return Err("empty value".to_string());
        }

        match Url::parse(value) {
            // single-letter schemes are Windows drive prefixes, not URLs
            Ok(url) if url.scheme().len() > 1 => match url.scheme() {
                "http" | "https" => {
                    if url.host_str().map(str::is_empty).unwrap_or(true) {
                        return Err("URL has no host".to_string());
                    }
                    Ok(FileSource::Remote(url))
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| "file URL has no usable path".to_string())?;
                    let path = Utf8PathBuf::from_path_buf(path)
                        .map_err(|_| "file URL is not valid UTF-8".to_string())?;
                    Ok(FileSource::Local(path))
                }
                other => Err(format!("unsupported URL scheme '{other}'")),
            },
            Ok(_) => Ok(FileSource::Local(Utf8PathBuf::from(value))),
            Err(err) if value.contains("://") => Err(err.to_string()),
            Err(_) => Ok(FileSource::Local(Utf8PathBuf::from(value))),
        }
    }

    /// Lenient counterpart of [`FileSource::parse`] for values read back from a
    /// registry file.
    pub fn from_stored(raw: String) -> Self {
        match Self::parse(&raw) {
            Ok(source) => source,
            Err(reason) => FileSource::Unparsed { raw, reason },
        }
    }

    /// Parse and check a value supplied at registration. Local files must exist
    /// and are stored as absolute paths.
    pub fn for_registration(label: &str, kind: FileKind, raw: &str) -> Result<Self, RefmanError> {
        let invalid = |reason: String| RefmanError::InvalidUrl {
            label: label.to_string(),
            kind,
            value: raw.to_string(),
            reason,
        };

        match Self::parse(raw).map_err(invalid)? {
            FileSource::Remote(url) => Ok(FileSource::Remote(url)),
            FileSource::Local(path) => {
                let absolute = fs::canonicalize(path.as_std_path())
                    .map_err(|err| invalid(format!("local file is not accessible: {err}")))?;
                if !absolute.is_file() {
                    return Err(invalid("local path is not a regular file".to_string()));
                }
                let absolute = Utf8PathBuf::from_path_buf(absolute)
                    .map_err(|_| invalid("local path is not valid UTF-8".to_string()))?;
                Ok(FileSource::Local(absolute))
            }
            FileSource::Unparsed { reason, .. } => Err(invalid(reason)),
        }
    }

    /// Final path segment, percent-decoded for URLs.
    pub fn file_name(&self) -> Option<String> {
        match self {
            FileSource::Remote(url) => url
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes()))
                        .into_owned()
                }),
            FileSource::Local(path) => path.file_name().map(str::to_string),
            FileSource::Unparsed { .. } => None,
        }
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Remote(url) => write!(f, "{url}"),
            FileSource::Local(path) => write!(f, "{path}"),
            FileSource::Unparsed { raw, .. } => write!(f, "{raw}"),
        }
    }
}

impl From<FileSource> for String {
    fn from(value: FileSource) -> Self {
        value.to_string()
    }
}

/// A labeled combination of reference files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefDataset {
    pub label: String,
    pub fasta: Option<FileSource>,
    pub genbank: Option<FileSource>,
    pub gfa: Option<FileSource>,
    pub gff: Option<FileSource>,
    pub gtf: Option<FileSource>,
    pub bed: Option<FileSource>,
}

impl RefDataset {
    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fasta: None,
            genbank: None,
            gfa: None,
            gff: None,
            gtf: None,
            bed: None,
        }
    }

    /// Build a dataset from raw user input, validating the label, every value
    /// and the at-least-one-file invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        label: impl Into<String>,
        fasta: Option<String>,
        genbank: Option<String>,
        gfa: Option<String>,
        gff: Option<String>,
        gtf: Option<String>,
        bed: Option<String>,
    ) -> Result<Self, RefmanError> {
        let files = [fasta, genbank, gfa, gff, gtf, bed];
        Self::try_from_files(
            label,
            FileKind::ALL
                .into_iter()
                .zip(files)
                .filter_map(|(kind, value)| value.map(|value| (kind, value))),
        )
    }

    pub fn try_from_files<I, S>(label: impl Into<String>, files: I) -> Result<Self, RefmanError>
    where
        I: IntoIterator<Item = (FileKind, S)>,
        S: AsRef<str>,
    {
        let label = label.into().trim().to_string();
        let mut dataset = Self::empty(label);
        dataset.validate_label()?;
        for (kind, raw) in files {
            let source = FileSource::for_registration(&dataset.label, kind, raw.as_ref())?;
            dataset.set(kind, Some(source));
        }
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn get(&self, kind: FileKind) -> Option<&FileSource> {
        match kind {
            FileKind::Fasta => self.fasta.as_ref(),
            FileKind::Genbank => self.genbank.as_ref(),
            FileKind::Gfa => self.gfa.as_ref(),
            FileKind::Gff => self.gff.as_ref(),
            FileKind::Gtf => self.gtf.as_ref(),
            FileKind::Bed => self.bed.as_ref(),
        }
    }

    pub fn set(&mut self, kind: FileKind, source: Option<FileSource>) {
        let slot = match kind {
            FileKind::Fasta => &mut self.fasta,
            FileKind::Genbank => &mut self.genbank,
            FileKind::Gfa => &mut self.gfa,
            FileKind::Gff => &mut self.gff,
            FileKind::Gtf => &mut self.gtf,
            FileKind::Bed => &mut self.bed,
        };
        *slot = source;
    }

    /// Populated file slots in fasta, genbank, gfa, gff, gtf, bed order.
    pub fn files(&self) -> impl Iterator<Item = (FileKind, &FileSource)> + '_ {
        FileKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|source| (kind, source)))
    }

    pub fn urls(&self) -> Vec<String> {
        self.files().map(|(_, source)| source.to_string()).collect()
    }

    pub fn validate(&self) -> Result<(), RefmanError> {
        self.validate_label()?;
        if self.files().next().is_none() {
            return Err(RefmanError::InvalidDataset {
                label: self.label.clone(),
                reason: "at least one file (fasta, genbank, gfa, gff, gtf or bed) is required"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_label(&self) -> Result<(), RefmanError> {
        if self.label.trim().is_empty() {
            return Err(RefmanError::InvalidDataset {
                label: self.label.clone(),
                reason: "label must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
