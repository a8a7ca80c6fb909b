use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use refman::domain::{FileKind, FileSource, RefDataset};
use refman::error::RefmanError;
use refman::location::RegistryLocation;
use refman::project::Project;
use refman::store::RegistryStore;

fn location(dir: &tempfile::TempDir) -> RegistryLocation {
    RegistryLocation {
        path: Utf8PathBuf::from_path_buf(dir.path().join("refman.toml")).unwrap(),
        is_global: false,
    }
}

fn sample_project() -> Project {
    let sars = RefDataset::try_new(
        "sars-cov-2",
        Some("https://host/refs/MN908947.3.fasta".to_string()),
        Some("https://host/refs/MN908947.3.gbk".to_string()),
        None,
        Some("https://host/refs/MN908947.3.gff3".to_string()),
        None,
        Some("https://host/refs/primers.bed".to_string()),
    )
    .unwrap();
    let ecoli = RefDataset::try_new(
        "e_coli",
        None,
        None,
        Some("http://mirror.example.org/ecoli.gfa".to_string()),
        None,
        Some("https://host/ecoli.gtf".to_string()),
        None,
    )
    .unwrap();

    Project::new(
        Some("Viral references".to_string()),
        Some("Shared across the lab".to_string()),
    )
    .register(sars)
    .unwrap()
    .register(ecoli)
    .unwrap()
}

#[test]
fn write_then_read_preserves_project() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    let project = sample_project();

    RegistryStore.write(&location, &project).unwrap();
    let loaded = RegistryStore.read(&location).unwrap();
    assert_eq!(loaded, project);
    assert_eq!(
        loaded
            .get_datasets()
            .iter()
            .map(|d| d.label.as_str())
            .collect::<Vec<_>>(),
        vec!["e_coli", "sars-cov-2"]
    );
}

#[test]
fn read_missing_registry() {
    let dir = tempfile::tempdir().unwrap();
    let err = RegistryStore.read(&location(&dir)).unwrap_err();
    assert_matches!(err, RefmanError::RegistryNotFound(_));
}

#[test]
fn read_malformed_registry() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    fs::write(location.path(), "title = [unclosed").unwrap();
    let err = RegistryStore.read(&location).unwrap_err();
    assert_matches!(err, RefmanError::RegistryParse { .. });
}

#[test]
fn bad_url_is_kept_through_read_and_write() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    fs::write(
        location.path(),
        "[datasets.t1]\nfasta = \"gopher://host/a.fasta\"\nbed = \"https://host/a.bed\"\n",
    )
    .unwrap();

    let project = RegistryStore.read(&location).unwrap();
    let dataset = project.get_dataset("t1").unwrap();
    assert_matches!(dataset.get(FileKind::Fasta), Some(FileSource::Unparsed { .. }));

    RegistryStore.write(&location, &project).unwrap();
    let rewritten = fs::read_to_string(location.path()).unwrap();
    assert!(rewritten.contains("fasta = \"gopher://host/a.fasta\""));
}

#[test]
fn wrong_value_type_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    fs::write(location.path(), "[datasets.t1]\nfasta = 3\n").unwrap();
    let err = RegistryStore.read(&location).unwrap_err();
    assert_matches!(err, RefmanError::RegistryParse { .. });
}

#[test]
fn hand_written_registry_loads() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    fs::write(
        location.path(),
        r#"
title = "Hand written"

[datasets.t1]
fasta = "https://host/a.fasta"
bed = "https://host/a.bed"
"#,
    )
    .unwrap();

    let project = RegistryStore.read(&location).unwrap();
    assert_eq!(project.title(), Some("Hand written"));
    assert_eq!(project.description(), None);
    let urls = project.get_dataset_urls("t1").unwrap();
    assert_eq!(urls, vec!["https://host/a.fasta", "https://host/a.bed"]);
    let dataset = project.get_dataset("t1").unwrap();
    assert!(dataset.get(FileKind::Gff).is_none());
}

#[test]
fn create_new_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    RegistryStore.create_new(&location, &sample_project()).unwrap();
    let before = fs::read_to_string(location.path()).unwrap();

    let err = RegistryStore
        .create_new(&location, &Project::default())
        .unwrap_err();
    assert_matches!(err, RefmanError::RegistryAlreadyExists(_));
    assert_eq!(fs::read_to_string(location.path()).unwrap(), before);
}

#[test]
fn write_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let location = location(&dir);
    RegistryStore.write(&location, &sample_project()).unwrap();
    RegistryStore.write(&location, &Project::default()).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["refman.toml".to_string()]);
    assert!(RegistryStore.read(&location).unwrap().is_empty());
}
