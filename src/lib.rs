//! Per-project registries of genomic reference files.
//!
//! A registry is a TOML file mapping dataset labels to the FASTA, GenBank, GFA,
//! GFF, GTF and BED files that make up a reference. [`app::App`] exposes the
//! `init`, `register`, `list`, `download` and `remove` operations on top of
//! path resolution ([`location`]), persistence ([`store`]), the in-memory model
//! ([`project`]) and retrieval ([`download`]).

pub mod app;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod location;
pub mod output;
pub mod project;
pub mod remote;
pub mod store;
