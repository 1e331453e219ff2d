use crate::domain::{
    alert::{AlertLookup, AlertsByPurl, ServiceResult},
    package::DiffTree,
    policy::SecurityPolicy,
    report::Report,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// What the user asked the package manager to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffRequest {
    /// Package specs named on the command line (`tslib@1`, `left-pad`).
    pub add: Vec<String>,
    /// Manifests the operation reads and rewrites, reported alongside findings.
    pub manifest_files: Vec<String>,
}

/// Port: the resolver's tree-mutation entry point, split in two so a gate can
/// sit between computing the diff and writing it to disk.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Compute the full diff without touching the filesystem.
    async fn compute_diff(&self, request: &DiffRequest) -> Result<DiffTree>;

    /// Apply a previously computed diff.
    async fn commit(&self, diff: &DiffTree) -> Result<()>;

    /// Version pins from the resolver's override set (name → version).
    fn overrides(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Port: threat-intelligence lookup (one batched call per gate).
#[async_trait]
pub trait AlertService: Send + Sync {
    async fn lookup(&self, request: &AlertLookup) -> ServiceResult<AlertsByPurl>;
}

/// Port: the organization's action map.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_policy(&self, org: Option<&str>) -> Result<SecurityPolicy>;
}

/// Port: report formatting (implemented by JsonWriter, MarkdownWriter, TableWriter, TextWriter)
pub trait ReportWriter: Send + Sync {
    /// Serializes the report to a string
    fn format(&self, report: &Report) -> Result<String>;
}

/// Port: where a finished report goes (stdout, a file, a test buffer).
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &Report) -> Result<()>;
}
