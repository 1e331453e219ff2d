use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::domain::alert::{AlertLookup, AlertsByPurl, ServiceResult};
use crate::domain::package::DiffTree;
use crate::domain::policy::SecurityPolicy;
use crate::domain::ports::{AlertService, DependencyResolver, DiffRequest, PolicySource};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

// ─── JsonDiffResolver ────────────────────────────────────────────────────────

/// Resolver backed by a serialized diff tree. `commit` writes nothing; it
/// only records that the diff was let through.
pub struct JsonDiffResolver {
    diff: DiffTree,
    overrides: BTreeMap<String, String>,
    committed: AtomicBool,
}

impl JsonDiffResolver {
    pub fn new(diff: DiffTree) -> Self {
        Self {
            diff,
            overrides: BTreeMap::new(),
            committed: AtomicBool::new(false),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(read_json(path)?))
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DependencyResolver for JsonDiffResolver {
    async fn compute_diff(&self, _request: &DiffRequest) -> Result<DiffTree> {
        Ok(self.diff.clone())
    }

    async fn commit(&self, diff: &DiffTree) -> Result<()> {
        info!(children = diff.children.len(), "diff approved");
        self.committed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn overrides(&self) -> BTreeMap<String, String> {
        self.overrides.clone()
    }
}

// ─── FileAlertService ────────────────────────────────────────────────────────

/// Alert service answering from a `purl → alerts` JSON file.
///
/// The file is read on every lookup. A read or parse failure is reported
/// as a failed lookup, never as an error.
pub struct FileAlertService {
    path: PathBuf,
}

impl FileAlertService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AlertService for FileAlertService {
    async fn lookup(&self, request: &AlertLookup) -> ServiceResult<AlertsByPurl> {
        let all: AlertsByPurl = match read_json(&self.path) {
            Ok(all) => all,
            Err(e) => {
                return ServiceResult::failed(
                    "alert data unavailable",
                    Some(format!("{e:#}")),
                )
            }
        };
        let data = request
            .purls
            .iter()
            .map(|purl| (purl.clone(), all.get(purl).cloned().unwrap_or_default()))
            .collect();
        ServiceResult::Ok(data)
    }
}

// ─── FilePolicySource ────────────────────────────────────────────────────────

/// Policy from a JSON file of `{ "<alertType>": { "action": "<action>" } }`.
/// A missing file means an empty policy.
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn fetch_policy(&self, _org: Option<&str>) -> Result<SecurityPolicy> {
        if !self.path.exists() {
            return Ok(SecurityPolicy::default());
        }
        read_json(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::PolicyAction;
    use std::io::Write;

    fn json_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn alert_file_answers_requested_purls_only() {
        let f = json_file(
            r#"{
                "pkg:npm/tslib@1.14.1": [{"type": "envVars", "file": "tslib.js", "start": 1, "end": 9}],
                "pkg:npm/other@1.0.0": [{"type": "shellAccess"}]
            }"#,
        );
        let service = FileAlertService::new(f.path());
        let request = AlertLookup {
            purls: vec!["pkg:npm/tslib@1.14.1".into(), "pkg:npm/clean@2.0.0".into()],
            ..AlertLookup::default()
        };
        let ServiceResult::Ok(data) = service.lookup(&request).await else {
            panic!("lookup failed");
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data["pkg:npm/tslib@1.14.1"][0].key(), "envVars at 1:9");
        assert!(data["pkg:npm/clean@2.0.0"].is_empty());
    }

    #[tokio::test]
    async fn unreadable_alert_file_is_a_failed_lookup() {
        let service = FileAlertService::new("/nonexistent/alerts.json");
        let result = service.lookup(&AlertLookup::default()).await;
        assert!(!result.is_ok());
    }

    #[tokio::test]
    async fn policy_file_tolerates_unknown_actions() {
        let f = json_file(r#"{"envVars": {"action": "error"}, "gptMalware": {"action": "quarantine"}}"#);
        let policy = FilePolicySource::new(f.path()).fetch_policy(None).await.unwrap();
        assert_eq!(policy.action_for("envVars"), Some(PolicyAction::Error));
        assert_eq!(policy.action_for("gptMalware"), None);

        let missing = FilePolicySource::new("/nonexistent/policy.json").fetch_policy(None).await.unwrap();
        assert_eq!(missing.action_for("envVars"), None);
    }

    #[tokio::test]
    async fn diff_file_round_trips_through_the_resolver() {
        let f = json_file(r#"{"children": [{"action": "ADD", "ideal": {"name": "tslib", "version": "1.14.1"}}]}"#);
        let resolver = JsonDiffResolver::load(f.path()).unwrap();
        let diff = resolver.compute_diff(&DiffRequest::default()).await.unwrap();
        assert_eq!(diff.children.len(), 1);
        assert!(!resolver.committed());
        resolver.commit(&diff).await.unwrap();
        assert!(resolver.committed());
    }
}
