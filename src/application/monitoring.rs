use crate::domain::alert::{AlertLookup, AlertsByPurl, ServiceResult};
use crate::domain::ports::{AlertService, DependencyResolver, DiffRequest};
use crate::domain::package::DiffTree;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, instrument};

// ─── PerfReport ──────────────────────────────────────────────────────────────

/// A single timed operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpTiming {
    /// Operation name: "alert_lookup" or "compute_diff".
    pub operation: &'static str,
    /// Number of items involved (purls looked up, or packages requested).
    pub items: usize,
    /// Elapsed wall time in milliseconds.
    pub duration_ms: u128,
    /// Whether the call succeeded.
    pub ok: bool,
}

/// Accumulated performance timings for one shadowed invocation.
///
/// Shared across all decorator instances for one run via `Arc<Mutex<_>>`.
/// After the run, pass to [`crate::presentation::cli_summary::print_perf_summary`]
/// to render a human-readable table.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct PerfReport {
    pub timings: Vec<OpTiming>,
    pub total_purls_looked_up: usize,
    pub failed_lookups: usize,
    pub total_ms: u128,
}

impl PerfReport {
    pub fn new() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Copy of the current state, or an empty report if the lock is poisoned.
    pub fn snapshot(report: &Arc<Mutex<Self>>) -> Self {
        report.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(report: &Arc<Mutex<Self>>, timing: OpTiming) {
        if let Ok(mut r) = report.lock() {
            r.total_ms += timing.duration_ms;
            if timing.operation == "alert_lookup" {
                r.total_purls_looked_up += timing.items;
                if !timing.ok {
                    r.failed_lookups += 1;
                }
            }
            r.timings.push(timing);
        }
    }
}

// ─── MonitoringAlertService ──────────────────────────────────────────────────

/// Decorator: wraps any `AlertService`, measures wall time per `lookup`
/// call, and appends the result to the shared `PerfReport`.
pub struct MonitoringAlertService {
    inner: Arc<dyn AlertService>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringAlertService {
    pub fn new(inner: Arc<dyn AlertService>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

#[async_trait]
impl AlertService for MonitoringAlertService {
    #[instrument(
        name = "alert_lookup",
        skip(self, request),
        fields(purls = request.purls.len(), org = request.org.as_deref().unwrap_or("")),
        level = "info"
    )]
    async fn lookup(&self, request: &AlertLookup) -> ServiceResult<AlertsByPurl> {
        let start = Instant::now();
        let result = self.inner.lookup(request).await;
        let duration_ms = start.elapsed().as_millis();

        let alerts = match &result {
            ServiceResult::Ok(data) => data.values().map(Vec::len).sum(),
            ServiceResult::Failed { .. } => 0,
        };
        info!(purls = request.purls.len(), alerts, ok = result.is_ok(), duration_ms, "alert_lookup completed");

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "alert_lookup",
                items: request.purls.len(),
                duration_ms,
                ok: result.is_ok(),
            },
        );

        result
    }
}

// ─── MonitoringResolver ──────────────────────────────────────────────────────

/// Decorator: wraps any `DependencyResolver` and times `compute_diff`.
pub struct MonitoringResolver {
    inner: Arc<dyn DependencyResolver>,
    report: Arc<Mutex<PerfReport>>,
}

impl MonitoringResolver {
    pub fn new(inner: Arc<dyn DependencyResolver>, report: Arc<Mutex<PerfReport>>) -> Self {
        Self { inner, report }
    }
}

#[async_trait]
impl DependencyResolver for MonitoringResolver {
    #[instrument(name = "compute_diff", skip(self, request), fields(requested = request.add.len()), level = "info")]
    async fn compute_diff(&self, request: &DiffRequest) -> Result<DiffTree> {
        let start = Instant::now();
        let result = self.inner.compute_diff(request).await;
        let duration_ms = start.elapsed().as_millis();

        info!(children = result.as_ref().map(|d| d.children.len()).unwrap_or(0), duration_ms, "compute_diff completed");

        PerfReport::record(
            &self.report,
            OpTiming {
                operation: "compute_diff",
                items: request.add.len(),
                duration_ms,
                ok: result.is_ok(),
            },
        );

        result
    }

    async fn commit(&self, diff: &DiffTree) -> Result<()> {
        self.inner.commit(diff).await
    }

    fn overrides(&self) -> BTreeMap<String, String> {
        self.inner.overrides()
    }
}
