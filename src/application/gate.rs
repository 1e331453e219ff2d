use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::application::alerts::PurlResolver;
use crate::application::diff_walker::walk_diff;
use crate::application::policy::{decide, DecisionOptions};
use crate::application::session::SessionContext;
use crate::domain::alert::ServiceResult;
use crate::domain::error::ShadowError;
use crate::domain::package::DiffTree;
use crate::domain::policy::SecurityPolicy;
use crate::domain::ports::{AlertService, DependencyResolver, DiffRequest, PolicySource, ReportSink};
use crate::domain::report::Report;

/// Where the gate is in its lifecycle for the current operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Idle,
    DiffComputed { packages: usize },
    Approved,
    Blocked { reason: String },
}

// ─── ResolverGate ────────────────────────────────────────────────────────────

/// Decorator: wraps any `DependencyResolver`, evaluates every computed diff
/// against the security policy, and lets `commit` through only when the
/// diff was approved.
///
/// The diff walk, the alert lookup and the decision all finish inside
/// `compute_diff`, before anything could be written to disk.
pub struct ResolverGate {
    inner: Arc<dyn DependencyResolver>,
    session: Arc<SessionContext>,
    alerts: PurlResolver,
    policy_source: Arc<dyn PolicySource>,
    policy: OnceCell<SecurityPolicy>,
    sink: Arc<dyn ReportSink>,
    state: Mutex<GateState>,
    evaluated: Mutex<Option<DiffTree>>,
    last_report: Mutex<Option<Report>>,
}

impl ResolverGate {
    pub fn new(
        inner: Arc<dyn DependencyResolver>,
        session: Arc<SessionContext>,
        alert_service: Arc<dyn AlertService>,
        policy_source: Arc<dyn PolicySource>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        let alerts = PurlResolver::new(alert_service, session.ecosystem, session.org.clone());
        Self {
            inner,
            session,
            alerts,
            policy_source,
            policy: OnceCell::new(),
            sink,
            state: Mutex::new(GateState::Idle),
            evaluated: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(GateState::Blocked {
                reason: "gate state poisoned".into(),
            })
    }

    pub fn last_report(&self) -> Option<Report> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }

    /// Compute the diff, gate it, and commit it when approved.
    ///
    /// The report is `None` when the alert lookup failed and the session
    /// fails open.
    pub async fn reify(&self, request: &DiffRequest) -> Result<Option<Report>> {
        let diff = self.compute_diff(request).await?;
        self.commit(&diff).await?;
        Ok(self.last_report())
    }

    fn set_state(&self, next: GateState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Policy is fetched at most once per gate.
    async fn policy(&self) -> Result<&SecurityPolicy> {
        self.policy
            .get_or_try_init(|| self.policy_source.fetch_policy(self.session.org.as_deref()))
            .await
    }

    async fn evaluate(&self, diff: &DiffTree, request: &DiffRequest) -> Result<Option<Report>> {
        let details = walk_diff(diff, &self.session.filter)?;
        self.set_state(GateState::DiffComputed {
            packages: details.len(),
        });

        let overrides: BTreeMap<String, String> = self.inner.overrides();
        let alerts = match self.alerts.resolve(&details, &overrides).await {
            ServiceResult::Ok(alerts) => alerts,
            ServiceResult::Failed { message, cause } => {
                if self.session.safe_mode {
                    return Err(ShadowError::AlertService { message, cause }.into());
                }
                warn!(%message, "alert lookup failed; continuing without a security check");
                return Ok(None);
            }
        };

        let policy = self.policy().await?;
        let mut options: DecisionOptions = self.session.decision.clone();
        if options.manifest_files.is_empty() {
            options.manifest_files = request.manifest_files.clone();
        }
        let decision = decide(&alerts, policy, &options)?;
        let report = Report::new(decision, options.fold, options.report_level, details.len());

        self.sink
            .emit(&report)
            .map_err(|e| ShadowError::ReportGeneration(e.to_string()))?;
        Ok(Some(report))
    }
}

/// Short reports carry no leaves, so the verdict alone explains the block.
fn block_reason(report: &Report) -> String {
    match report.summary.blocking {
        0 => "the policy marked the operation unhealthy".to_string(),
        n => format!("{n} blocking alert(s)"),
    }
}

#[async_trait]
impl DependencyResolver for ResolverGate {
    #[instrument(name = "gate.compute_diff", skip_all, fields(requested = request.add.len()), level = "info")]
    async fn compute_diff(&self, request: &DiffRequest) -> Result<DiffTree> {
        self.set_state(GateState::Idle);
        if let Ok(mut evaluated) = self.evaluated.lock() {
            *evaluated = None;
        }

        let diff = self.inner.compute_diff(request).await?;

        let report = match self.evaluate(&diff, request).await {
            Ok(report) => report,
            Err(e) => {
                self.set_state(GateState::Blocked {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let verdict = match &report {
            Some(r) if !r.healthy && !self.session.accept_risks => GateState::Blocked {
                reason: block_reason(r),
            },
            Some(r) if !r.healthy => {
                warn!(blocking = r.summary.blocking, "risks accepted; proceeding despite blocking alerts");
                GateState::Approved
            }
            _ => GateState::Approved,
        };
        info!(verdict = ?verdict, "gate decision recorded");

        if let Ok(mut last) = self.last_report.lock() {
            *last = report;
        }
        if let Ok(mut evaluated) = self.evaluated.lock() {
            *evaluated = Some(diff.clone());
        }
        self.set_state(verdict);
        Ok(diff)
    }

    async fn commit(&self, diff: &DiffTree) -> Result<()> {
        match self.state() {
            GateState::Approved => {}
            GateState::Blocked { reason } => return Err(ShadowError::Blocked { reason }.into()),
            other => return Err(anyhow!("commit requested before the diff was evaluated ({other:?})")),
        }

        let matches_evaluated = self
            .evaluated
            .lock()
            .map(|e| e.as_ref() == Some(diff))
            .unwrap_or(false);
        if !matches_evaluated {
            return Err(anyhow!("commit requested for a diff the gate did not evaluate"));
        }

        self.inner.commit(diff).await
    }

    fn overrides(&self) -> BTreeMap<String, String> {
        self.inner.overrides()
    }
}
