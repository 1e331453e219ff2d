use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::alert::{AlertLookup, AlertsByPurl, ServiceResult};
use crate::domain::policy::SecurityPolicy;
use crate::domain::ports::{AlertService, PolicySource, ReportSink};
use crate::domain::report::Report;

/// In-memory implementation of [`AlertService`].
///
/// Answers each lookup from a fixed `purl → alerts` map. Purls it does not
/// know come back with no alerts, as the real service does for clean
/// packages. Every request is kept so callers can assert on what was asked.
pub struct MapAlertService {
    alerts: AlertsByPurl,
    requests: Mutex<Vec<AlertLookup>>,
}

impl MapAlertService {
    pub fn new(alerts: AlertsByPurl) -> Self {
        Self {
            alerts,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AlertLookup> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertService for MapAlertService {
    async fn lookup(&self, request: &AlertLookup) -> ServiceResult<AlertsByPurl> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let data = request
            .purls
            .iter()
            .map(|purl| {
                let alerts = self.alerts.get(purl).cloned().unwrap_or_default();
                (purl.clone(), alerts)
            })
            .collect();
        ServiceResult::Ok(data)
    }
}

/// [`AlertService`] that always fails, for exercising fail-open/fail-closed paths.
pub struct UnavailableAlertService {
    pub message: String,
}

#[async_trait]
impl AlertService for UnavailableAlertService {
    async fn lookup(&self, _request: &AlertLookup) -> ServiceResult<AlertsByPurl> {
        ServiceResult::failed(self.message.clone(), Some("service unavailable".into()))
    }
}

/// In-memory implementation of [`PolicySource`]. The org is ignored.
pub struct MapPolicySource(SecurityPolicy);

impl MapPolicySource {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self(policy)
    }
}

#[async_trait]
impl PolicySource for MapPolicySource {
    async fn fetch_policy(&self, _org: Option<&str>) -> Result<SecurityPolicy> {
        Ok(self.0.clone())
    }
}

/// [`ReportSink`] that keeps every emitted report in memory.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
}

impl MemorySink {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, report: &Report) -> Result<()> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
        Ok(())
    }
}
