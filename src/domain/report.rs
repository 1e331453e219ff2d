use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::policy::{FoldLevel, PolicyAction};
use crate::domain::violations::ViolationsMap;

/// Outcome of the policy decision engine.
///
/// `violations` is `None` in short mode, where only the verdict is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub healthy: bool,
    pub violations: Option<ViolationsMap>,
}

/// A rendered-ready security report for one gated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub report_id: String,
    pub generated_at: String,
    pub healthy: bool,
    pub report_level: PolicyAction,
    #[serde(flatten)]
    pub violations: ViolationsMap,
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub packages_checked: usize,
    pub total_violations: usize,
    pub blocking: usize,
}

impl Report {
    pub fn new(decision: Decision, fold: FoldLevel, report_level: PolicyAction, packages_checked: usize) -> Self {
        let violations = decision
            .violations
            .unwrap_or_else(|| ViolationsMap::new(fold));
        let rows = violations.rows();
        let blocking = rows
            .iter()
            .filter(|r| r.leaf.policy == PolicyAction::Error)
            .count();
        let total_violations = rows.len();

        Report {
            report_id: format!(
                "rpt_{}_{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                Uuid::new_v4().simple()
            ),
            generated_at: Utc::now().to_rfc3339(),
            healthy: decision.healthy,
            report_level,
            violations,
            summary: Summary {
                packages_checked,
                total_violations,
                blocking,
            },
        }
    }
}

/// Output format of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Json,
    #[serde(alias = "md")]
    Markdown,
    Table,
    #[default]
    Text,
}

impl OutputKind {
    /// Format implied by a report path: `.json` and `.md` win over whatever
    /// kind was selected.
    pub fn for_path(path: &std::path::Path, selected: OutputKind) -> OutputKind {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => OutputKind::Json,
            Some("md") => OutputKind::Markdown,
            _ => selected,
        }
    }
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputKind::Json),
            "md" | "markdown" => Ok(OutputKind::Markdown),
            "table" => Ok(OutputKind::Table),
            "text" => Ok(OutputKind::Text),
            other => Err(format!("unknown output kind: {other}")),
        }
    }
}
