use anyhow::Result;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::domain::{ports::ReportWriter, report::Report};
use crate::presentation::writers::{finding_lines, verdict};

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Alert Type")]
    alert_type: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Introduced by")]
    introduced_by: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Manifest file")]
    manifest_files: String,
}

pub struct TableWriter;

impl ReportWriter for TableWriter {
    fn format(&self, report: &Report) -> Result<String> {
        let lines = finding_lines(report);
        let mut out = format!(
            "{} · {} package(s) checked · {} finding(s), {} blocking\n",
            verdict(report),
            report.summary.packages_checked,
            report.summary.total_violations,
            report.summary.blocking,
        );
        if lines.is_empty() {
            return Ok(out);
        }

        let rows = lines.into_iter().map(|l| FindingRow {
            policy: l.policy,
            alert_type: l.alert_type,
            package: l.package,
            introduced_by: l.introduced_by,
            url: l.url,
            manifest_files: l.manifest_files,
        });
        out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
        out.push('\n');
        Ok(out)
    }
}
