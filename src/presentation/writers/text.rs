use anyhow::Result;
use std::fmt::Write as FmtWrite;

use crate::domain::{ports::ReportWriter, report::Report};
use crate::presentation::writers::verdict;

/// Plain dump: one line per finding with its full (folded) coordinates.
pub struct TextWriter;

impl ReportWriter for TextWriter {
    fn format(&self, report: &Report) -> Result<String> {
        let mut s = String::new();
        writeln!(s, "report: {}", report.report_id)?;
        writeln!(s, "generated: {}", report.generated_at)?;
        writeln!(s, "verdict: {}", verdict(report))?;
        writeln!(
            s,
            "checked {} package(s), {} finding(s) at or above {}, {} blocking",
            report.summary.packages_checked,
            report.summary.total_violations,
            report.report_level,
            report.summary.blocking,
        )?;

        for row in report.violations.rows() {
            let mut coords = format!("{}/{}", row.ecosystem, row.package);
            if let Some(version) = row.version {
                let _ = write!(coords, "@{version}");
            }
            if let Some(file) = row.file {
                let _ = write!(coords, " {file}");
            }
            if let Some(key) = row.alert_key {
                let _ = write!(coords, " [{key}]");
            }
            writeln!(s, "{:<7} {} {} {}", row.leaf.policy.as_str(), row.leaf.alert_type, coords, row.leaf.url)?;
        }
        Ok(s)
    }
}
