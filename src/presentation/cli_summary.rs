use crate::application::monitoring::PerfReport;
use crate::domain::policy::PolicyAction;
use crate::domain::report::Report;
use crate::presentation::writers::finding_lines;
use colored::*;
use tabled::settings::{object::Columns, Alignment, Modify, Style};
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct FindingRow {
    policy: String,
    #[tabled(rename = "alert type")]
    alert_type: String,
    package: String,
    #[tabled(rename = "introduced by")]
    introduced_by: String,
    url: String,
}

#[derive(Tabled)]
struct SummaryRow {
    metric: String,
    value: String,
}

fn colored_policy(policy: &str) -> String {
    match policy.parse::<PolicyAction>() {
        Ok(PolicyAction::Error) => policy.red().bold().to_string(),
        Ok(PolicyAction::Warn) => policy.yellow().to_string(),
        Ok(PolicyAction::Monitor) => policy.cyan().to_string(),
        _ => policy.dimmed().to_string(),
    }
}

/// Print a coloured summary of a gate report to stderr, leaving stdout to
/// the wrapped tool.
pub fn print_report_summary(report: &Report) {
    eprintln!();
    eprintln!("{}", "SECURITY REPORT".bold().cyan());
    eprintln!("Report: {}", report.report_id.bright_yellow());
    eprintln!();

    let lines = finding_lines(report);
    if lines.is_empty() {
        eprintln!(
            "{}",
            format!("No findings at or above {}.", report.report_level).italic()
        );
    } else {
        let rows: Vec<FindingRow> = lines
            .into_iter()
            .map(|l| FindingRow {
                policy: colored_policy(&l.policy),
                alert_type: l.alert_type.bold().to_string(),
                package: l.package,
                introduced_by: l.introduced_by,
                url: l.url.dimmed().to_string(),
            })
            .collect();
        let table = Table::new(rows).with(Style::rounded()).to_string();
        eprintln!("{table}");
    }

    let s = &report.summary;
    let summary_rows = vec![
        SummaryRow {
            metric: "Packages checked".into(),
            value: s.packages_checked.to_string(),
        },
        SummaryRow {
            metric: "Findings".into(),
            value: s.total_violations.to_string().yellow().to_string(),
        },
        SummaryRow {
            metric: "Blocking".into(),
            value: s.blocking.to_string().red().to_string(),
        },
    ];
    let summary_table = Table::new(summary_rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=1)).with(Alignment::right()))
        .to_string();

    eprintln!();
    eprintln!("{summary_table}");
    if report.healthy {
        eprintln!("{}", "✓ Healthy: no blocking alerts.".bold().green());
    } else {
        eprintln!("{}", "✗ Blocked by security policy.".bold().red());
    }
    eprintln!();
}

// ─── Performance summary ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct PerfRow {
    operation: String,
    items: String,
    ok: String,
    #[tabled(rename = "time (ms)")]
    duration_ms: String,
}

/// Print a performance timing table to stderr.
pub fn print_perf_summary(report: &PerfReport) {
    if report.timings.is_empty() {
        return;
    }

    eprintln!("{}", "PERFORMANCE".bold().cyan());

    let rows: Vec<PerfRow> = report
        .timings
        .iter()
        .map(|t| PerfRow {
            operation: t.operation.dimmed().to_string(),
            items: t.items.to_string(),
            ok: if t.ok { "yes".green().to_string() } else { "no".red().to_string() },
            duration_ms: format_duration(t.duration_ms),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..=3)).with(Alignment::right()))
        .to_string();

    eprintln!("{table}");

    eprintln!(
        "  Total: {} purl(s) looked up  ·  {} failed  ·  {} ms elapsed",
        report.total_purls_looked_up.to_string().bold(),
        report.failed_lookups,
        format_duration(report.total_ms),
    );
    eprintln!();
}

fn format_duration(ms: u128) -> String {
    if ms >= 1_000 {
        format!("{:.1}s", ms as f64 / 1_000.0).yellow().to_string()
    } else if ms >= 100 {
        ms.to_string().yellow().to_string()
    } else {
        ms.to_string().green().to_string()
    }
}
