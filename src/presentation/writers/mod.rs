use crate::domain::{
    ports::{ReportSink, ReportWriter},
    report::{OutputKind, Report},
    violations::ViolationRow,
};
use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use self::{json::JsonWriter, markdown::MarkdownWriter, table::TableWriter, text::TextWriter};

pub mod json;
pub mod markdown;
pub mod table;
pub mod text;

pub fn writer_for(format: &str) -> Option<Box<dyn ReportWriter>> {
    format.parse::<OutputKind>().ok().map(writer_for_kind)
}

pub fn writer_for_kind(kind: OutputKind) -> Box<dyn ReportWriter> {
    match kind {
        OutputKind::Json => Box::new(JsonWriter),
        OutputKind::Markdown => Box::new(MarkdownWriter),
        OutputKind::Table => Box::new(TableWriter),
        OutputKind::Text => Box::new(TextWriter),
    }
}

// ─── Flattened view shared by the tabular writers ─────────────────────────────

/// One finding, rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FindingLine {
    pub policy: String,
    pub alert_type: String,
    pub package: String,
    pub introduced_by: String,
    pub url: String,
    pub manifest_files: String,
}

impl FindingLine {
    fn from_row(row: &ViolationRow<'_>) -> Self {
        Self {
            policy: row.leaf.policy.to_string(),
            alert_type: row.leaf.alert_type.clone(),
            package: format!("{}/{}", row.ecosystem, row.package),
            introduced_by: row.version.unwrap_or("-").to_string(),
            url: row.leaf.url.clone(),
            manifest_files: if row.leaf.manifest_files.is_empty() {
                "-".to_string()
            } else {
                row.leaf.manifest_files.join(", ")
            },
        }
    }
}

/// Strictest findings first, then by package.
pub(crate) fn finding_lines(report: &Report) -> Vec<FindingLine> {
    let mut rows = report.violations.rows();
    rows.sort_by(|a, b| {
        b.leaf
            .policy
            .cmp(&a.leaf.policy)
            .then_with(|| a.package.cmp(b.package))
            .then_with(|| a.version.cmp(&b.version))
    });
    rows.iter().map(FindingLine::from_row).collect()
}

pub(crate) fn verdict(report: &Report) -> &'static str {
    if report.healthy {
        "healthy"
    } else {
        "blocked"
    }
}

// ─── WriterSink ───────────────────────────────────────────────────────────────

/// Report sink writing to stdout, stderr or a file.
///
/// A `.json` or `.md` file extension picks the format; otherwise `kind` does.
pub struct WriterSink {
    kind: OutputKind,
    target: SinkTarget,
}

enum SinkTarget {
    Stdout,
    /// Used while a wrapped tool owns stdout.
    Stderr,
    File(PathBuf),
}

impl WriterSink {
    /// Write to `path`, or to stdout when there is none.
    pub fn new(kind: OutputKind, path: Option<PathBuf>) -> Self {
        let target = match path {
            Some(path) => SinkTarget::File(path),
            None => SinkTarget::Stdout,
        };
        Self { kind, target }
    }

    /// Write to `path`, or to stderr when there is none.
    pub fn beside_tool(kind: OutputKind, path: Option<PathBuf>) -> Self {
        let target = match path {
            Some(path) => SinkTarget::File(path),
            None => SinkTarget::Stderr,
        };
        Self { kind, target }
    }

    pub fn effective_kind(&self) -> OutputKind {
        match &self.target {
            SinkTarget::File(path) => OutputKind::for_path(path, self.kind),
            _ => self.kind,
        }
    }
}

fn write_stream(mut out: impl Write, content: &str) -> std::io::Result<()> {
    out.write_all(content.as_bytes())?;
    if !content.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

impl ReportSink for WriterSink {
    fn emit(&self, report: &Report) -> Result<()> {
        let content = writer_for_kind(self.effective_kind()).format(report)?;
        match &self.target {
            SinkTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, content)?;
            }
            SinkTarget::Stdout => write_stream(std::io::stdout().lock(), &content)?,
            SinkTarget::Stderr => write_stream(std::io::stderr().lock(), &content)?,
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::policy::{FoldLevel, PolicyAction};
    use crate::domain::report::{Decision, Report};
    use crate::domain::violations::{FindingPath, ReportLeafNode, ViolationsMap};

    pub fn report(healthy: bool) -> Report {
        let mut map = ViolationsMap::new(FoldLevel::None);
        let findings = [
            ("left-pad", "1.3.0", "shellAccess", PolicyAction::Warn),
            ("tslib", "1.14.1", "envVars", PolicyAction::Error),
        ];
        for (package, version, alert_type, policy) in findings {
            let key = format!("{alert_type} at 1:9");
            map.insert(
                FindingPath {
                    ecosystem: "npm",
                    package,
                    version,
                    file: "index.js",
                    alert_key: &key,
                },
                ReportLeafNode {
                    alert_type: alert_type.into(),
                    policy,
                    url: format!("https://socket.dev/npm/package/{package}/overview/{version}"),
                    manifest_files: vec!["package-lock.json".into()],
                },
            );
        }
        Report::new(
            Decision {
                healthy,
                violations: Some(map),
            },
            FoldLevel::None,
            PolicyAction::Warn,
            2,
        )
    }

    pub fn empty_report() -> Report {
        Report::new(
            Decision {
                healthy: true,
                violations: None,
            },
            FoldLevel::None,
            PolicyAction::Warn,
            3,
        )
    }
}
