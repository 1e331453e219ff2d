use anyhow::Result;
use sailfish::TemplateOnce;

use crate::domain::{ports::ReportWriter, report::Report};
use crate::presentation::writers::{finding_lines, verdict, FindingLine};

#[derive(TemplateOnce)]
#[template(path = "report.md.stpl")] // base dir declared inside sailfish.toml
struct ReportTemplate<'a> {
    report: &'a Report,
    verdict: &'static str,
    lines: Vec<FindingLine>,
}

pub struct MarkdownWriter;

impl ReportWriter for MarkdownWriter {
    fn format(&self, report: &Report) -> Result<String> {
        let template = ReportTemplate {
            report,
            verdict: verdict(report),
            lines: finding_lines(report),
        };
        Ok(template.render_once()?)
    }
}
