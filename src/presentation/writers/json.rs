use anyhow::Result;

use crate::domain::{ports::ReportWriter, report::Report};

pub struct JsonWriter;

impl ReportWriter for JsonWriter {
    fn format(&self, report: &Report) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::writers::fixtures;
    use serde_json::Value;

    #[test]
    fn json_output_nests_findings_and_carries_verdict() {
        let output = JsonWriter.format(&fixtures::report(false)).unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();

        assert_eq!(parsed["healthy"], false);
        assert_eq!(parsed["fold"], "none");
        assert_eq!(parsed["reportLevel"], "warn");
        let leaf = &parsed["violations"]["npm"]["tslib"]["1.14.1"]["index.js"]["envVars at 1:9"];
        assert_eq!(leaf["type"], "envVars");
        assert_eq!(leaf["policy"], "error");
        assert_eq!(leaf["manifestFiles"][0], "package-lock.json");
        assert_eq!(parsed["summary"]["blocking"], 1);
    }

    #[test]
    fn json_output_parses_back_into_a_report() {
        let report = fixtures::report(false);
        let parsed: Report = serde_json::from_str(&JsonWriter.format(&report).unwrap()).unwrap();
        assert_eq!(parsed, report);
    }
}
