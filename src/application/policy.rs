use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::alert::AlertsByPurl;
use crate::domain::error::ShadowError;
use crate::domain::policy::{FoldLevel, PolicyAction, SecurityPolicy};
use crate::domain::purl::Purl;
use crate::domain::report::Decision;
use crate::domain::violations::{FindingPath, ReportLeafNode, ViolationsMap};

/// How the decision engine records what it finds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecisionOptions {
    pub fold: FoldLevel,
    /// Weakest action that still appears in the report.
    pub report_level: PolicyAction,
    /// Only compute the verdict; record nothing.
    pub short: bool,
    /// Manifests attached to every recorded finding.
    pub manifest_files: Vec<String>,
}

impl Default for DecisionOptions {
    fn default() -> Self {
        Self {
            fold: FoldLevel::None,
            report_level: PolicyAction::Warn,
            short: false,
            manifest_files: Vec::new(),
        }
    }
}

/// Page describing a package on the threat-intelligence site.
pub fn package_url(purl: &Purl, fold: FoldLevel) -> String {
    let base = format!("https://socket.dev/{}/package/{}", purl.ecosystem, purl.name);
    match fold {
        FoldLevel::Pkg => base,
        _ => format!("{base}/overview/{}", purl.version),
    }
}

/// Apply the organization's policy to every alert on every artifact.
///
/// Any `error` action makes the result unhealthy. An alert is recorded when
/// its action is at least as severe as `report_level`; alerts whose type has
/// no recognized rule are skipped. Competing findings for one folded key keep
/// the strictest action.
#[instrument(name = "decide", skip_all, fields(artifacts = alerts.len(), fold = ?options.fold))]
pub fn decide(
    alerts: &AlertsByPurl,
    policy: &SecurityPolicy,
    options: &DecisionOptions,
) -> Result<Decision, ShadowError> {
    let mut healthy = true;
    let mut violations = (!options.short).then(|| ViolationsMap::new(options.fold));

    for (purl_str, artifact_alerts) in alerts {
        let mut purl: Option<Purl> = None;

        for alert in artifact_alerts {
            let Some(action) = policy.action_for(&alert.alert_type) else {
                continue;
            };
            if action == PolicyAction::Error {
                healthy = false;
            }

            let Some(map) = violations.as_mut() else {
                if !healthy {
                    return Ok(Decision {
                        healthy,
                        violations: None,
                    });
                }
                continue;
            };
            if !action.is_reported_at(options.report_level) {
                continue;
            }

            if purl.is_none() {
                let parsed = purl_str
                    .parse::<Purl>()
                    .map_err(|e| ShadowError::ReportGeneration(format!("{purl_str}: {e}")))?;
                purl = Some(parsed);
            }
            let Some(purl) = purl.as_ref() else {
                continue;
            };

            let alert_key = alert.key();
            map.insert(
                FindingPath {
                    ecosystem: purl.ecosystem.as_str(),
                    package: &purl.name,
                    version: &purl.version,
                    file: &alert.file,
                    alert_key: &alert_key,
                },
                ReportLeafNode {
                    alert_type: alert.alert_type.clone(),
                    policy: action,
                    url: package_url(purl, options.fold),
                    manifest_files: options.manifest_files.clone(),
                },
            );
        }
    }

    debug!(
        healthy,
        recorded = violations.as_ref().map(|v| v.len()).unwrap_or(0),
        "policy decision reached"
    );
    Ok(Decision {
        healthy,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::Alert;
    use crate::domain::violations::ViolationNode;
    use serde_json::Value;

    const TSLIB: &str = "pkg:npm/tslib@1.14.1";

    fn alert(alert_type: &str, start: u64) -> Alert {
        Alert {
            alert_type: alert_type.into(),
            severity: "middle".into(),
            file: "package/which.js".into(),
            start,
            end: start + 20,
            props: Value::Null,
        }
    }

    fn tslib_env_alerts() -> AlertsByPurl {
        [(TSLIB.to_string(), vec![alert("envVars", 100), alert("envVars", 300)])].into()
    }

    fn options(fold: FoldLevel, report_level: PolicyAction) -> DecisionOptions {
        DecisionOptions {
            fold,
            report_level,
            ..DecisionOptions::default()
        }
    }

    #[test]
    fn error_policy_blocks_and_records_each_alert() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Error)]);
        let decision = decide(&tslib_env_alerts(), &policy, &options(FoldLevel::None, PolicyAction::Warn)).unwrap();

        assert!(!decision.healthy);
        let map = decision.violations.unwrap();
        let ViolationNode::Branch(pkgs) = &map.root["npm"] else { panic!("expected branch") };
        let ViolationNode::Branch(versions) = &pkgs["tslib"] else { panic!("expected branch") };
        let ViolationNode::Branch(files) = &versions["1.14.1"] else { panic!("expected branch") };
        let ViolationNode::Branch(keys) = &files["package/which.js"] else { panic!("expected branch") };
        assert_eq!(keys.len(), 2);
        assert!(keys.values().all(|n| matches!(
            n,
            ViolationNode::Leaf(leaf) if leaf.policy == PolicyAction::Error && leaf.alert_type == "envVars"
        )));
    }

    #[test]
    fn warn_policy_is_healthy_and_silent_at_error_level() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Warn)]);
        let decision = decide(&tslib_env_alerts(), &policy, &options(FoldLevel::None, PolicyAction::Error)).unwrap();
        assert!(decision.healthy);
        assert!(decision.violations.unwrap().is_empty());
    }

    #[test]
    fn pkg_fold_collapses_to_one_entry() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Error)]);
        let decision = decide(&tslib_env_alerts(), &policy, &options(FoldLevel::Pkg, PolicyAction::Warn)).unwrap();
        let map = decision.violations.unwrap();
        let rows = map.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].package, "tslib");
        assert_eq!(rows[0].leaf.policy, PolicyAction::Error);
        assert_eq!(rows[0].leaf.url, "https://socket.dev/npm/package/tslib");
    }

    #[test]
    fn pkg_fold_keeps_strictest_of_mixed_actions() {
        let policy = SecurityPolicy::from_actions([
            ("envVars", PolicyAction::Warn),
            ("shellAccess", PolicyAction::Error),
            ("networkAccess", PolicyAction::Monitor),
        ]);
        let alerts: AlertsByPurl = [(
            TSLIB.to_string(),
            vec![alert("envVars", 1), alert("shellAccess", 2), alert("networkAccess", 3)],
        )]
        .into();
        let decision = decide(&alerts, &policy, &options(FoldLevel::Pkg, PolicyAction::Defer)).unwrap();
        let map = decision.violations.unwrap();
        assert_eq!(map.rows()[0].leaf.policy, PolicyAction::Error);
    }

    #[test]
    fn monitor_visibility_follows_report_level() {
        let policy = SecurityPolicy::from_actions([("networkAccess", PolicyAction::Monitor)]);
        let alerts: AlertsByPurl = [(TSLIB.to_string(), vec![alert("networkAccess", 1)])].into();

        let at_warn = decide(&alerts, &policy, &options(FoldLevel::None, PolicyAction::Warn)).unwrap();
        assert!(at_warn.healthy);
        assert!(at_warn.violations.unwrap().is_empty());

        let at_monitor = decide(&alerts, &policy, &options(FoldLevel::None, PolicyAction::Monitor)).unwrap();
        assert_eq!(at_monitor.violations.unwrap().len(), 1);
    }

    #[test]
    fn defer_only_recorded_at_defer_level() {
        let policy = SecurityPolicy::from_actions([("unpopular", PolicyAction::Defer)]);
        let alerts: AlertsByPurl = [(TSLIB.to_string(), vec![alert("unpopular", 1)])].into();
        let at_ignore = decide(&alerts, &policy, &options(FoldLevel::None, PolicyAction::Ignore)).unwrap();
        assert!(at_ignore.violations.unwrap().is_empty());
        let at_defer = decide(&alerts, &policy, &options(FoldLevel::None, PolicyAction::Defer)).unwrap();
        assert_eq!(at_defer.violations.unwrap().len(), 1);
    }

    #[test]
    fn missing_policy_entry_is_a_no_op() {
        let alerts = tslib_env_alerts();
        let decision = decide(&alerts, &SecurityPolicy::default(), &options(FoldLevel::None, PolicyAction::Defer)).unwrap();
        assert!(decision.healthy);
        assert!(decision.violations.unwrap().is_empty());
    }

    #[test]
    fn short_mode_returns_only_verdict() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Error)]);
        let opts = DecisionOptions {
            short: true,
            ..DecisionOptions::default()
        };
        let decision = decide(&tslib_env_alerts(), &policy, &opts).unwrap();
        assert!(!decision.healthy);
        assert!(decision.violations.is_none());
    }

    #[test]
    fn unparseable_purl_is_a_report_failure() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Error)]);
        let alerts: AlertsByPurl = [("tslib@1.14.1".to_string(), vec![alert("envVars", 1)])].into();
        let err = decide(&alerts, &policy, &DecisionOptions::default()).unwrap_err();
        assert!(matches!(err, ShadowError::ReportGeneration(_)));
    }

    #[test]
    fn serialized_report_round_trips_verdict_and_findings() {
        let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Error), ("shellAccess", PolicyAction::Warn)]);
        let mut alerts = tslib_env_alerts();
        alerts.insert("pkg:npm/left-pad@1.3.0".into(), vec![alert("shellAccess", 5)]);
        let decision = decide(&alerts, &policy, &options(FoldLevel::None, PolicyAction::Warn)).unwrap();

        let report = crate::domain::report::Report::new(decision, FoldLevel::None, PolicyAction::Warn, 2);
        let json = serde_json::to_string(&report).unwrap();
        let parsed: crate::domain::report::Report = serde_json::from_str(&json).unwrap();

        let triples = |r: &crate::domain::report::Report| {
            r.violations
                .rows()
                .iter()
                .map(|row| (row.package.to_string(), row.alert_key.map(str::to_string), row.leaf.policy))
                .collect::<std::collections::BTreeSet<_>>()
        };
        assert_eq!(parsed.healthy, report.healthy);
        assert!(!parsed.healthy);
        assert_eq!(triples(&parsed), triples(&report));
        assert_eq!(triples(&report).len(), 3);
    }
}
