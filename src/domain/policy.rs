use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Organization-configured response to an alert type.
///
/// Variants are declared weakest first so the derived `Ord` is the severity
/// order: `error > warn > monitor > ignore > defer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Defer,
    Ignore,
    Monitor,
    Warn,
    Error,
}

impl PolicyAction {
    /// Strict comparison: an action is never stricter than itself.
    pub fn is_stricter_than(self, other: PolicyAction) -> bool {
        self > other
    }

    /// Whether a finding with this action belongs in a report whose minimum
    /// level is `report_level`.
    pub fn is_reported_at(self, report_level: PolicyAction) -> bool {
        self >= report_level
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Defer => "defer",
            PolicyAction::Ignore => "ignore",
            PolicyAction::Monitor => "monitor",
            PolicyAction::Warn => "warn",
            PolicyAction::Error => "error",
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "defer" => Ok(PolicyAction::Defer),
            "ignore" => Ok(PolicyAction::Ignore),
            "monitor" => Ok(PolicyAction::Monitor),
            "warn" => Ok(PolicyAction::Warn),
            "error" => Ok(PolicyAction::Error),
            other => Err(format!("unknown policy action: {other}")),
        }
    }
}

/// One entry of the organization's policy. The action is kept as the raw
/// string so that values this build does not know about stay inert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub action: String,
}

/// alert type → rule, as served by the policy source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityPolicy(pub BTreeMap<String, PolicyRule>);

impl SecurityPolicy {
    pub fn from_actions<'a>(pairs: impl IntoIterator<Item = (&'a str, PolicyAction)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(alert_type, action)| {
                    (
                        alert_type.to_string(),
                        PolicyRule {
                            action: action.to_string(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// `None` when the type has no rule or the rule's action is unrecognized.
    pub fn action_for(&self, alert_type: &str) -> Option<PolicyAction> {
        self.0.get(alert_type).and_then(|rule| rule.action.parse().ok())
    }
}

/// Granularity at which findings collapse in the violations report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldLevel {
    #[default]
    None,
    File,
    Version,
    Pkg,
}

impl FromStr for FoldLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(FoldLevel::None),
            "file" => Ok(FoldLevel::File),
            "version" => Ok(FoldLevel::Version),
            "pkg" => Ok(FoldLevel::Pkg),
            other => Err(format!("unknown fold level: {other}")),
        }
    }
}
