use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single finding reported by the alert service for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub end: u64,
    #[serde(default)]
    pub props: Value,
}

impl Alert {
    /// Key that distinguishes two findings of the same type in one file.
    pub fn key(&self) -> String {
        format!("{} at {}:{}", self.alert_type, self.start, self.end)
    }
}

/// purl string → ordered findings for that artifact.
pub type AlertsByPurl = BTreeMap<String, Vec<Alert>>;

/// One batched request to the alert service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertLookup {
    pub purls: Vec<String>,
    /// Version pins from the resolver's override set, so the remote side
    /// evaluates effective rather than nominal versions.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
}

/// Result envelope of a collaborator call: `{ok:true,data}` or
/// `{ok:false,message,cause}`. Failures are values, never panics or errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResult<T> {
    Ok(T),
    Failed {
        message: String,
        cause: Option<String>,
    },
}

impl<T> ServiceResult<T> {
    pub fn failed(message: impl Into<String>, cause: Option<String>) -> Self {
        ServiceResult::Failed {
            message: message.into(),
            cause,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ServiceResult::Ok(_))
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'a str>,
}

impl<T: Serialize> Serialize for ServiceResult<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            ServiceResult::Ok(data) => Envelope {
                ok: true,
                data: Some(data),
                message: None,
                cause: None,
            },
            ServiceResult::Failed { message, cause } => Envelope {
                ok: false,
                data: None,
                message: Some(message),
                cause: cause.as_deref(),
            },
        };
        envelope.serialize(serializer)
    }
}
