use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::package::ResolvedPackageNode;

/// Package ecosystem, rendered as the purl `type` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pypi,
    Gem,
    Cargo,
    Golang,
    Maven,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Gem => "gem",
            Ecosystem::Cargo => "cargo",
            Ecosystem::Golang => "golang",
            Ecosystem::Maven => "maven",
        }
    }

    /// Canonical package name for this ecosystem's identifier scheme.
    pub fn normalize_name(&self, name: &str) -> String {
        match self {
            // PEP 503: runs of `-`, `_` and `.` collapse to a single dash.
            Ecosystem::Pypi => {
                let mut out = String::with_capacity(name.len());
                let mut last_dash = false;
                for c in name.chars() {
                    if matches!(c, '-' | '_' | '.') {
                        if !last_dash {
                            out.push('-');
                        }
                        last_dash = true;
                    } else {
                        out.extend(c.to_lowercase());
                        last_dash = false;
                    }
                }
                out
            }
            Ecosystem::Maven => name.replacen(':', "/", 1),
            _ => name.to_string(),
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = PurlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Ecosystem::Npm),
            "pypi" => Ok(Ecosystem::Pypi),
            "gem" => Ok(Ecosystem::Gem),
            "cargo" => Ok(Ecosystem::Cargo),
            "golang" => Ok(Ecosystem::Golang),
            "maven" => Ok(Ecosystem::Maven),
            other => Err(PurlError::UnknownEcosystem(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PurlError {
    #[error("not a package URL: {0}")]
    Malformed(String),
    #[error("unknown ecosystem: {0}")]
    UnknownEcosystem(String),
}

/// Canonical package identifier: `pkg:<ecosystem>/<name>@<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Purl {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: String,
}

impl Purl {
    pub fn new(ecosystem: Ecosystem, name: &str, version: &str) -> Self {
        Self {
            ecosystem,
            name: ecosystem.normalize_name(name),
            version: version.to_string(),
        }
    }

    pub fn from_node(ecosystem: Ecosystem, node: &ResolvedPackageNode) -> Self {
        Self::new(ecosystem, &node.name, &node.version)
    }
}

impl fmt::Display for Purl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/{}@{}", self.ecosystem, self.name, self.version)
    }
}

impl FromStr for Purl {
    type Err = PurlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PurlError::Malformed(s.to_string());
        let rest = s.strip_prefix("pkg:").ok_or_else(malformed)?;
        let (ecosystem, coords) = rest.split_once('/').ok_or_else(malformed)?;
        // Scoped npm names start with '@', so the version separator is the last one.
        let (name, version) = coords.rsplit_once('@').ok_or_else(malformed)?;
        if name.is_empty() || version.is_empty() {
            return Err(malformed());
        }
        Ok(Purl {
            ecosystem: ecosystem.parse()?,
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}
