use serde::{Deserialize, Serialize};

/// A vertex in the resolver's dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackageNode {
    pub name: String,
    pub version: String,
    /// Where the tarball was resolved from, usually a registry URL.
    /// Absent for linked or workspace packages.
    #[serde(default, rename = "resolved")]
    pub resolved_origin: Option<String>,
    /// Resolver-local identifier, e.g. the node_modules location.
    #[serde(default)]
    pub id: String,
}

impl ResolvedPackageNode {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            resolved_origin: None,
            id: format!("{name}@{version}"),
        }
    }

    pub fn with_origin(mut self, origin: &str) -> Self {
        self.resolved_origin = Some(origin.to_string());
        self
    }
}

/// A package the operation would add or change.
///
/// `existing` is the pre-operation version for a change and `None` for a
/// pure addition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDetail {
    pub node: ResolvedPackageNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<ResolvedPackageNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiffAction {
    Add,
    Change,
    Remove,
}

/// The resolver's structural delta between the installed graph and the
/// graph the requested operation would produce.
///
/// The root level has no action of its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffTree {
    #[serde(default)]
    pub action: Option<DiffAction>,
    #[serde(default)]
    pub actual: Option<ResolvedPackageNode>,
    #[serde(default)]
    pub ideal: Option<ResolvedPackageNode>,
    #[serde(default)]
    pub children: Vec<DiffTree>,
    #[serde(default)]
    pub unchanged: Vec<ResolvedPackageNode>,
}

impl DiffTree {
    pub fn root(children: Vec<DiffTree>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn add(ideal: ResolvedPackageNode) -> Self {
        Self {
            action: Some(DiffAction::Add),
            ideal: Some(ideal),
            ..Self::default()
        }
    }

    pub fn change(actual: ResolvedPackageNode, ideal: ResolvedPackageNode) -> Self {
        Self {
            action: Some(DiffAction::Change),
            actual: Some(actual),
            ideal: Some(ideal),
            ..Self::default()
        }
    }

    pub fn remove(actual: ResolvedPackageNode) -> Self {
        Self {
            action: Some(DiffAction::Remove),
            actual: Some(actual),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<DiffTree>) -> Self {
        self.children = children;
        self
    }
}
