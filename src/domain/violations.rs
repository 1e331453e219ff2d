use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::policy::{FoldLevel, PolicyAction};

/// What the report stores for one (possibly folded) finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportLeafNode {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub policy: PolicyAction,
    pub url: String,
    #[serde(default)]
    pub manifest_files: Vec<String>,
}

/// One level of the violations tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViolationNode {
    Leaf(ReportLeafNode),
    Branch(BTreeMap<String, ViolationNode>),
}

/// Full coordinates of a finding before folding.
#[derive(Debug, Clone, Copy)]
pub struct FindingPath<'a> {
    pub ecosystem: &'a str,
    pub package: &'a str,
    pub version: &'a str,
    pub file: &'a str,
    pub alert_key: &'a str,
}

impl<'a> FindingPath<'a> {
    fn keys(&self, fold: FoldLevel) -> Vec<&'a str> {
        let all = [
            self.ecosystem,
            self.package,
            self.version,
            self.file,
            self.alert_key,
        ];
        let depth = match fold {
            FoldLevel::None => 5,
            FoldLevel::File => 4,
            FoldLevel::Version => 3,
            FoldLevel::Pkg => 2,
        };
        all[..depth].to_vec()
    }
}

/// ecosystem → package → version → file → alertKey → leaf, truncated at the
/// fold level. Insertion is a max-by-severity reduction per collapsed key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationsMap {
    pub fold: FoldLevel,
    #[serde(rename = "violations")]
    pub root: BTreeMap<String, ViolationNode>,
}

/// A flattened leaf with the coordinates that survived folding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRow<'a> {
    pub ecosystem: &'a str,
    pub package: &'a str,
    pub version: Option<&'a str>,
    pub file: Option<&'a str>,
    pub alert_key: Option<&'a str>,
    pub leaf: &'a ReportLeafNode,
}

impl ViolationsMap {
    pub fn new(fold: FoldLevel) -> Self {
        Self {
            fold,
            root: BTreeMap::new(),
        }
    }

    /// Record a finding. An existing entry is replaced only when the new
    /// policy is strictly stricter; ties keep the existing entry.
    ///
    /// Returns `true` when the map changed.
    pub fn insert(&mut self, path: FindingPath<'_>, leaf: ReportLeafNode) -> bool {
        let keys = path.keys(self.fold);
        let Some((last, parents)) = keys.split_last() else {
            return false;
        };

        let mut level = &mut self.root;
        for key in parents {
            let entry = level
                .entry(key.to_string())
                .or_insert_with(|| ViolationNode::Branch(BTreeMap::new()));
            level = match entry {
                ViolationNode::Branch(children) => children,
                // Depth is fixed by the fold level, so a leaf never sits above the last key.
                ViolationNode::Leaf(_) => return false,
            };
        }

        match level.get_mut(*last) {
            Some(ViolationNode::Leaf(existing)) => {
                if leaf.policy.is_stricter_than(existing.policy) {
                    *existing = leaf;
                    true
                } else {
                    false
                }
            }
            Some(ViolationNode::Branch(_)) => false,
            None => {
                level.insert(last.to_string(), ViolationNode::Leaf(leaf));
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Depth-first, key-ordered list of leaves.
    pub fn rows(&self) -> Vec<ViolationRow<'_>> {
        let mut rows = Vec::new();
        let mut path = Vec::with_capacity(5);
        collect_rows(&self.root, &mut path, &mut rows);
        rows
    }
}

fn collect_rows<'a>(
    level: &'a BTreeMap<String, ViolationNode>,
    path: &mut Vec<&'a str>,
    rows: &mut Vec<ViolationRow<'a>>,
) {
    for (key, node) in level {
        path.push(key.as_str());
        match node {
            ViolationNode::Leaf(leaf) => rows.push(ViolationRow {
                ecosystem: path.first().copied().unwrap_or_default(),
                package: path.get(1).copied().unwrap_or_default(),
                version: path.get(2).copied(),
                file: path.get(3).copied(),
                alert_key: path.get(4).copied(),
                leaf,
            }),
            ViolationNode::Branch(children) => collect_rows(children, path, rows),
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(alert_type: &str, policy: PolicyAction) -> ReportLeafNode {
        ReportLeafNode {
            alert_type: alert_type.to_string(),
            policy,
            url: "https://socket.dev/npm/package/tslib/overview/1.14.1".to_string(),
            manifest_files: vec!["package-lock.json".to_string()],
        }
    }

    fn path<'a>(file: &'a str, key: &'a str) -> FindingPath<'a> {
        FindingPath {
            ecosystem: "npm",
            package: "tslib",
            version: "1.14.1",
            file,
            alert_key: key,
        }
    }

    #[test]
    fn unfolded_map_keeps_every_alert_key() {
        let mut map = ViolationsMap::new(FoldLevel::None);
        assert!(map.insert(path("a.js", "envVars at 1:2"), leaf("envVars", PolicyAction::Warn)));
        assert!(map.insert(path("a.js", "envVars at 3:4"), leaf("envVars", PolicyAction::Warn)));
        assert_eq!(map.len(), 2);

        let rows = map.rows();
        assert_eq!(rows[0].version, Some("1.14.1"));
        assert_eq!(rows[0].file, Some("a.js"));
        assert_eq!(rows[0].alert_key, Some("envVars at 1:2"));
    }

    #[test]
    fn pkg_fold_keeps_strictest_action() {
        let mut map = ViolationsMap::new(FoldLevel::Pkg);
        map.insert(path("a.js", "k1"), leaf("envVars", PolicyAction::Warn));
        map.insert(path("b.js", "k2"), leaf("shellAccess", PolicyAction::Error));
        map.insert(path("c.js", "k3"), leaf("networkAccess", PolicyAction::Monitor));

        let rows = map.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].package, "tslib");
        assert_eq!(rows[0].version, None);
        assert_eq!(rows[0].leaf.policy, PolicyAction::Error);
        assert_eq!(rows[0].leaf.alert_type, "shellAccess");
    }

    #[test]
    fn ties_keep_existing_entry() {
        let mut map = ViolationsMap::new(FoldLevel::Version);
        assert!(map.insert(path("a.js", "k1"), leaf("first", PolicyAction::Error)));
        assert!(!map.insert(path("b.js", "k2"), leaf("second", PolicyAction::Error)));
        assert_eq!(map.rows()[0].leaf.alert_type, "first");
    }

    #[test]
    fn file_fold_collapses_within_a_file_only() {
        let mut map = ViolationsMap::new(FoldLevel::File);
        map.insert(path("a.js", "k1"), leaf("envVars", PolicyAction::Warn));
        map.insert(path("a.js", "k2"), leaf("envVars", PolicyAction::Warn));
        map.insert(path("b.js", "k3"), leaf("envVars", PolicyAction::Warn));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn serialized_tree_parses_back_into_same_leaves() {
        let mut map = ViolationsMap::new(FoldLevel::None);
        map.insert(path("a.js", "envVars at 1:2"), leaf("envVars", PolicyAction::Error));
        let json = serde_json::to_string(&map).unwrap();
        let parsed: ViolationsMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }
}
