use serde::Deserialize;
use tracing::debug;

use crate::domain::error::ShadowError;
use crate::domain::package::{DiffAction, DiffTree, PackageDetail, ResolvedPackageNode};

/// Upper bound on visited diff nodes. A real tree never gets near it; going
/// past it means the tree is cyclic or corrupt.
pub const DEFAULT_MAX_DIFF_NODES: usize = 100_000;

/// Registry every package is expected to resolve from by default.
pub const NPM_REGISTRY_ORIGIN: &str = "https://registry.npmjs.org/";

/// Which packages the walk reports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiffFilter {
    /// Also report packages the operation leaves untouched.
    pub include_unchanged: bool,
    /// Report packages whose resolved origin is not the trusted one.
    pub include_unknown_origin: bool,
    pub trusted_origin: String,
    pub max_nodes: usize,
}

impl Default for DiffFilter {
    fn default() -> Self {
        Self {
            include_unchanged: false,
            include_unknown_origin: false,
            trusted_origin: NPM_REGISTRY_ORIGIN.to_string(),
            max_nodes: DEFAULT_MAX_DIFF_NODES,
        }
    }
}

impl DiffFilter {
    fn allows(&self, node: &ResolvedPackageNode) -> bool {
        if self.include_unknown_origin {
            return true;
        }
        node.resolved_origin
            .as_deref()
            .is_some_and(|origin| origin.starts_with(&self.trusted_origin))
    }
}

/// Flatten a diff tree into the packages the operation would add or change.
///
/// Depth-first, children in order. Removals emit nothing but their subtrees
/// are still walked: a removed package's former dependents may be adding
/// packages elsewhere. Version-preserving changes are skipped.
///
/// Fails with [`ShadowError::MalformedDiff`] once more than
/// `filter.max_nodes` nodes have been visited; a partial list is never
/// returned.
pub fn walk_diff(root: &DiffTree, filter: &DiffFilter) -> Result<Vec<PackageDetail>, ShadowError> {
    let mut details = Vec::new();
    let mut visited = 0usize;
    // Explicit stack: deep trees must not overflow the call stack.
    let mut stack: Vec<&DiffTree> = vec![root];

    while let Some(diff) = stack.pop() {
        visited += 1;
        if visited > filter.max_nodes {
            return Err(ShadowError::MalformedDiff {
                limit: filter.max_nodes,
            });
        }

        if let Some(detail) = detail_for(diff) {
            if filter.allows(&detail.node) {
                details.push(detail);
            }
        }

        if filter.include_unchanged {
            visited += diff.unchanged.len();
            if visited > filter.max_nodes {
                return Err(ShadowError::MalformedDiff {
                    limit: filter.max_nodes,
                });
            }
            for node in &diff.unchanged {
                if filter.allows(node) {
                    details.push(PackageDetail {
                        node: node.clone(),
                        existing: Some(node.clone()),
                    });
                }
            }
        }

        stack.extend(diff.children.iter().rev());
    }

    debug!(visited, packages = details.len(), "diff walk completed");
    Ok(details)
}

fn detail_for(diff: &DiffTree) -> Option<PackageDetail> {
    let ideal = diff.ideal.as_ref()?;
    match diff.action? {
        DiffAction::Add => Some(PackageDetail {
            node: ideal.clone(),
            existing: None,
        }),
        DiffAction::Change => match &diff.actual {
            Some(actual) if actual.version == ideal.version => None,
            actual => Some(PackageDetail {
                node: ideal.clone(),
                existing: actual.clone(),
            }),
        },
        DiffAction::Remove => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str) -> ResolvedPackageNode {
        ResolvedPackageNode::new(name, version).with_origin(&format!(
            "{NPM_REGISTRY_ORIGIN}{name}/-/{name}-{version}.tgz"
        ))
    }

    fn names(details: &[PackageDetail]) -> Vec<String> {
        details
            .iter()
            .map(|d| format!("{}@{}", d.node.name, d.node.version))
            .collect()
    }

    #[test]
    fn adds_emit_one_detail_each_without_existing() {
        let tree = DiffTree::root(vec![
            DiffTree::add(node("a", "1.0.0")).with_children(vec![DiffTree::add(node("b", "2.0.0"))]),
            DiffTree::add(node("c", "3.0.0")),
        ]);
        let details = walk_diff(&tree, &DiffFilter::default()).unwrap();
        assert_eq!(names(&details), ["a@1.0.0", "b@2.0.0", "c@3.0.0"]);
        assert!(details.iter().all(|d| d.existing.is_none()));
    }

    #[test]
    fn change_with_same_version_is_skipped() {
        let tree = DiffTree::root(vec![
            DiffTree::change(node("meta", "1.0.0"), node("meta", "1.0.0")),
            DiffTree::change(node("bump", "1.0.0"), node("bump", "1.1.0")),
        ]);
        let details = walk_diff(&tree, &DiffFilter::default()).unwrap();
        assert_eq!(names(&details), ["bump@1.1.0"]);
        assert_eq!(details[0].existing.as_ref().unwrap().version, "1.0.0");
    }

    #[test]
    fn removal_subtree_is_still_walked() {
        let tree = DiffTree::root(vec![
            DiffTree::remove(node("old", "0.1.0")).with_children(vec![DiffTree::add(node("new", "1.0.0"))]),
        ]);
        let details = walk_diff(&tree, &DiffFilter::default()).unwrap();
        assert_eq!(names(&details), ["new@1.0.0"]);
    }

    #[test]
    fn untrusted_origin_is_excluded_unless_allowed() {
        let git = ResolvedPackageNode::new("forked", "1.0.0").with_origin("git+ssh://git@github.com/x/forked.git");
        let linked = ResolvedPackageNode::new("local", "0.0.0");
        let tree = DiffTree::root(vec![
            DiffTree::add(git),
            DiffTree::add(linked),
            DiffTree::add(node("ok", "1.0.0")),
        ]);

        let strict = walk_diff(&tree, &DiffFilter::default()).unwrap();
        assert_eq!(names(&strict), ["ok@1.0.0"]);

        let lenient = DiffFilter {
            include_unknown_origin: true,
            ..DiffFilter::default()
        };
        assert_eq!(walk_diff(&tree, &lenient).unwrap().len(), 3);
    }

    #[test]
    fn unchanged_nodes_only_with_existing_coverage() {
        let mut tree = DiffTree::root(vec![DiffTree::add(node("a", "1.0.0"))]);
        tree.unchanged = vec![node("kept", "4.0.0")];

        assert_eq!(walk_diff(&tree, &DiffFilter::default()).unwrap().len(), 1);

        let filter = DiffFilter {
            include_unchanged: true,
            ..DiffFilter::default()
        };
        let details = walk_diff(&tree, &filter).unwrap();
        assert_eq!(names(&details), ["kept@4.0.0", "a@1.0.0"]);
        assert_eq!(details[0].existing.as_ref().unwrap().name, "kept");
    }

    #[test]
    fn exceeding_sentinel_is_fatal() {
        let children = (0..=DEFAULT_MAX_DIFF_NODES)
            .map(|i| DiffTree::add(node("p", &format!("0.0.{i}"))))
            .collect();
        let tree = DiffTree::root(children);
        let err = walk_diff(&tree, &DiffFilter::default()).unwrap_err();
        assert!(matches!(err, ShadowError::MalformedDiff { limit } if limit == DEFAULT_MAX_DIFF_NODES));
        assert!(err.to_string().contains("infinite loop detected"));
    }

    #[test]
    fn sentinel_is_configurable() {
        let tree = DiffTree::root(vec![DiffTree::add(node("a", "1.0.0")), DiffTree::add(node("b", "1.0.0"))]);
        let filter = DiffFilter {
            max_nodes: 2,
            ..DiffFilter::default()
        };
        assert!(walk_diff(&tree, &filter).is_err());
        let filter = DiffFilter {
            max_nodes: 3,
            ..DiffFilter::default()
        };
        assert_eq!(walk_diff(&tree, &filter).unwrap().len(), 2);
    }

    #[test]
    fn walked_unchanged_nodes_count_toward_the_sentinel() {
        let mut tree = DiffTree::root(vec![DiffTree::add(node("a", "1.0.0"))]);
        tree.unchanged = (0..4).map(|i| node("kept", &format!("1.0.{i}"))).collect();
        let filter = DiffFilter {
            include_unchanged: true,
            max_nodes: 5,
            ..DiffFilter::default()
        };
        assert!(matches!(walk_diff(&tree, &filter), Err(ShadowError::MalformedDiff { limit: 5 })));

        let filter = DiffFilter {
            max_nodes: 6,
            ..filter
        };
        assert_eq!(walk_diff(&tree, &filter).unwrap().len(), 5);

        // Not walked, not counted.
        let filter = DiffFilter {
            include_unchanged: false,
            max_nodes: 2,
            ..DiffFilter::default()
        };
        assert_eq!(walk_diff(&tree, &filter).unwrap().len(), 1);
    }

    #[test]
    fn deep_chain_does_not_overflow_stack() {
        let mut tree = DiffTree::add(node("leaf", "1.0.0"));
        for i in 0..50_000 {
            tree = DiffTree::remove(node("r", &format!("0.{i}.0"))).with_children(vec![tree]);
        }
        let root = DiffTree::root(vec![tree]);
        let details = walk_diff(&root, &DiffFilter::default()).unwrap();
        assert_eq!(names(&details), ["leaf@1.0.0"]);
        // Dropping a 50k-deep owned tree recurses; leak it instead of risking the test thread's stack.
        std::mem::forget(root);
    }
}
