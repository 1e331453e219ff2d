//! npm lockfiles (v2/v3 `packages` section) and the diff between two of them.
//!
//! The installed tree is described by the hidden lockfile npm keeps in
//! `node_modules/.package-lock.json`; the tree an operation would produce is
//! described by the lockfile it writes. Comparing the two gives the same
//! add/change/remove delta the resolver itself computes.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::domain::package::{DiffTree, ResolvedPackageNode};

/// Lockfiles npm reads and rewrites, in precedence order.
pub const WANTED_LOCKFILES: &[&str] = &["npm-shrinkwrap.json", "package-lock.json"];

/// npm's record of what is actually installed.
pub const HIDDEN_LOCKFILE: &str = "node_modules/.package-lock.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Lockfile {
    /// Install location (`node_modules/a/node_modules/b`) → entry. The root
    /// project is the empty key.
    #[serde(default)]
    pub packages: BTreeMap<String, LockEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LockEntry {
    /// Set for aliased installs; otherwise the name comes from the location.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default)]
    pub link: bool,
}

impl Lockfile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lockfile {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse lockfile {}", path.display()))
    }

    /// A missing file is an empty tree.
    pub fn read_optional(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::read(path)
    }

    /// First of [`WANTED_LOCKFILES`] present in `dir`.
    pub fn find_wanted(dir: &Path) -> Option<PathBuf> {
        WANTED_LOCKFILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Installed packages keyed by location. Links and the root project are
    /// not packages from a registry and are left out.
    fn nodes(&self) -> BTreeMap<&str, ResolvedPackageNode> {
        self.packages
            .iter()
            .filter(|(location, entry)| !location.is_empty() && !entry.link)
            .filter_map(|(location, entry)| {
                let version = entry.version.as_deref()?;
                let name = entry.name.as_deref().unwrap_or_else(|| package_name(location));
                Some((
                    location.as_str(),
                    ResolvedPackageNode {
                        name: name.to_string(),
                        version: version.to_string(),
                        resolved_origin: entry.resolved.clone(),
                        id: location.clone(),
                    },
                ))
            })
            .collect()
    }
}

/// `node_modules/@scope/pkg` → `@scope/pkg`.
fn package_name(location: &str) -> &str {
    location
        .rsplit_once("node_modules/")
        .map(|(_, name)| name)
        .unwrap_or(location)
}

/// Delta that turns `actual` into `ideal`, as a flat tree under one root.
///
/// Same location with a different version or origin is a change; entries
/// present in both and otherwise equal are listed as unchanged.
pub fn lockfile_diff(actual: &Lockfile, ideal: &Lockfile) -> DiffTree {
    let before = actual.nodes();
    let after = ideal.nodes();
    let mut root = DiffTree::default();

    for (location, node) in &after {
        match before.get(location) {
            None => root.children.push(DiffTree::add(node.clone())),
            Some(old) if old.version != node.version || old.resolved_origin != node.resolved_origin => {
                root.children.push(DiffTree::change(old.clone(), node.clone()))
            }
            Some(_) => root.unchanged.push(node.clone()),
        }
    }

    let kept: BTreeSet<&str> = after.keys().copied().collect();
    for (location, old) in &before {
        if !kept.contains(location) {
            root.children.push(DiffTree::remove(old.clone()));
        }
    }
    root
}
