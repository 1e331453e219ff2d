//! The real npm as a [`DependencyResolver`].
//!
//! `compute_diff` asks npm for the lockfile the operation would write,
//! running it with `--package-lock-only` inside a throwaway copy of the
//! project's manifests, and diffs that against the installed tree. Nothing in
//! the project is touched. `commit` runs the user's actual command behind the
//! shadow harness.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::domain::handshake::Handshake;
use crate::domain::package::DiffTree;
use crate::domain::ports::{DependencyResolver, DiffRequest};
use crate::infrastructure::lockfile::{lockfile_diff, Lockfile, HIDDEN_LOCKFILE};
use crate::infrastructure::process::launcher::{
    display_command, run_shadowed, scrub_secrets, ChildArgs, ShadowExit, SpawnOptions,
};
use crate::infrastructure::process::shim::SHADOW_ACTIVE_ENV;

/// Subcommands, aliases included, that rewrite `node_modules`.
const INSTALL_COMMANDS: &[&str] = &[
    "install", "i", "in", "ins", "inst", "insta", "instal", "isnt", "isnta", "isntal", "isntall", "add", "update",
    "up", "upgrade", "udpate",
];

/// Install straight from the lockfile, replacing `node_modules` wholesale.
const CLEAN_INSTALL_COMMANDS: &[&str] = &["ci", "clean-install", "ic", "install-clean", "isntall-clean"];

/// Flags that keep the planning run from installing, running scripts or
/// talking to the audit endpoint.
const PLAN_FLAGS: &[&str] = &["--package-lock-only", "--ignore-scripts", "--no-audit", "--no-fund"];

/// Project files npm needs to resolve the same tree elsewhere.
const PLAN_INPUTS: &[&str] = &["package.json", "npm-shrinkwrap.json", "package-lock.json", ".npmrc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// Resolve against the manifest; may change the lockfile.
    Resolve,
    /// Install exactly what the lockfile says.
    Clean,
}

/// Package-manager flags and the subcommand's position, before any `--`.
fn command_words(args: &[String]) -> impl Iterator<Item = (usize, &str)> {
    args.iter()
        .take_while(|a| a.as_str() != "--")
        .enumerate()
        .filter(|(_, a)| !a.starts_with('-'))
        .map(|(i, a)| (i, a.as_str()))
}

/// Whether `args` run an npm command that installs packages.
pub fn install_kind(args: &[String]) -> Option<InstallKind> {
    let (_, command) = command_words(args).next()?;
    if INSTALL_COMMANDS.contains(&command) {
        Some(InstallKind::Resolve)
    } else if CLEAN_INSTALL_COMMANDS.contains(&command) {
        Some(InstallKind::Clean)
    } else {
        None
    }
}

/// Package specs named after the subcommand (`tslib@1`, `left-pad`).
pub fn package_specs(args: &[String]) -> Vec<String> {
    command_words(args).skip(1).map(|(_, spec)| spec.to_string()).collect()
}

/// Manifests of `project_dir` the operation reads or rewrites.
pub fn manifest_files(project_dir: &Path) -> Vec<String> {
    PLAN_INPUTS
        .iter()
        .filter(|name| name.ends_with(".json") && project_dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

pub struct NpmResolver {
    bin: PathBuf,
    child_args: ChildArgs,
    project_dir: PathBuf,
    kind: InstallKind,
    handshake: Handshake,
    exit: Mutex<Option<ShadowExit>>,
}

impl NpmResolver {
    /// `None` when `user_args` do not install anything.
    pub fn new(
        bin: &Path,
        user_args: &[String],
        child_args: ChildArgs,
        project_dir: &Path,
        handshake: Handshake,
    ) -> Option<Self> {
        let kind = install_kind(user_args)?;
        Some(Self {
            bin: bin.to_path_buf(),
            child_args,
            project_dir: project_dir.to_path_buf(),
            kind,
            handshake,
            exit: Mutex::new(None),
        })
    }

    /// How the committed command ended; `None` until `commit` ran it.
    pub fn exit(&self) -> Option<ShadowExit> {
        self.exit.lock().ok().and_then(|e| *e)
    }

    /// The user's command with the planning flags placed before any `--`.
    fn plan_args(&self) -> Vec<String> {
        let args = &self.child_args.args;
        let split = args.iter().position(|a| a == "--").unwrap_or(args.len());
        let mut out = args[..split].to_vec();
        out.extend(PLAN_FLAGS.iter().map(|f| f.to_string()));
        out.extend_from_slice(&args[split..]);
        out
    }

    /// The lockfile the operation would leave behind.
    async fn planned_lockfile(&self) -> Result<Lockfile> {
        if self.kind == InstallKind::Clean {
            let wanted = Lockfile::find_wanted(&self.project_dir)
                .ok_or_else(|| anyhow!("a clean install needs a lockfile in {}", self.project_dir.display()))?;
            return Lockfile::read(&wanted);
        }

        let manifest = self.project_dir.join("package.json");
        if !manifest.is_file() {
            bail!("no package.json in {}", self.project_dir.display());
        }

        let plan_dir = tempfile::Builder::new().prefix("socket-shadow-plan").tempdir()?;
        for name in PLAN_INPUTS {
            let source = self.project_dir.join(name);
            if source.is_file() {
                tokio::fs::copy(&source, plan_dir.path().join(name))
                    .await
                    .with_context(|| format!("Failed to copy {}", source.display()))?;
            }
        }

        let plan = ChildArgs {
            args: self.plan_args(),
            progress: false,
        };
        let command_line = display_command(&self.bin, &plan);
        debug!(command = %command_line, dir = %plan_dir.path().display(), "planning install");

        let mut cmd = Command::new(&self.bin);
        scrub_secrets(&mut cmd);
        let status = cmd
            .args(&plan.args)
            .current_dir(plan_dir.path())
            .env(SHADOW_ACTIVE_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to run `{command_line}`"))?;
        if !status.success() {
            bail!("dependency planning failed: `{command_line}` exited with {status}");
        }

        let written = Lockfile::find_wanted(plan_dir.path())
            .ok_or_else(|| anyhow!("`{command_line}` did not write a lockfile"))?;
        Lockfile::read(&written)
    }
}

#[async_trait]
impl DependencyResolver for NpmResolver {
    #[instrument(name = "npm.plan", skip_all, fields(kind = ?self.kind))]
    async fn compute_diff(&self, _request: &DiffRequest) -> Result<DiffTree> {
        // A clean install wipes node_modules, so every locked package is new.
        let installed = match self.kind {
            InstallKind::Resolve => Lockfile::read_optional(&self.project_dir.join(HIDDEN_LOCKFILE))?,
            InstallKind::Clean => Lockfile::default(),
        };
        let planned = self.planned_lockfile().await?;
        let diff = lockfile_diff(&installed, &planned);
        info!(changes = diff.children.len(), unchanged = diff.unchanged.len(), "install planned");
        Ok(diff)
    }

    async fn commit(&self, _diff: &DiffTree) -> Result<()> {
        let exit = run_shadowed(&self.bin, &self.child_args, &self.handshake, SpawnOptions::default()).await?;
        if let Ok(mut slot) = self.exit.lock() {
            *slot = Some(exit);
        }
        Ok(())
    }

    /// String pins from the project's `overrides` field. Nested override
    /// objects have no single version and are skipped.
    fn overrides(&self) -> BTreeMap<String, String> {
        let manifest = match std::fs::read_to_string(self.project_dir.join("package.json")) {
            Ok(content) => content,
            Err(_) => return BTreeMap::new(),
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&manifest) else {
            return BTreeMap::new();
        };
        value
            .get("overrides")
            .and_then(|o| o.as_object())
            .map(|pins| {
                pins.iter()
                    .filter_map(|(name, pin)| Some((name.clone(), pin.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ApiToken;
    use crate::infrastructure::process::launcher::build_child_args;
    use std::os::unix::fs::PermissionsExt;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn handshake() -> Handshake {
        Handshake {
            bin: "npm".into(),
            api_token: ApiToken::new("t"),
            safe_mode: false,
            progress: false,
        }
    }

    #[test]
    fn only_installing_commands_are_gated() {
        assert_eq!(install_kind(&argv(&["install", "tslib"])), Some(InstallKind::Resolve));
        assert_eq!(install_kind(&argv(&["--global", "i", "tslib"])), Some(InstallKind::Resolve));
        assert_eq!(install_kind(&argv(&["update"])), Some(InstallKind::Resolve));
        assert_eq!(install_kind(&argv(&["ci"])), Some(InstallKind::Clean));
        assert_eq!(install_kind(&argv(&["run", "build"])), None);
        assert_eq!(install_kind(&argv(&["--", "install"])), None);
        assert_eq!(install_kind(&[]), None);
    }

    #[test]
    fn specs_follow_the_subcommand() {
        assert_eq!(package_specs(&argv(&["install", "-D", "tslib@1", "left-pad", "--", "x"])), ["tslib@1", "left-pad"]);
    }

    #[test]
    fn planning_flags_go_before_the_terminator() {
        let child_args = build_child_args(&argv(&["install", "tslib", "--", "extra"]), false);
        let resolver =
            NpmResolver::new(Path::new("npm"), &argv(&["install", "tslib"]), child_args, Path::new("."), handshake())
                .unwrap();
        let args = resolver.plan_args();
        let lock_only = args.iter().position(|a| a == "--package-lock-only").unwrap();
        let terminator = args.iter().position(|a| a == "--").unwrap();
        assert!(lock_only < terminator);
        assert_eq!(args.last().map(String::as_str), Some("extra"));
    }

    #[test]
    fn string_overrides_become_version_pins() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name": "app", "overrides": {"left-pad": "1.3.0", "foo": {"bar": "2.0.0"}}}"#,
        )
        .unwrap();
        let resolver =
            NpmResolver::new(Path::new("npm"), &argv(&["i"]), build_child_args(&argv(&["i"]), false), tmp.path(), handshake())
                .unwrap();
        let pins = resolver.overrides();
        assert_eq!(pins.len(), 1);
        assert_eq!(pins["left-pad"], "1.3.0");
    }

    #[tokio::test]
    async fn plan_runs_in_a_copy_and_leaves_the_project_alone() {
        let bin_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("package.json"), r#"{"name": "app"}"#).unwrap();

        // Writes a lockfile wherever it is run, like `npm i --package-lock-only`.
        let npm = bin_dir.path().join("npm");
        std::fs::write(
            &npm,
            "#!/bin/sh\nprintf '%s' '{\"packages\":{\"node_modules/tslib\":{\"version\":\"1.14.1\"}}}' > package-lock.json\n",
        )
        .unwrap();
        std::fs::set_permissions(&npm, std::fs::Permissions::from_mode(0o755)).unwrap();

        let args = argv(&["install", "tslib"]);
        let resolver =
            NpmResolver::new(&npm, &args, build_child_args(&args, false), project.path(), handshake()).unwrap();
        let diff = resolver.compute_diff(&DiffRequest::default()).await.unwrap();

        assert_eq!(diff.children.len(), 1);
        assert_eq!(diff.children[0].ideal.as_ref().unwrap().name, "tslib");
        assert!(!project.path().join("package-lock.json").exists());
        assert!(resolver.exit().is_none());
    }

    #[tokio::test]
    async fn clean_install_without_lockfile_fails() {
        let project = tempfile::tempdir().unwrap();
        let args = argv(&["ci"]);
        let resolver =
            NpmResolver::new(Path::new("npm"), &args, build_child_args(&args, false), project.path(), handshake())
                .unwrap();
        let err = resolver.compute_diff(&DiffRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("needs a lockfile"));
    }
}
