use anyhow::Result;
use std::sync::Arc;

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// ─── Log level ────────────────────────────────────────────────────────────────

/// Controls the verbosity of socket-shadow's internal tracing output.
///
/// Pass to [`init_tracing`] before calling any async entry point.
///
/// | Variant | `tracing` level | When to use                               |
/// |---------|-----------------|-------------------------------------------|
/// | `Error` | `error`         | `--quiet` / CI scripting                  |
/// | `Warn`  | `warn`          | Default: keeps the wrapped tool's output clean |
/// | `Info`  | `info`          | Shows gate decisions and lookup timings   |
/// | `Debug` | `debug`         | `--verbose`: handshake and walk details   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

/// Initialise the global `tracing` subscriber for socket-shadow.
///
/// Respects `RUST_LOG` when set, falling back to `level` otherwise. Output
/// goes to stderr so it never mixes with the wrapped tool's stdout.
///
/// Call this **once** at application startup. Library consumers who manage
/// their own subscriber should skip this.
///
/// Only available when the `cli` feature is enabled (pulls in
/// `tracing-subscriber`).
#[cfg(feature = "cli")]
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let default_filter = match level {
        LogLevel::Error => "socket_shadow=error",
        LogLevel::Warn => "socket_shadow=warn",
        LogLevel::Info => "socket_shadow=info",
        LogLevel::Debug => "socket_shadow=debug",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

// ─── Public API Facade ───

pub use application::diff_walker::{walk_diff, DiffFilter, DEFAULT_MAX_DIFF_NODES};
pub use application::gate::{GateState, ResolverGate};
pub use application::monitoring::PerfReport;
pub use application::policy::{decide, DecisionOptions};
pub use application::session::SessionContext;
pub use domain::alert::{Alert, AlertLookup, AlertsByPurl, ServiceResult};
pub use domain::error::ShadowError;
pub use domain::handshake::Handshake;
pub use domain::package::{DiffAction, DiffTree, PackageDetail, ResolvedPackageNode};
pub use domain::policy::{FoldLevel, PolicyAction, SecurityPolicy};
pub use domain::ports::{AlertService, DependencyResolver, DiffRequest, PolicySource, ReportSink};
pub use domain::purl::{Ecosystem, Purl};
pub use domain::report::{OutputKind, Report};
pub use domain::violations::{ViolationNode, ViolationsMap};
pub use infrastructure::config::AppConfig;
pub use infrastructure::process::shim::{ShimOptions, ShimOutcome, ShimStrategy};

use crate::application::monitoring::{MonitoringAlertService, MonitoringResolver};
use crate::infrastructure::process::{launcher, locator, shim};

// ─── Public entry points ───

/// Gate one resolver operation: compute the diff, check it, commit it when
/// approved.
///
/// Use [`gate_with_timing`] if you also want a performance report.
pub async fn gate(
    session: SessionContext,
    resolver: Arc<dyn DependencyResolver>,
    alerts: Arc<dyn AlertService>,
    policy: Arc<dyn PolicySource>,
    sink: Arc<dyn ReportSink>,
    request: &DiffRequest,
) -> Result<Option<Report>> {
    let (report, _) = gate_with_timing(session, resolver, alerts, policy, sink, request).await?;
    Ok(report)
}

/// Gate with performance timing.
///
/// Returns the [`Report`] and a [`PerfReport`] with the diff computation and
/// alert lookup timings. A blocked operation is an `Err` carrying
/// [`ShadowError::Blocked`]; the report was still emitted to `sink`. There is
/// no report when the alert lookup failed and the session fails open.
pub async fn gate_with_timing(
    session: SessionContext,
    resolver: Arc<dyn DependencyResolver>,
    alerts: Arc<dyn AlertService>,
    policy: Arc<dyn PolicySource>,
    sink: Arc<dyn ReportSink>,
    request: &DiffRequest,
) -> Result<(Option<Report>, PerfReport)> {
    let perf = PerfReport::new();
    let resolver = Arc::new(MonitoringResolver::new(resolver, Arc::clone(&perf)));
    let alerts = Arc::new(MonitoringAlertService::new(alerts, Arc::clone(&perf)));

    let gate = ResolverGate::new(resolver, Arc::new(session), alerts, policy, sink);
    let report = gate.reify(request).await?;
    Ok((report, PerfReport::snapshot(&perf)))
}

/// Idempotently install a forwarding shim for `bin` in the configured shim
/// directory.
pub fn install_shim(bin: &str, cfg: &AppConfig) -> Result<ShimOutcome> {
    let dir = cfg
        .shim
        .dir()
        .ok_or_else(|| anyhow::anyhow!("no shim directory configured and no data directory available"))?;
    let options = ShimOptions::from_env(dir)?;
    Ok(shim::install_shim(bin, &options)?)
}

/// Run the real `bin` behind the gate, from the current directory.
///
/// Returns how the child ended; pass it to
/// [`infrastructure::process::launcher::exit_with`] to mirror it.
#[cfg(unix)]
pub async fn shadow(
    bin: &str,
    args: &[String],
    cfg: &AppConfig,
    debug: bool,
) -> Result<launcher::ShadowExit> {
    let shim_dir = cfg.shim.dir();
    let real_bin = locator::find_real_bin_in_env(bin, shim_dir.as_deref())?;
    let project_dir = std::env::current_dir()?;
    shadow_in(&real_bin, args, cfg, debug, &project_dir).await
}

/// [`shadow`] for an already located binary and an explicit project.
///
/// Installing commands are planned first and run only when the gate
/// approves the planned diff; a blocked install is an `Err` carrying
/// [`ShadowError::Blocked`] and the real command never starts. Anything
/// else runs directly.
#[cfg(unix)]
pub async fn shadow_in(
    real_bin: &std::path::Path,
    args: &[String],
    cfg: &AppConfig,
    debug: bool,
    project_dir: &std::path::Path,
) -> Result<launcher::ShadowExit> {
    use crate::domain::collaborators::{MapPolicySource, UnavailableAlertService};
    use crate::infrastructure::files::{FileAlertService, FilePolicySource};
    use crate::infrastructure::npm::{self, NpmResolver};
    use crate::presentation::writers::WriterSink;

    let child_args = launcher::build_child_args(args, debug);
    let handshake = Handshake {
        bin: real_bin.display().to_string(),
        api_token: cfg.api.token.clone(),
        safe_mode: cfg.api.safe_mode,
        progress: child_args.progress,
    };

    let Some(resolver) = NpmResolver::new(real_bin, args, child_args.clone(), project_dir, handshake.clone()) else {
        tracing::debug!("command installs nothing; running it ungated");
        return Ok(launcher::run_shadowed(real_bin, &child_args, &handshake, launcher::SpawnOptions::default()).await?);
    };
    let resolver = Arc::new(resolver);

    let alerts: Arc<dyn AlertService> = match &cfg.feed.alerts {
        Some(path) => Arc::new(FileAlertService::new(path)),
        None => Arc::new(UnavailableAlertService {
            message: "no alert feed configured".into(),
        }),
    };
    let policy: Arc<dyn PolicySource> = match &cfg.feed.policy {
        Some(path) => Arc::new(FilePolicySource::new(path)),
        None => Arc::new(MapPolicySource::new(SecurityPolicy::default())),
    };
    // stdout belongs to the package manager.
    let sink = Arc::new(WriterSink::beside_tool(cfg.report.output, cfg.report.path.clone()));
    let request = DiffRequest {
        add: npm::package_specs(args),
        manifest_files: npm::manifest_files(project_dir),
    };

    gate(
        SessionContext::from_handshake(handshake, cfg),
        resolver.clone(),
        alerts,
        policy,
        sink,
        &request,
    )
    .await?;

    resolver
        .exit()
        .ok_or_else(|| anyhow::anyhow!("the install was approved but never ran"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::error::EXIT_POLICY_VIOLATION;
    use crate::infrastructure::process::launcher::ShadowExit;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// A project, a fake `npm` that plans an install of `evil-pkg` and
    /// records any real run, and a feed flagging `evil-pkg` as malware.
    struct Fixture {
        dir: tempfile::TempDir,
        npm: PathBuf,
        ran: PathBuf,
    }

    impl Fixture {
        fn new(malware_action: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let project = dir.path().join("project");
            std::fs::create_dir(&project).unwrap();
            std::fs::write(project.join("package.json"), r#"{"name": "app"}"#).unwrap();

            let ran = dir.path().join("ran.txt");
            let npm = dir.path().join("npm");
            let script = format!(
                r#"#!/bin/sh
case " $* " in
  *" --package-lock-only "*)
    printf '%s' '{{"packages":{{"node_modules/evil-pkg":{{"version":"1.0.0","resolved":"https://registry.npmjs.org/evil-pkg/-/evil-pkg-1.0.0.tgz"}}}}}}' > package-lock.json ;;
  *)
    echo "$*" > "{ran}" ;;
esac
"#,
                ran = ran.display()
            );
            std::fs::write(&npm, script).unwrap();
            std::fs::set_permissions(&npm, std::fs::Permissions::from_mode(0o755)).unwrap();

            std::fs::write(
                dir.path().join("alerts.json"),
                r#"{"pkg:npm/evil-pkg@1.0.0": [{"type": "malware", "file": "index.js", "start": 1, "end": 40}]}"#,
            )
            .unwrap();
            std::fs::write(
                dir.path().join("policy.json"),
                format!(r#"{{"malware": {{"action": "{malware_action}"}}}}"#),
            )
            .unwrap();

            Fixture { dir, npm, ran }
        }

        fn project(&self) -> PathBuf {
            self.dir.path().join("project")
        }

        fn config(&self) -> AppConfig {
            let mut cfg = AppConfig::default();
            cfg.feed.alerts = Some(self.dir.path().join("alerts.json"));
            cfg.feed.policy = Some(self.dir.path().join("policy.json"));
            cfg.report.path = Some(self.dir.path().join("report.json"));
            cfg
        }

        fn run_args(&self, args: &[&str]) -> Vec<String> {
            args.iter().map(|s| s.to_string()).collect()
        }
    }

    #[tokio::test]
    async fn blocked_install_never_runs_the_package_manager() {
        let fx = Fixture::new("error");
        let args = fx.run_args(&["install", "evil-pkg"]);

        let err = shadow_in(&fx.npm, &args, &fx.config(), false, &fx.project()).await.unwrap_err();

        let shadow_err = err.downcast_ref::<ShadowError>().unwrap();
        assert_eq!(shadow_err.exit_code(), EXIT_POLICY_VIOLATION);
        assert!(!fx.ran.exists());
        assert!(!fx.project().join("package-lock.json").exists());

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(fx.dir.path().join("report.json")).unwrap()).unwrap();
        assert_eq!(report["healthy"], false);
    }

    #[tokio::test]
    async fn approved_install_runs_the_real_command() {
        let fx = Fixture::new("warn");
        let args = fx.run_args(&["install", "evil-pkg"]);

        let exit = shadow_in(&fx.npm, &args, &fx.config(), false, &fx.project()).await.unwrap();

        assert_eq!(exit, ShadowExit::Code(0));
        let ran = std::fs::read_to_string(&fx.ran).unwrap();
        assert!(ran.starts_with("install evil-pkg --no-progress"));
        assert!(!ran.contains("--package-lock-only"));
    }

    #[tokio::test]
    async fn safe_mode_without_a_feed_blocks_the_install() {
        let fx = Fixture::new("error");
        let mut cfg = fx.config();
        cfg.feed.alerts = None;
        cfg.api.safe_mode = true;

        let err = shadow_in(&fx.npm, &fx.run_args(&["i", "evil-pkg"]), &cfg, false, &fx.project())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ShadowError>(), Some(ShadowError::AlertService { .. })));
        assert!(!fx.ran.exists());
    }

    #[tokio::test]
    async fn non_installing_commands_run_ungated() {
        let fx = Fixture::new("error");
        let exit = shadow_in(&fx.npm, &fx.run_args(&["run", "build"]), &fx.config(), false, Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(exit, ShadowExit::Code(0));
        assert!(std::fs::read_to_string(&fx.ran).unwrap().starts_with("run build"));
    }
}
