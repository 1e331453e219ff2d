use anyhow::Result;
use clap::{Parser, Subcommand};
use socket_shadow::domain::error::{ShadowError, EXIT_MALFUNCTION, EXIT_OK};
use socket_shadow::domain::ports::ReportSink;
use socket_shadow::infrastructure::files::{FileAlertService, FilePolicySource, JsonDiffResolver};
use socket_shadow::presentation::cli_summary::{print_perf_summary, print_report_summary};
use socket_shadow::presentation::writers::WriterSink;
use socket_shadow::{
    AppConfig, DiffRequest, FoldLevel, LogLevel, OutputKind, PolicyAction, Report, SessionContext, ShimOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "socket-shadow",
    version,
    about = "Shadow your package manager: every package an install would add is checked against your security policy first."
)]
struct Cli {
    /// Config file (default: <config dir>/socket-shadow/config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the real package manager behind the shadow harness
    Shadow {
        /// Package manager to shadow (npm, npx, ...)
        bin: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Install a forwarding shim so later invocations go through the harness
    InstallShim { bin: String },
    /// Gate a serialized diff tree offline
    Check {
        /// Diff tree JSON produced by the resolver
        #[arg(long)]
        diff: PathBuf,
        /// purl → alerts JSON
        #[arg(long)]
        alerts: PathBuf,
        /// alert type → { action } JSON
        #[arg(long)]
        policy: PathBuf,
        /// json, md, table or text
        #[arg(short, long)]
        format: Option<OutputKind>,
        /// Report file; a .json or .md extension selects the format
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        fold: Option<FoldLevel>,
        #[arg(long)]
        report_level: Option<PolicyAction>,
        /// Proceed even when the policy blocks
        #[arg(long)]
        accept_risks: bool,
        /// Manifest files attached to each finding
        #[arg(long = "manifest")]
        manifests: Vec<String>,
        /// Print lookup timings
        #[arg(long)]
        timing: bool,
    },
}

/// Sink that also prints the coloured summary to stderr.
struct SummarySink {
    inner: WriterSink,
}

impl ReportSink for SummarySink {
    fn emit(&self, report: &Report) -> Result<()> {
        self.inner.emit(report)?;
        print_report_summary(report);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let level = match (cli.verbose, cli.quiet) {
        (true, _) => LogLevel::Debug,
        (_, true) => LogLevel::Error,
        _ => LogLevel::Warn,
    };
    socket_shadow::init_tracing(level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("socket-shadow: {e:#}");
            e.downcast_ref::<ShadowError>()
                .map(ShadowError::exit_code)
                .unwrap_or(EXIT_MALFUNCTION)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let cfg = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    match cli.command {
        Command::Shadow { bin, args } => shadow(&bin, &args, &cfg, cli.verbose).await,
        Command::InstallShim { bin } => {
            match socket_shadow::install_shim(&bin, &cfg)? {
                ShimOutcome::AlreadyShadowed => eprintln!("{bin} is already shadowed"),
                ShimOutcome::Installed { path, new_path, written } => {
                    let verb = if written { "Installed" } else { "Up to date" };
                    eprintln!("{verb}: {}", path.display());
                    if let Some(new_path) = new_path {
                        println!("export PATH=\"{}\"", new_path.to_string_lossy());
                    }
                }
            }
            Ok(EXIT_OK)
        }
        Command::Check {
            diff,
            alerts,
            policy,
            format,
            output,
            fold,
            report_level,
            accept_risks,
            manifests,
            timing,
        } => {
            let mut session = session_for(&cfg).await?;
            if let Some(fold) = fold {
                session.decision.fold = fold;
            }
            if let Some(level) = report_level {
                session.decision.report_level = level;
            }
            session.accept_risks |= accept_risks;

            let kind = format.unwrap_or(cfg.report.output);
            let path = output.or_else(|| cfg.report.path.clone());
            let sink: Arc<dyn ReportSink> = match path {
                Some(path) if !cli.quiet => Arc::new(SummarySink {
                    inner: WriterSink::new(kind, Some(path)),
                }),
                path => Arc::new(WriterSink::new(kind, path)),
            };

            let request = DiffRequest {
                add: Vec::new(),
                manifest_files: manifests,
            };
            let (report, perf) = socket_shadow::gate_with_timing(
                session,
                Arc::new(JsonDiffResolver::load(&diff)?),
                Arc::new(FileAlertService::new(alerts)),
                Arc::new(FilePolicySource::new(policy)),
                sink,
                &request,
            )
            .await?;

            if timing {
                print_perf_summary(&perf);
            }
            match report {
                Some(report) => tracing::info!(report_id = %report.report_id, healthy = report.healthy, "check finished"),
                None => eprintln!("warning: alerts could not be fetched; the diff was not checked"),
            }
            Ok(EXIT_OK)
        }
    }
}

/// Session for `check`: from the parent's handshake when running under the
/// harness, from local configuration otherwise.
async fn session_for(cfg: &AppConfig) -> Result<SessionContext> {
    #[cfg(unix)]
    {
        if let Some(handshake) = socket_shadow::infrastructure::ipc::recv_handshake_from_env().await? {
            return Ok(SessionContext::from_handshake(handshake, cfg));
        }
    }
    Ok(SessionContext::from_config(cfg))
}

#[cfg(unix)]
async fn shadow(bin: &str, args: &[String], cfg: &AppConfig, debug: bool) -> Result<i32> {
    let exit = socket_shadow::shadow(bin, args, cfg, debug).await?;
    socket_shadow::infrastructure::process::launcher::exit_with(exit)
}

#[cfg(not(unix))]
async fn shadow(_bin: &str, _args: &[String], _cfg: &AppConfig, _debug: bool) -> Result<i32> {
    anyhow::bail!("the shadow harness needs a unix socket pair for its IPC channel")
}
