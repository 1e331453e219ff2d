use std::ffi::OsString;
use std::path::Path;

#[cfg(unix)]
use crate::domain::error::ShadowError;
#[cfg(unix)]
use crate::domain::handshake::Handshake;

/// Log level handed to the child when the user did not pick one: the
/// quietest level that still shows errors.
pub const DEFAULT_CHILD_LOGLEVEL: &str = "error";

const LOGLEVEL_FLAGS: &[&str] = &[
    "--silent", "--quiet", "--verbose", "--silly", "-s", "-q", "-d", "-dd", "-ddd",
];

/// Argument vector for the wrapped package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildArgs {
    pub args: Vec<String>,
    /// Whether the user asked for progress output (last progress flag wins).
    pub progress: bool,
}

/// Derive the child's argv from what the user typed.
///
/// Only arguments before the first literal `--` are package-manager flags;
/// the rest pass through untouched. Progress flags are stripped and the
/// child always gets `--no-progress`. `--loglevel error` is added unless
/// `debug` is set or the user already chose a log level.
pub fn build_child_args(args: &[String], debug: bool) -> ChildArgs {
    let (flags, passthrough) = match args.iter().position(|a| a == "--") {
        Some(idx) => (&args[..idx], Some(&args[idx + 1..])),
        None => (args, None),
    };

    let mut progress = true;
    let mut explicit_loglevel = false;
    let mut out = Vec::with_capacity(args.len() + 3);

    for arg in flags {
        if let Some(value) = progress_flag(arg) {
            progress = value;
            continue;
        }
        if arg == "--loglevel" || arg.starts_with("--loglevel=") || LOGLEVEL_FLAGS.contains(&arg.as_str()) {
            explicit_loglevel = true;
        }
        out.push(arg.clone());
    }

    out.push("--no-progress".to_string());
    if !debug && !explicit_loglevel {
        out.push("--loglevel".to_string());
        out.push(DEFAULT_CHILD_LOGLEVEL.to_string());
    }
    if let Some(rest) = passthrough {
        out.push("--".to_string());
        out.extend(rest.iter().cloned());
    }

    ChildArgs { args: out, progress }
}

fn progress_flag(arg: &str) -> Option<bool> {
    match arg {
        "--progress" => Some(true),
        "--no-progress" => Some(false),
        _ => arg
            .strip_prefix("--progress=")
            .map(|v| !matches!(v, "false" | "0" | "no" | "")),
    }
}

/// Prefix of the environment overrides that carry secrets, e.g.
/// `SOCKET_SHADOW_API__TOKEN`. The child gets them through the handshake only.
pub const SECRET_ENV_PREFIX: &str = "SOCKET_SHADOW_API__";

/// Keys among `vars` that must not reach a child process.
pub fn secret_env_keys<I>(vars: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    vars.into_iter()
        .filter(|key| {
            key.to_string_lossy()
                .to_ascii_uppercase()
                .starts_with(SECRET_ENV_PREFIX)
        })
        .collect()
}

/// Human-readable command line, for logs.
pub fn display_command(bin: &Path, args: &ChildArgs) -> String {
    std::iter::once(bin.display().to_string())
        .chain(args.args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Supervised child (unix) ──────────────────────────────────────────────────

/// How the wrapped process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowExit {
    Code(i32),
    /// Terminated by this signal number.
    Signal(i32),
}

/// Stdio overrides. `None` means inherit the terminal.
#[derive(Debug, Default)]
pub struct SpawnOptions {
    pub stdin: Option<std::process::Stdio>,
    pub stdout: Option<std::process::Stdio>,
    pub stderr: Option<std::process::Stdio>,
}

#[cfg(unix)]
pub use self::unix::{exit_with, relays_to_child, run_shadowed, scrub_secrets, spawn_shadowed, ShadowedChild};

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Stdio;
    use tokio::net::UnixStream;
    use tokio::process::{Child, Command};
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{debug, info, warn};

    use crate::infrastructure::ipc::{send_handshake, IPC_FD_ENV};
    use crate::infrastructure::process::shim::SHADOW_ACTIVE_ENV;

    /// A running package-manager process plus the parent's end of its IPC channel.
    pub struct ShadowedChild {
        pub child: Child,
        pub ipc: UnixStream,
    }

    /// Drop inherited secret overrides from `cmd`'s environment.
    pub fn scrub_secrets(cmd: &mut Command) {
        for key in secret_env_keys(std::env::vars_os().map(|(key, _)| key)) {
            cmd.env_remove(key);
        }
    }

    /// Signals the parent passes on to the child. Interrupts and quits typed
    /// at the terminal already reach the whole foreground process group, the
    /// child included; sending them again would double-deliver.
    pub fn relays_to_child(signal: Signal) -> bool {
        matches!(signal, Signal::SIGTERM | Signal::SIGHUP)
    }

    /// Spawn `bin` with the derived argv, inherited stdio unless overridden,
    /// and an IPC channel that is always attached. Secret overrides are
    /// removed from the inherited environment.
    pub fn spawn_shadowed(bin: &Path, args: &ChildArgs, options: SpawnOptions) -> Result<ShadowedChild, ShadowError> {
        let (parent_end, child_end) = std::os::unix::net::UnixStream::pair()?;
        // Sockets are created close-on-exec; the child's end must survive exec.
        let child_fd = child_end.as_raw_fd();
        fcntl(child_fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(std::io::Error::from)?;

        let mut cmd = Command::new(bin);
        scrub_secrets(&mut cmd);
        cmd.args(&args.args)
            .env(IPC_FD_ENV, child_fd.to_string())
            .env(SHADOW_ACTIVE_ENV, "1")
            .stdin(options.stdin.unwrap_or_else(Stdio::inherit))
            .stdout(options.stdout.unwrap_or_else(Stdio::inherit))
            .stderr(options.stderr.unwrap_or_else(Stdio::inherit));

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ShadowError::ProcessNotFound {
                bin: bin.display().to_string(),
                searched: 0,
            },
            _ => ShadowError::Io(e),
        })?;
        drop(child_end);
        info!(command = %display_command(bin, args), pid = child.id().unwrap_or(0), "spawned shadowed process");

        parent_end.set_nonblocking(true)?;
        let ipc = UnixStream::from_std(parent_end)?;
        Ok(ShadowedChild { child, ipc })
    }

    /// Spawn, hand over the handshake, then wait for the child. Termination
    /// signals are watched so the parent outlives the child; see
    /// [`relays_to_child`] for which ones are passed on.
    pub async fn run_shadowed(
        bin: &Path,
        args: &ChildArgs,
        handshake: &Handshake,
        options: SpawnOptions,
    ) -> Result<ShadowExit, ShadowError> {
        let ShadowedChild { mut child, mut ipc } = spawn_shadowed(bin, args, options)?;

        // A child that dies before reading is reported through its exit status.
        if let Err(e) = send_handshake(&mut ipc, handshake).await {
            warn!(error = %e, "could not deliver handshake");
        }

        wait_relaying_signals(&mut child).await
    }

    async fn wait_relaying_signals(child: &mut Child) -> Result<ShadowExit, ShadowError> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigquit = signal(SignalKind::quit())?;
        let pid = child.id().map(|id| Pid::from_raw(id as i32));

        let status = loop {
            let received = tokio::select! {
                status = child.wait() => break status?,
                _ = sigint.recv() => Signal::SIGINT,
                _ = sigterm.recv() => Signal::SIGTERM,
                _ = sighup.recv() => Signal::SIGHUP,
                _ = sigquit.recv() => Signal::SIGQUIT,
            };
            if !relays_to_child(received) {
                debug!(signal = ?received, "signal left to the process group; waiting for child");
                continue;
            }
            if let Some(pid) = pid {
                debug!(signal = ?received, "forwarding signal to child");
                if let Err(e) = kill(pid, received) {
                    warn!(signal = ?received, error = %e, "failed to forward signal");
                }
            }
        };

        Ok(match (status.code(), status.signal()) {
            (Some(code), _) => ShadowExit::Code(code),
            (None, Some(sig)) => ShadowExit::Signal(sig),
            (None, None) => ShadowExit::Code(1),
        })
    }

    /// Leave the process the way the child did: same exit code, or death by
    /// the same signal.
    pub fn exit_with(exit: ShadowExit) -> ! {
        match exit {
            ShadowExit::Code(code) => std::process::exit(code),
            ShadowExit::Signal(sig) => {
                if let Ok(signal) = Signal::try_from(sig) {
                    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};
                    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
                    // SAFETY: installs the default disposition, no handler code runs.
                    let restored = unsafe { sigaction(signal, &default) };
                    if restored.is_ok() {
                        let _ = nix::sys::signal::raise(signal);
                    }
                }
                // Not terminated by the re-raise (e.g. the signal is ignored).
                std::process::exit(128 + sig)
            }
        }
    }
}
