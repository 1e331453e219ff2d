use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::application::diff_walker::DiffFilter;
use crate::application::policy::DecisionOptions;
use crate::domain::policy::{FoldLevel, PolicyAction};
use crate::domain::purl::Ecosystem;
use crate::domain::report::OutputKind;
use crate::domain::value_objects::ApiToken;

/// Prefix of every environment override, e.g. `SOCKET_SHADOW_API__TOKEN`.
pub const ENV_PREFIX: &str = "SOCKET_SHADOW";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    /// Which packages of a diff get checked.
    pub walk: DiffFilter,
    pub report: ReportConfig,
    pub shim: ShimConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub token: ApiToken,
    pub org: Option<String>,
    /// Block the install when the alert service cannot be reached.
    pub safe_mode: bool,
    pub ecosystem: Ecosystem,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: ApiToken::default(),
            org: None,
            safe_mode: false,
            ecosystem: Ecosystem::Npm,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub fold: FoldLevel,
    pub report_level: PolicyAction,
    pub short: bool,
    pub accept_risks: bool,
    pub output: OutputKind,
    /// Report file. Stdout when unset.
    pub path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            fold: FoldLevel::None,
            report_level: PolicyAction::Warn,
            short: false,
            accept_risks: false,
            output: OutputKind::Text,
            path: None,
        }
    }
}

impl ReportConfig {
    pub fn decision_options(&self) -> DecisionOptions {
        DecisionOptions {
            fold: self.fold,
            report_level: self.report_level,
            short: self.short,
            manifest_files: Vec::new(),
        }
    }
}

/// Where the shadow harness reads alerts and the policy from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// `purl → alerts` JSON. Without it every lookup fails, which blocks in
    /// safe mode and warns otherwise.
    pub alerts: Option<PathBuf>,
    /// `alertType → { action }` JSON. Without it the policy is empty.
    pub policy: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Directory holding forwarding shims.
    pub dir: Option<PathBuf>,
}

impl ShimConfig {
    /// Configured shim directory, else `<data dir>/socket-shadow/shims`.
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("socket-shadow").join("shims")))
    }
}

/// `<config dir>/socket-shadow/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("socket-shadow").join("config.toml"))
}

impl AppConfig {
    /// Load an explicit config file (must exist), layered under the environment.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_from(Some(Path::new(path)), Environment::with_prefix(ENV_PREFIX))
    }

    /// Load the per-user config file when present, layered under the environment.
    pub fn load_default() -> Result<Self> {
        Self::load_from(None, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(explicit: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        match explicit {
            Some(path) => builder = builder.add_source(File::from(path.to_path_buf()).required(true)),
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }

        let cfg = builder
            .add_source(env.prefix_separator("_").separator("__").try_parsing(true))
            .build()
            .with_context(|| match explicit {
                Some(path) => format!("Failed to read config file: {}", path.display()),
                None => "Failed to read configuration".to_string(),
            })?;

        cfg.try_deserialize::<AppConfig>()
            .with_context(|| "Failed to parse configuration")
    }
}
