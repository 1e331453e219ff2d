use crate::application::diff_walker::DiffFilter;
use crate::application::policy::DecisionOptions;
use crate::domain::handshake::Handshake;
use crate::domain::purl::Ecosystem;
use crate::domain::value_objects::{ApiToken, BinName};
use crate::infrastructure::config::AppConfig;

/// Everything one gated invocation needs, built once and passed by reference.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub bin: BinName,
    pub api_token: ApiToken,
    /// Fail closed when alerts cannot be fetched.
    pub safe_mode: bool,
    pub progress: bool,
    pub org: Option<String>,
    pub ecosystem: Ecosystem,
    pub filter: DiffFilter,
    pub decision: DecisionOptions,
    /// Let an unhealthy operation through anyway.
    pub accept_risks: bool,
}

impl SessionContext {
    /// Session for the child side: secrets come from the handshake, the
    /// rest from local configuration.
    pub fn from_handshake(handshake: Handshake, cfg: &AppConfig) -> Self {
        Self {
            bin: BinName(handshake.bin),
            api_token: handshake.api_token,
            safe_mode: handshake.safe_mode,
            progress: handshake.progress,
            ..Self::from_config(cfg)
        }
    }

    /// Session driven entirely by configuration (offline checks, library use).
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            bin: BinName("npm".to_string()),
            api_token: cfg.api.token.clone(),
            safe_mode: cfg.api.safe_mode,
            progress: false,
            org: cfg.api.org.clone(),
            ecosystem: cfg.api.ecosystem,
            filter: cfg.walk.clone(),
            decision: cfg.report.decision_options(),
            accept_risks: cfg.report.accept_risks,
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
