use serde::{Deserialize, Serialize};

use crate::domain::value_objects::ApiToken;

/// Key of the single-key envelope carrying the handshake.
pub const HANDSHAKE_KEY: &str = "SOCKET_IPC_HANDSHAKE";

/// Sensitive configuration the parent hands to the child once, over IPC,
/// so it never shows up in argv or the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Real binary the child runs as.
    pub bin: String,
    pub api_token: ApiToken,
    /// Fail closed when the alert service cannot be reached.
    pub safe_mode: bool,
    /// Whether the user wanted progress output.
    pub progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandshakeEnvelope {
    #[serde(rename = "SOCKET_IPC_HANDSHAKE")]
    pub handshake: Handshake,
}
