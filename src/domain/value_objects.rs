use serde::{Deserialize, Serialize};

/// API token for the alert service.
///
/// Never printed: `Debug` and `Display` are redacted so the secret cannot
/// leak through logs or error messages.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw secret. Call sites should hand it straight to the
    /// collaborator that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

impl std::fmt::Display for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

/// Name of the shadowed package manager (`npm`, `npx`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinName(pub String);

impl BinName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BinName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted_in_debug_and_display() {
        let token = ApiToken::new("sktsec_secret_value");
        assert_eq!(format!("{token:?}"), "ApiToken(***)");
        assert_eq!(token.to_string(), "***");
        assert_eq!(token.expose(), "sktsec_secret_value");
    }
}
