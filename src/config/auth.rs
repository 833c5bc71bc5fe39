use serde::{Deserialize, Serialize};

use super::ConfigError;

/// API key authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Dedicated header carrying the key. Checked before `Authorization: Bearer`.
    #[serde(default = "default_api_key_header")]
    pub header_name: String,

    /// Prefix every accepted key must carry (e.g. "tg_" accepts any tg_* key).
    #[serde(default = "default_api_key_prefix")]
    pub key_prefix: String,

    /// Prefix for issuing new keys.
    /// If not specified, uses key_prefix with "live_" appended.
    #[serde(default)]
    pub generation_prefix: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: default_api_key_header(),
            key_prefix: default_api_key_prefix(),
            generation_prefix: None,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header_name.is_empty() {
            return Err(ConfigError::Validation(
                "API key header name cannot be empty".into(),
            ));
        }
        if http::HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "auth.header_name '{}' is not a valid header name",
                self.header_name
            )));
        }
        let generation = self.generation_prefix();
        if !generation.starts_with(&self.key_prefix) {
            return Err(ConfigError::Validation(format!(
                "auth.generation_prefix '{}' must start with auth.key_prefix '{}'",
                generation, self.key_prefix
            )));
        }
        Ok(())
    }

    /// Get the prefix to use when issuing new keys.
    pub fn generation_prefix(&self) -> String {
        if let Some(ref prefix) = self.generation_prefix {
            prefix.clone()
        } else if self.key_prefix.ends_with('_') {
            format!("{}live_", self.key_prefix)
        } else {
            format!("{}_live_", self.key_prefix)
        }
    }
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_api_key_prefix() -> String {
    "tg_".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_prefix_derivation() {
        let mut config = AuthConfig::default();
        assert_eq!(config.generation_prefix(), "tg_live_");

        config.key_prefix = "acme".into();
        assert_eq!(config.generation_prefix(), "acme_live_");

        config.generation_prefix = Some("acme_test_".into());
        assert_eq!(config.generation_prefix(), "acme_test_");
    }

    #[test]
    fn test_mismatched_generation_prefix_rejected() {
        let config = AuthConfig {
            generation_prefix: Some("other_".into()),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let config = AuthConfig {
            header_name: "X API Key".into(),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
