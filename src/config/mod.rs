//! Gateway configuration.
//!
//! The gateway is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [limits]
//! window_secs = 60
//!
//! [database]
//! type = "sqlite"
//! path = "tollgate.db"
//!
//! [billing.webhook]
//! url = "https://billing.internal/alerts?token=${BILLING_TOKEN}"
//! ```

mod auth;
mod billing;
mod bootstrap;
mod cache;
mod database;
mod limits;
mod observability;
mod server;
mod upstream;

use std::{path::Path, sync::OnceLock};

pub use auth::*;
pub use billing::*;
pub use bootstrap::*;
pub use cache::*;
pub use database::*;
pub use limits::*;
pub use observability::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use upstream::*;

use crate::pricing::PricingConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential header and key format.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Sliding-window rate limits per plan tier.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Unit costs and bulk discount.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Spend threshold alerts.
    #[serde(default)]
    pub billing: BillingConfig,

    /// Rate window storage.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Account, credential and ledger storage.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// The protected service and its metered routes.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Accounts and keys seeded at startup.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch backends this build can't provide before serde reports an
        // opaque "unknown variant"
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: GatewayConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.auth.validate()?;
        self.limits.validate()?;
        self.pricing.validate()?;
        self.billing.validate()?;
        self.cache.validate()?;
        self.database.validate()?;
        self.upstream.validate()?;
        self.bootstrap.validate(&self.auth.key_prefix)?;

        if self.database.is_memory() && self.bootstrap.accounts.is_empty() {
            tracing::warn!(
                "In-memory database with no [bootstrap] accounts: every request will be rejected"
            );
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(type_val) = raw
        .get("database")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_database_feature(type_val, &mut issues);
    }

    if let Some(type_val) = raw
        .get("cache")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_cache_feature(type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}"
    )))
}

fn check_database_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "database-sqlite"))]
        "sqlite" => _issues.push((
            "database type 'sqlite' requires the 'database-sqlite' feature".into(),
            "database-sqlite",
        )),
        _ => {}
    }
}

fn check_cache_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "redis"))]
        "redis" => _issues.push((
            "cache type 'redis' requires the 'redis' feature".into(),
            "redis",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\$\{([^}]+)\}").expect("static pattern")
    })
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        // Find if there's a comment on this line
        let comment_pos = line.find('#');

        // Process the line, only expanding variables that appear before any comment
        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            let match_start = whole.start();

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && match_start >= pos
            {
                continue;
            }

            // Add text before this match
            line_result.push_str(&line[last_end..match_start]);

            // Expand the variable
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        // Add remaining text after last match
        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use rust_decimal::dec;

    use super::*;
    use crate::models::{OperationKind, PlanTier};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.header_name, "X-API-Key");
        assert_eq!(config.limits.window_secs, 60);
        assert_eq!(config.billing.threshold_minor_units, 1000);
        assert!(config.database.is_memory());
        assert!(matches!(config.cache, CacheConfig::Memory(_)));
    }

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::from_str(
            r#"
            [server]
            port = 9090

            [limits]
            window_secs = 30
            free = 10

            [pricing]
            advanced = "0.07"

            [billing]
            threshold_minor_units = 5000

            [upstream]
            base_url = "http://127.0.0.1:9000"

            [[upstream.routes]]
            path_prefix = "/v1/exports"
            kind = "export"

            [[bootstrap.accounts]]
            name = "acme"
            tier = "basic"
            prediction_allowance = 50

            [[bootstrap.accounts.keys]]
            name = "ci"
            key = "tg_live_example"
        "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.limits.limit_for(PlanTier::Free), Some(10));
        assert_eq!(config.pricing.advanced, dec!(0.07));
        assert_eq!(config.billing.threshold_minor_units, 5000);
        assert_eq!(
            config.upstream.route_for("/v1/exports/x").kind,
            OperationKind::Export
        );
        assert_eq!(config.bootstrap.accounts[0].keys.len(), 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = GatewayConfig::from_str(
            r#"
            [limits]
            windw_secs = 30
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_env_var() {
        temp_env::with_var_unset("TOLLGATE_TEST_MISSING", || {
            let err = GatewayConfig::from_str(
                r#"
                [upstream]
                base_url = "${TOLLGATE_TEST_MISSING}"
            "#,
            )
            .unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "TOLLGATE_TEST_MISSING"));
        });
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_UPSTREAM_URL", Some("http://upstream:9000"), || {
            let result = expand_env_vars("base_url = \"${TEST_UPSTREAM_URL}\"").unwrap();
            assert_eq!(result, "base_url = \"http://upstream:9000\"");
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[limits]\nbasic = 900\n").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.limits.limit_for(PlanTier::Basic), Some(900));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = GatewayConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, ref p) if p == &path));
    }

    #[test]
    #[cfg(not(feature = "redis"))]
    fn test_disabled_redis_error() {
        let err = GatewayConfig::from_str(
            r#"
            [cache]
            type = "redis"
            url = "redis://localhost"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'redis' feature"));
    }
}
