use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{Operation, OperationKind, PriceClass};

/// The protected service behind the gateway and how its routes are metered.
///
/// ```toml
/// [upstream]
/// base_url = "http://127.0.0.1:9000"
///
/// [[upstream.routes]]
/// path_prefix = "/v1/predictions/institutional"
/// kind = "prediction"
/// class = "institutional"
///
/// [[upstream.routes]]
/// path_prefix = "/v1/exports"
/// kind = "export"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// When absent, metered routes are answered by a built-in echo handler.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Longest matching prefix wins. Unmatched paths meter as basic API calls.
    #[serde(default)]
    pub routes: Vec<MeteredRoute>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout(),
            routes: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        for route in &self.routes {
            if !route.path_prefix.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "upstream route prefix '{}' must start with '/'",
                    route.path_prefix
                )));
            }
            if route.quantity == 0 {
                return Err(ConfigError::Validation(format!(
                    "upstream route '{}' must meter a quantity greater than 0",
                    route.path_prefix
                )));
            }
        }
        Ok(())
    }

    /// Metering rule for a request path.
    pub fn route_for(&self, path: &str) -> MeteredRoute {
        self.routes
            .iter()
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
            .cloned()
            .unwrap_or_else(|| MeteredRoute {
                path_prefix: "/".into(),
                kind: OperationKind::ApiCall,
                class: PriceClass::Basic,
                quantity: 1,
            })
    }
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeteredRoute {
    pub path_prefix: String,
    pub kind: OperationKind,
    #[serde(default)]
    pub class: PriceClass,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
}

impl MeteredRoute {
    pub fn operation(&self) -> Operation {
        Operation::new(self.kind, self.class)
    }
}

fn default_quantity() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UpstreamConfig {
        toml::from_str(
            r#"
            [[routes]]
            path_prefix = "/v1/predictions"
            kind = "prediction"

            [[routes]]
            path_prefix = "/v1/predictions/institutional"
            kind = "prediction"
            class = "institutional"

            [[routes]]
            path_prefix = "/v1/exports"
            kind = "export"
            quantity = 5
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let upstream = config();
        let route = upstream.route_for("/v1/predictions/institutional/AAPL");
        assert_eq!(route.class, PriceClass::Institutional);

        let route = upstream.route_for("/v1/predictions/AAPL");
        assert_eq!(route.operation(), Operation::prediction(PriceClass::Basic));

        assert_eq!(upstream.route_for("/v1/exports/csv").quantity, 5);
    }

    #[test]
    fn test_unmatched_path_is_api_call() {
        let route = config().route_for("/v1/quotes");
        assert_eq!(route.kind, OperationKind::ApiCall);
        assert_eq!(route.quantity, 1);
    }

    #[test]
    fn test_relative_prefix_rejected() {
        let upstream = UpstreamConfig {
            routes: vec![MeteredRoute {
                path_prefix: "v1".into(),
                kind: OperationKind::ApiCall,
                class: PriceClass::Basic,
                quantity: 1,
            }],
            ..UpstreamConfig::default()
        };
        assert!(upstream.validate().is_err());
    }
}
