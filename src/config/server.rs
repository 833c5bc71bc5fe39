use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use http::{HeaderName, Method};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use super::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Whole-request timeout. Requests still running when it elapses get
    /// `504`; usage already handed to the commit task is still recorded.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Proxies whose forwarding headers are believed when deriving the client address.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,

    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            timeout_secs: default_timeout(),
            trusted_proxies: TrustedProxiesConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.body_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.body_limit_bytes must be greater than 0".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "server.timeout_secs must be greater than 0".into(),
            ));
        }
        for cidr in &self.trusted_proxies.cidrs {
            if cidr.parse::<IpNet>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "server.trusted_proxies.cidrs contains an invalid CIDR: '{cidr}'"
                )));
            }
        }
        Ok(())
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Believe forwarding headers from every peer. Only for deployments where
    /// the gateway is unreachable except through a proxy.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    #[serde(default)]
    pub cidrs: Vec<String>,

    #[serde(default = "default_real_ip_header")]
    pub real_ip_header: String,
}

impl TrustedProxiesConfig {
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter_map(|cidr_str| {
                cidr_str.parse::<IpNet>().ok().or_else(|| {
                    tracing::warn!(cidr = %cidr_str, "Invalid CIDR in trusted_proxies config, skipping");
                    None
                })
            })
            .collect()
    }

    pub fn is_trusted_ip(&self, ip: IpAddr, parsed_cidrs: &[IpNet]) -> bool {
        if self.dangerously_trust_all {
            return true;
        }
        parsed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }
}

fn default_real_ip_header() -> String {
    "X-Forwarded-For".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec![],
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            max_age_secs: default_cors_max_age(),
        }
    }
}

impl CorsConfig {
    pub fn into_layer(self) -> Option<CorsLayer> {
        if !self.enabled {
            return None;
        }

        let allow_origin = if self.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("CORS: allowing any origin");
            AllowOrigin::any()
        } else {
            let origins: Vec<http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|origin| {
                    origin.parse().ok().or_else(|| {
                        tracing::warn!(origin = %origin, "Invalid CORS origin, skipping");
                        None
                    })
                })
                .collect();
            AllowOrigin::list(origins)
        };

        let methods: Vec<Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        let headers: Vec<HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        // Clients read their remaining quota from these
        let exposed: Vec<HeaderName> = crate::middleware::RATE_LIMIT_HEADERS
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();

        Some(
            CorsLayer::new()
                .allow_origin(allow_origin)
                .allow_methods(AllowMethods::list(methods))
                .allow_headers(AllowHeaders::list(headers))
                .expose_headers(exposed)
                .max_age(Duration::from_secs(self.max_age_secs)),
        )
    }
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cors_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-API-Key"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cors_max_age() -> u64 {
    86400
}
