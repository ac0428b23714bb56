use std::path::PathBuf;
use std::time::Duration;

use derivative::Derivative;
use http::header::HeaderName;
use rustls::{ClientConfig, ServerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_port: u16,
    pub http_config: HTTPConfig,
    pub tls_config: TLSConfig,
}

#[derive(Debug, Clone)]
pub struct HTTPConfig {
    pub rule_store: RuleStoreConfig,
    pub upstream: String,
    pub role_claim_header: HeaderName,
    /// Bounds each rule lookup and each upstream exchange.
    pub upstream_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleStoreConfig {
    Http(String),
    File(PathBuf),
}

#[derive(Derivative)]
#[derivative(Debug)]
#[derive(Clone)]
pub struct TLSConfig {
    #[derivative(Debug = "ignore")]
    pub tls_client_config: ClientConfig,
    /// Serve HTTPS when set.
    #[derivative(Debug = "ignore")]
    pub tls_server_config: Option<ServerConfig>,
}
