use rustls::ServerConfig as RustlsConfig;
use std::sync::Arc;

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on the bytes pulled from a socket per read; also the
    /// fragment size used when cutting outbound messages into frames.
    pub max_data_size: usize,
    pub tls_config: Option<Arc<RustlsConfig>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9999,
            max_data_size: 1024,
            tls_config: None,
        }
    }
}
