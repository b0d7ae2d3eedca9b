//! Telnet connection configuration.

use std::time::Duration;

/// Default Telnet port.
pub const DEFAULT_TELNET_PORT: u16 = 23;

/// Connection parameters handed to a [`Connector`](super::Connector).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// Telnet port (default: 23).
    pub port: u16,

    /// How long the TCP connect may take.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Create a configuration for `host` with default port and timeout.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_TELNET_PORT,
            connect_timeout: Duration::from_secs(4),
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::new("10.0.0.1");
        assert_eq!(config.port, 23);
        assert_eq!(config.connect_timeout, Duration::from_secs(4));
        assert_eq!(config.socket_addr(), "10.0.0.1:23");
    }
}
