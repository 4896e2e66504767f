//! Runtime configuration for the clamgate gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SOCKET: &str = "/run/clamav/clamd.ctl";
/// 200 MiB, matching the stream size limit clamd ships with.
const DEFAULT_MAX_SIZE: u64 = 209_715_200;
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_HTTP_PORT: u16 = 6000;
const DEFAULT_GRPC_PORT: u16 = 9000;

/// Runtime configuration shared by every component of the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unix socket path of the clamd daemon.
    pub socket: PathBuf,
    /// Payload size ceiling in bytes, enforced before any daemon traffic.
    pub max_size: u64,
    /// Per-scan deadline; the daemon session is detached once it elapses.
    pub scan_timeout: Duration,
    /// Bind host for both listeners.
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub enable_grpc: bool,
}

impl Config {
    /// Reject configurations that cannot produce a working gateway.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.socket.as_os_str().is_empty() {
            return Err(eyre::eyre!("clamd socket path must not be empty"));
        }
        if self.max_size == 0 {
            return Err(eyre::eyre!("max file size must be greater than 0"));
        }
        if self.scan_timeout.is_zero() {
            return Err(eyre::eyre!("scan timeout must be greater than 0"));
        }
        if self.host.is_empty() {
            return Err(eyre::eyre!("bind host must not be empty"));
        }
        if self.http_port == 0 {
            return Err(eyre::eyre!("http port must be greater than 0"));
        }
        if self.enable_grpc && self.grpc_port == 0 {
            return Err(eyre::eyre!("grpc port must be greater than 0"));
        }
        Ok(())
    }

    /// Address the HTTP listener binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` does not parse as an IP address.
    pub fn http_addr(&self) -> crate::Result<SocketAddr> {
        parse_addr(&self.host, self.http_port)
    }

    /// Address the gRPC listener binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` does not parse as an IP address.
    pub fn grpc_addr(&self) -> crate::Result<SocketAddr> {
        parse_addr(&self.host, self.grpc_port)
    }
}

fn parse_addr(host: &str, port: u16) -> crate::Result<SocketAddr> {
    let ip = host
        .parse()
        .map_err(|e| eyre::eyre!("invalid bind host {host:?}: {e}"))?;
    Ok(SocketAddr::new(ip, port))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            max_size: DEFAULT_MAX_SIZE,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            host: DEFAULT_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            grpc_port: DEFAULT_GRPC_PORT,
            enable_grpc: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_size, 209_715_200);
        assert_eq!(config.scan_timeout, Duration::from_secs(300));
        assert!(config.enable_grpc);
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = Config {
            scan_timeout: Duration::ZERO,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scan timeout"));
    }

    #[test]
    fn zero_max_size_rejected() {
        let config = Config {
            max_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_socket_rejected() {
        let config = Config {
            socket: PathBuf::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn grpc_port_ignored_when_disabled() {
        let config = Config {
            enable_grpc: false,
            grpc_port: 0,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn addrs_combine_host_and_port() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            http_port: 6000,
            grpc_port: 9000,
            ..Config::default()
        };
        assert_eq!(config.http_addr().unwrap().to_string(), "127.0.0.1:6000");
        assert_eq!(config.grpc_addr().unwrap().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn hostname_bind_host_rejected() {
        let config = Config {
            host: "localhost".to_string(),
            ..Config::default()
        };
        assert!(config.http_addr().is_err());
    }
}
