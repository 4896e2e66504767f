//! CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clamgate_core::Config;
use clap::Parser;

fn positive_u64(s: &str) -> Result<u64, String> {
    let val: u64 = s.parse().map_err(|e| format!("{e}"))?;
    if val == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(val)
}

fn nonzero_port(s: &str) -> Result<u16, String> {
    let val: u16 = s.parse().map_err(|e| format!("{e}"))?;
    if val == 0 {
        return Err("port must be between 1 and 65535".to_string());
    }
    Ok(val)
}

#[derive(Debug, Parser)]
#[command(
    name = "clamgate",
    about = "HTTP and gRPC gateway for ClamAV scanning",
    version
)]
pub struct Cli {
    /// Path to the clamd unix socket
    #[arg(long, env = "CLAMGATE_SOCKET", default_value = "/run/clamav/clamd.ctl")]
    pub socket: PathBuf,

    /// Maximum scannable payload size in bytes
    #[arg(long, env = "CLAMGATE_MAX_SIZE", default_value_t = 209_715_200,
          value_parser = positive_u64)]
    pub max_size: u64,

    /// Per-scan timeout in seconds
    #[arg(long, env = "CLAMGATE_SCAN_TIMEOUT", default_value_t = 300,
          value_parser = positive_u64)]
    pub scan_timeout: u64,

    /// Bind host for both listeners
    #[arg(long, env = "CLAMGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP listener port
    #[arg(long, env = "CLAMGATE_HTTP_PORT", default_value_t = 6000,
          value_parser = nonzero_port)]
    pub http_port: u16,

    /// gRPC listener port
    #[arg(long, env = "CLAMGATE_GRPC_PORT", default_value_t = 9000,
          value_parser = nonzero_port)]
    pub grpc_port: u16,

    /// Serve the gRPC transport alongside HTTP (true/false)
    #[arg(long, env = "CLAMGATE_ENABLE_GRPC", default_value_t = true,
          action = clap::ArgAction::Set)]
    pub enable_grpc: bool,
}

impl Cli {
    /// Runtime configuration from the parsed arguments.
    #[must_use]
    pub fn into_config(self) -> Config {
        Config {
            socket: self.socket,
            max_size: self.max_size,
            scan_timeout: Duration::from_secs(self.scan_timeout),
            host: self.host,
            http_port: self.http_port,
            grpc_port: self.grpc_port,
            enable_grpc: self.enable_grpc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_config() {
        let config = Cli::parse_from(["clamgate"]).into_config();
        assert_eq!(config.socket, PathBuf::from("/run/clamav/clamd.ctl"));
        assert_eq!(config.max_size, 209_715_200);
        assert_eq!(config.scan_timeout, Duration::from_secs(300));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.http_port, 6000);
        assert_eq!(config.grpc_port, 9000);
        assert!(config.enable_grpc);
    }

    #[test]
    fn grpc_can_be_disabled() {
        let cli = Cli::parse_from(["clamgate", "--enable-grpc", "false"]);
        assert!(!cli.enable_grpc);
    }

    #[test]
    fn zero_values_rejected() {
        assert!(Cli::try_parse_from(["clamgate", "--max-size", "0"]).is_err());
        assert!(Cli::try_parse_from(["clamgate", "--scan-timeout", "0"]).is_err());
        assert!(Cli::try_parse_from(["clamgate", "--http-port", "0"]).is_err());
        assert!(Cli::try_parse_from(["clamgate", "--grpc-port", "0"]).is_err());
    }

    #[test]
    fn parsers_accept_bounds() {
        assert_eq!(positive_u64("1"), Ok(1));
        assert!(positive_u64("-5").is_err());
        assert_eq!(nonzero_port("65535"), Ok(65535));
        assert!(nonzero_port("65536").is_err());
    }
}
