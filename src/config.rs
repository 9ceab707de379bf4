use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Process configuration, read once at startup from the environment.
///
/// Every replica and the proxy read the same variables; `INSTANCE_ID == 0`
/// marks the coordinator, which creates all shared artifacts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Replica instance id; instance 0 is the coordinator.
    pub instance_id: u32,
    /// Number of IPC slots / per-replica handler threads.
    pub workers: u32,
    /// Proxy I/O threads; must not exceed `workers`.
    pub io_workers: u32,
    /// Payment-processor threads per replica.
    pub handler_workers: u32,
    /// Directory holding the LMDB environment.
    pub database: PathBuf,
    /// Mapped size of the LMDB environment, in bytes.
    pub database_size: usize,
    pub listen_address: String,
    pub processor_default_address: String,
    pub processor_fallback_address: String,
}

fn read_env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn read_env_parsed<T: std::str::FromStr>(name: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    read_env(name, default)
        .parse::<T>()
        .with_context(|| format!("invalid value for {name}"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let default_io_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .to_string();

        let config = Self {
            instance_id: read_env_parsed("INSTANCE_ID", "0")?,
            workers: read_env_parsed("WORKERS", "8")?,
            io_workers: read_env_parsed("IO_WORKERS", &default_io_workers)?,
            handler_workers: read_env_parsed("HANDLER_WORKERS", "2")?,
            database: PathBuf::from(read_env("DATABASE", "/data/database")),
            database_size: read_env_parsed("DATABASE_SIZE", "10485760")?,
            listen_address: read_env("LISTEN_ADDRESS", "0.0.0.0:8080"),
            processor_default_address: read_env(
                "PROCESSOR_DEFAULT_ADDRESS",
                "payment-processor-default:8080",
            ),
            processor_fallback_address: read_env(
                "PROCESSOR_FALLBACK_ADDRESS",
                "payment-processor-fallback:8080",
            ),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn coordinator(&self) -> bool {
        self.instance_id == 0
    }

    /// Validate configuration at startup.
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("Invalid WORKERS: must be > 0");
        }

        if self.io_workers == 0 {
            bail!("Invalid IO_WORKERS: must be > 0");
        }

        if self.io_workers > self.workers {
            bail!(
                "Invalid IO_WORKERS: {} exceeds the {} IPC slots (WORKERS)",
                self.io_workers,
                self.workers
            );
        }

        if self.handler_workers == 0 {
            bail!("Invalid HANDLER_WORKERS: must be > 0");
        }

        if self.database_size == 0 {
            bail!("Invalid DATABASE_SIZE: must be > 0");
        }

        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let (host, port) = parse_host_port(&self.listen_address, 8080)
            .context("Invalid LISTEN_ADDRESS")?;
        (host.as_str(), port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", self.listen_address))?
            .next()
            .with_context(|| format!("no address for {}", self.listen_address))
    }
}

/// Split `host[:port]`, applying `default_port` when the port is absent.
pub fn parse_host_port(host_port: &str, default_port: u16) -> Result<(String, u16)> {
    match host_port.rsplit_once(':') {
        None => Ok((host_port.to_string(), default_port)),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid port in {host_port}"))?;
            Ok((host.to_string(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            instance_id: 0,
            workers: 8,
            io_workers: 4,
            handler_workers: 2,
            database: PathBuf::from("/tmp/payrail-test"),
            database_size: 10 * 1024 * 1024,
            listen_address: "127.0.0.1:9999".to_string(),
            processor_default_address: "localhost:8001".to_string(),
            processor_fallback_address: "localhost:8002".to_string(),
        }
    }

    #[test]
    fn validate_accepts_sane_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = test_config();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_io_workers_above_slots() {
        let mut config = test_config();
        config.io_workers = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_listen_address() {
        let mut config = test_config();
        config.listen_address = "0.0.0.0:notaport".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_host_port_with_and_without_port() {
        assert_eq!(
            parse_host_port("localhost:9001", 8080).unwrap(),
            ("localhost".to_string(), 9001)
        );
        assert_eq!(
            parse_host_port("payment-processor-default", 8080).unwrap(),
            ("payment-processor-default".to_string(), 8080)
        );
        assert!(parse_host_port("host:badport", 8080).is_err());
    }

    #[test]
    fn instance_zero_is_coordinator() {
        let mut config = test_config();
        assert!(config.coordinator());
        config.instance_id = 1;
        assert!(!config.coordinator());
    }
}
