use clap::Parser;

use crate::error::ConfigError;

/// Upstream master a replica syncs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddr {
    pub host: String,
    pub port: u16,
}

impl MasterAddr {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses the `"<host> <port>"` form taken by `--replicaof`.
pub fn parse_replica_of(raw: &str) -> Result<MasterAddr, ConfigError> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    match parts.as_slice() {
        [host, port] => port
            .parse::<u16>()
            .map(|port| MasterAddr {
                host: host.to_string(),
                port,
            })
            .map_err(|_| ConfigError::InvalidReplicaOf(raw.to_string())),
        _ => Err(ConfigError::InvalidReplicaOf(raw.to_string())),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "In-memory key-value store speaking RESP", long_about = None)]
pub struct ServerConfig {
    /// Host to listen on.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 3312)]
    pub port: u16,

    /// Master to replicate from, as "<host> <port>".
    #[arg(long = "replicaof", alias = "replica_of", value_parser = parse_replica_of)]
    pub replica_of: Option<MasterAddr>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            replica_of: None,
            log_level: "info".to_string(),
        }
    }

    pub fn replica_of(mut self, master: MasterAddr) -> Self {
        self.replica_of = Some(master);
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
