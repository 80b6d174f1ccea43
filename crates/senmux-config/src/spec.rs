use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectionSpec {
    In,
    Out,
    Both,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumSpec {
    No,
    Strict,
    Loose,
    Add,
    #[serde(rename = "addonly")]
    AddOnly,
}

impl Default for ChecksumSpec {
    fn default() -> Self {
        Self::Strict
    }
}

fn default_true() -> bool {
    true
}

fn default_queue_size() -> usize {
    senmux_core::DEFAULT_QUEUE_SIZE
}

/// Shared framing/filtering options every transport kind accepts.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonOptions {
    #[serde(default)]
    pub direction: Option<DirectionSpec>,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub nocr: bool,
    #[serde(default)]
    pub checksum: ChecksumSpec,
    #[serde(default)]
    pub loopback: bool,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Rule-string grammar: `<sign><tag>[:<sign><tag>...]` or `all`. See
    /// [`crate::rules::parse_filter_spec`].
    #[serde(default)]
    pub filter: Option<String>,
    /// Failover-spec grammar: `<tag>:<failtime>:<source>[:<failtime>:<source>...]`.
    /// See [`crate::rules::parse_failover_spec`].
    #[serde(default)]
    pub failover: Option<String>,
    #[serde(with = "humantime_serde_opt", default)]
    pub heartbeat: Option<std::time::Duration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InterfaceSpec {
    TcpClient {
        name: String,
        addr: String,
        #[serde(default)]
        persist: bool,
        #[serde(with = "humantime_serde", default = "default_retry")]
        retry_interval: std::time::Duration,
        #[serde(default)]
        preamble: Option<String>,
        #[serde(flatten)]
        common: CommonOptions,
    },
    TcpServer {
        name: String,
        bind: String,
        #[serde(flatten)]
        common: CommonOptions,
    },
    Udp {
        name: String,
        bind: String,
        #[serde(default)]
        send_to: Option<String>,
        #[serde(default)]
        broadcast: bool,
        #[serde(default)]
        multicast_group: Option<String>,
        #[serde(flatten)]
        common: CommonOptions,
    },
    File {
        name: String,
        path: PathBuf,
        #[serde(default)]
        persist: bool,
        #[serde(flatten)]
        common: CommonOptions,
    },
    Serial {
        name: String,
        path: PathBuf,
        #[serde(default = "default_baud")]
        baud: u32,
        #[serde(flatten)]
        common: CommonOptions,
    },
    Pty {
        name: String,
        #[serde(default)]
        symlink: Option<PathBuf>,
        #[serde(flatten)]
        common: CommonOptions,
    },
    Seatalk {
        name: String,
        path: PathBuf,
    },
    Discovery {
        name: String,
        #[serde(flatten)]
        common: CommonOptions,
    },
}

impl InterfaceSpec {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::TcpClient { name, .. }
            | Self::TcpServer { name, .. }
            | Self::Udp { name, .. }
            | Self::File { name, .. }
            | Self::Serial { name, .. }
            | Self::Pty { name, .. }
            | Self::Seatalk { name, .. }
            | Self::Discovery { name, .. } => name,
        }
    }
}

fn default_retry() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}

fn default_baud() -> u32 {
    4_800
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(with = "humantime_serde_opt", default)]
    pub shutdown_grace: Option<std::time::Duration>,
    /// Failover-spec grammar (one entry per tag), evaluated by the engine
    /// against the multiplexed stream before fan-out. See
    /// [`crate::rules::parse_failover_spec`].
    #[serde(default)]
    pub failover: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub interface: Vec<InterfaceSpec>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_tcp_client() {
        let toml = r#"
            [[interface]]
            type = "tcp-client"
            name = "chartplotter"
            addr = "192.168.1.50:10110"
            persist = true
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.interface.len(), 1);
        assert_eq!(cfg.interface[0].name(), "chartplotter");
    }

    #[test]
    fn parses_global_shutdown_grace() {
        let toml = r#"
            [global]
            shutdown_grace = "3s"
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.global.shutdown_grace, Some(std::time::Duration::from_secs(3)));
    }
}
