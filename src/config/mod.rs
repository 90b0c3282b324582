//! Server configuration.
//!
//! Loaded from TOML once at startup and snapshot behind an `Arc`; REHASH
//! builds a fresh snapshot and swaps it atomically, so a handler observes one
//! consistent configuration for the duration of a command.

mod defaults;
mod types;
mod validation;

pub use types::{
    ChannelDbConfig, ClassConfig, LimitsConfig, ListenConfig, LogFormat, MotdConfig, OperBlock,
    ServerConfig, XLineConfig,
};
pub use validation::validate;

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ConfigError;
use ember_proto::{wildcard, Casemap};

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub listen: Vec<ListenConfig>,
    #[serde(default)]
    pub class: Vec<ClassConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub xline: XLineConfig,
    #[serde(default)]
    pub channeldb: ChannelDbConfig,
    #[serde(default)]
    pub motd: MotdConfig,
    #[serde(default)]
    pub oper: Vec<OperBlock>,
}

impl Config {
    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse configuration text. Split out so tests can feed literals.
    pub fn parse(text: &str, path: &str) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        if config.class.is_empty() {
            config.class.push(ClassConfig::default());
        }
        Ok(config)
    }

    /// The active casemap.
    pub fn casemap(&self) -> Casemap {
        Casemap::from_name(&self.server.casemap).unwrap_or_default()
    }

    /// Pick the connect class for an incoming connection by address and
    /// local port. First match wins; the last class acts as catch-all when
    /// its pattern list matches everything.
    pub fn find_class(&self, ip: IpAddr, port: u16) -> Arc<ClassConfig> {
        let ip_text = ip.to_string();
        for class in &self.class {
            if let Some(spec) = &class.ports {
                match ember_proto::parse_ports(spec, false) {
                    Ok(ports) if ports.contains(&port) => {}
                    _ => continue,
                }
            }
            if class
                .hosts
                .iter()
                .any(|pat| wildcard::matches(pat, &ip_text, Casemap::Ascii))
            {
                return Arc::new(class.clone());
            }
        }
        Arc::new(ClassConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        name = "irc.example.net"
        sid = "001"
        network = "EmberNet"
        description = "test server"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::parse(MINIMAL, "test").unwrap();
        assert_eq!(config.server.name, "irc.example.net");
        assert_eq!(config.casemap(), Casemap::Rfc1459);
        assert_eq!(config.limits.max_line, 512);
        assert_eq!(config.class.len(), 1);
        assert_eq!(config.xline.save_interval_secs, 30);
    }

    #[test]
    fn class_selection_by_pattern() {
        let text = format!(
            "{MINIMAL}
            [[class]]
            name = \"local\"
            hosts = [\"127.*\"]
            max_conns_per_ip = 10

            [[class]]
            name = \"default\"
            hosts = [\"*\"]
            "
        );
        let config = Config::parse(&text, "test").unwrap();
        let local = config.find_class("127.0.0.1".parse().unwrap(), 6667);
        assert_eq!(local.name, "local");
        assert_eq!(local.max_conns_per_ip, 10);
        let other = config.find_class("192.0.2.9".parse().unwrap(), 6667);
        assert_eq!(other.name, "default");
    }

    #[test]
    fn class_selection_by_port_range() {
        let text = format!(
            "{MINIMAL}
            [[class]]
            name = \"tls-only\"
            hosts = [\"*\"]
            ports = \"6697,7000-7002\"

            [[class]]
            name = \"default\"
            hosts = [\"*\"]
            "
        );
        let config = Config::parse(&text, "test").unwrap();
        let ip: std::net::IpAddr = "192.0.2.9".parse().unwrap();
        assert_eq!(config.find_class(ip, 6697).name, "tls-only");
        assert_eq!(config.find_class(ip, 7001).name, "tls-only");
        assert_eq!(config.find_class(ip, 6667).name, "default");
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            Config::parse("[server", "test"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
