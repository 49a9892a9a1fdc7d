//! Environment-driven configuration, in the style of the teacher's
//! `config::Config` (there it was a TOML file loaded once into a
//! `OnceCell`; here the relay's only configuration surface per spec §6 is
//! the environment, so we read it straight into a plain struct at
//! startup instead of introducing a file format nothing else needs).

use std::net::IpAddr;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            host: "0.0.0.0".parse().unwrap(),
            port: 3010,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let mut config = RelayConfig::default();
        if let Ok(host) = std::env::var("HOST") {
            if let Ok(parsed) = host.parse() {
                config.host = parsed;
            } else {
                tracing::warn!(%host, "HOST is not a valid IP address, keeping default");
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse() {
                config.port = parsed;
            } else {
                tracing::warn!(%port, "PORT is not a valid u16, keeping default");
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3010);
        assert_eq!(config.host.to_string(), "0.0.0.0");
    }
}
