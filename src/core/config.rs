use std::env;

/// Bind configuration for [`crate::core::server::Server`] (`spec.md` §1a).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Reads `MODBUS_SIM_HOST` / `MODBUS_SIM_PORT`, falling back to
    /// [`Default`] for whichever is unset or unparsable.
    pub fn from_env() -> ServerConfig {
        let defaults = ServerConfig::default();
        let host = env::var("MODBUS_SIM_HOST").unwrap_or(defaults.host);
        let port = env::var("MODBUS_SIM_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        ServerConfig { host, port }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 502,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_binds_to_standard_port() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:502");
    }
}
