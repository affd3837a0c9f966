use std::time::Duration;
use vigil_core::{Result, VigilError};

/// Connection settings for a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// `host:port` of the agent
    pub address: String,

    /// `http` or `https`
    pub scheme: String,

    /// Datacenter to query; the agent's own when unset
    pub datacenter: Option<String>,

    /// ACL token sent as `X-Consul-Token`
    pub token: Option<String>,

    /// Timeout of non-blocking requests, and the margin added on top of
    /// the wait time for blocking ones
    pub request_timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            datacenter: None,
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsulConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Defaults overridden by the variables the Consul CLI reads:
    /// `CONSUL_HTTP_ADDR` (optionally with a scheme prefix),
    /// `CONSUL_HTTP_SSL`, `CONSUL_HTTP_TOKEN`, plus `CONSUL_DATACENTER`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("CONSUL_HTTP_ADDR").filter(|v| !v.is_empty()) {
            match addr.split_once("://") {
                Some((scheme, address)) => {
                    config.scheme = scheme.to_string();
                    config.address = address.trim_end_matches('/').to_string();
                }
                None => config.address = addr,
            }
        }
        if let Some(ssl) = lookup("CONSUL_HTTP_SSL") {
            match ssl.to_ascii_lowercase().as_str() {
                "1" | "true" => config.scheme = "https".to_string(),
                "0" | "false" | "" => {}
                other => {
                    return Err(VigilError::config(format!(
                        "CONSUL_HTTP_SSL must be a boolean, got {:?}",
                        other
                    )))
                }
            }
        }
        config.token = lookup("CONSUL_HTTP_TOKEN").filter(|v| !v.is_empty());
        config.datacenter = lookup("CONSUL_DATACENTER").filter(|v| !v.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(VigilError::config(format!(
                "unsupported scheme {:?}",
                self.scheme
            )));
        }
        if self.address.is_empty() {
            return Err(VigilError::config("consul address is empty"));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConsulConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:8500");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ConsulConfig::from_lookup(lookup(&[
            ("CONSUL_HTTP_ADDR", "https://consul.service:8501/"),
            ("CONSUL_HTTP_TOKEN", "secret"),
            ("CONSUL_DATACENTER", "dc2"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "https://consul.service:8501");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.datacenter.as_deref(), Some("dc2"));
    }

    #[test]
    fn test_ssl_flag() {
        let config = ConsulConfig::from_lookup(lookup(&[
            ("CONSUL_HTTP_ADDR", "10.0.0.5:8501"),
            ("CONSUL_HTTP_SSL", "true"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "https://10.0.0.5:8501");

        assert!(ConsulConfig::from_lookup(lookup(&[("CONSUL_HTTP_SSL", "maybe")])).is_err());
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(ConsulConfig::default().with_scheme("ftp").validate().is_err());
    }
}
