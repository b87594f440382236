use gridworker_core::error::ConfigError;
use rand::Rng;

/// Dashboard server configuration loaded from environment variables.
///
/// The worker itself is configured separately through
/// [`gridworker_core::config::WorkerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `127.0.0.1`).
    pub host: String,
    /// Bind port (default: `7861`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Token required on `/api/v1` routes. When unset the binary generates
    /// one at startup and logs it.
    pub dashboard_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `127.0.0.1`                |
    /// | `PORT`                 | `7861`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:7861`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `DASHBOARD_TOKEN`      | generated at startup       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = get("HOST").unwrap_or_else(|| "127.0.0.1".into());

        let port: u16 = get("PORT")
            .unwrap_or_else(|| "7861".into())
            .parse()
            .map_err(|_| ConfigError::invalid("PORT", "must be a valid u16"))?;

        let cors_origins: Vec<String> = get("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:7861".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = get("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".into())
            .parse()
            .map_err(|_| ConfigError::invalid("REQUEST_TIMEOUT_SECS", "must be a valid u64"))?;

        let dashboard_token = get("DASHBOARD_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            dashboard_token,
        })
    }
}

/// Random 32-character hex token for a dashboard without `DASHBOARD_TOKEN`.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_bind_locally() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7861);
        assert_eq!(config.cors_origins, vec!["http://localhost:7861"]);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.dashboard_token, None);
    }

    #[test]
    fn blank_token_counts_as_unset() {
        let config = ServerConfig::from_lookup(lookup(&[("DASHBOARD_TOKEN", "  ")])).unwrap();
        assert_eq!(config.dashboard_token, None);
        let config = ServerConfig::from_lookup(lookup(&[("DASHBOARD_TOKEN", "s3cret")])).unwrap();
        assert_eq!(config.dashboard_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn generated_tokens_are_hex_and_distinct() {
        let a = generate_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, generate_token());
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config =
            ServerConfig::from_lookup(lookup(&[("CORS_ORIGINS", "http://a.test, ,http://b.test")]))
                .unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "seventy")])).unwrap_err();
        assert_eq!(err, ConfigError::invalid("PORT", "must be a valid u16"));
    }
}
