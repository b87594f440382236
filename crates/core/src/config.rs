//! Worker configuration snapshot.
//!
//! A [`WorkerConfig`] is immutable once built. Changing anything means
//! building a new snapshot (usually via [`ConfigPatch::apply`]) and handing
//! it to the supervisor, which drains in-flight work before swapping.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_GRID_API_URL: &str = "https://api.aipowergrid.io/api";
pub const DEFAULT_WORKER_NAME: &str = "Text-Inference-Worker";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_URL: &str = "http://127.0.0.1:8000/v1";
pub const DEFAULT_MAX_THREADS: usize = 1;
pub const DEFAULT_MAX_LENGTH: u32 = 4096;
pub const DEFAULT_MAX_CONTEXT_LENGTH: u32 = 4096;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MAX_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Maximum length of a worker name.
const MAX_WORKER_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// BackendKind
// ---------------------------------------------------------------------------

/// Which wire protocol the local backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama's native API.
    Ollama,
    /// Any server exposing OpenAI-style `/chat/completions`.
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAi => "openai",
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openai" | "openai-compatible" => Ok(BackendKind::OpenAi),
            other => Err(ConfigError::invalid(
                "BACKEND_TYPE",
                format!("expected 'ollama' or 'openai', got '{other}'"),
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// One immutable configuration snapshot.
#[derive(Clone, PartialEq)]
pub struct WorkerConfig {
    pub grid_api_url: String,
    pub grid_api_key: String,
    pub worker_name: String,
    pub backend_kind: BackendKind,
    /// Base URL of the backend (`http://host:11434` for Ollama,
    /// `http://host:8000/v1` for OpenAI-compatible servers).
    pub backend_url: String,
    pub backend_api_key: Option<String>,
    pub model_name: String,
    /// Explicit name advertised to the Grid; derived when `None`.
    pub grid_model_name: Option<String>,
    pub max_length: u32,
    pub max_context_length: u32,
    /// Number of jobs served concurrently.
    pub max_threads: usize,
    pub nsfw: bool,
    pub wallet_address: Option<String>,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub backend_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                              |
    /// |---------------------------|--------------------------------------|
    /// | `GRID_API_URL`            | `https://api.aipowergrid.io/api`     |
    /// | `GRID_API_KEY`            | required                             |
    /// | `GRID_WORKER_NAME`        | `Text-Inference-Worker`              |
    /// | `GRID_NSFW`               | `true`                               |
    /// | `GRID_MAX_THREADS`        | `1`                                  |
    /// | `GRID_MAX_LENGTH`         | `4096`                               |
    /// | `GRID_MAX_CONTEXT_LENGTH` | `4096`                               |
    /// | `BACKEND_TYPE`            | `ollama`                             |
    /// | `OLLAMA_URL`              | `http://127.0.0.1:11434`             |
    /// | `OPENAI_URL`              | `http://127.0.0.1:8000/v1`           |
    /// | `OPENAI_API_KEY`          | unset                                |
    /// | `MODEL_NAME`              | required                             |
    /// | `GRID_MODEL_NAME`         | derived from backend and model       |
    /// | `WALLET_ADDRESS`          | unset                                |
    /// | `POLL_INTERVAL_SECS`      | `2`                                  |
    /// | `MAX_POLL_INTERVAL_SECS`  | `30`                                 |
    /// | `BACKEND_TIMEOUT_SECS`    | `120`                                |
    /// | `SHUTDOWN_GRACE_SECS`     | `30`                                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a snapshot from an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend_kind = match get("BACKEND_TYPE") {
            Some(v) => BackendKind::parse(&v)?,
            None => BackendKind::Ollama,
        };

        let backend_url = match backend_kind {
            BackendKind::Ollama => get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.into()),
            BackendKind::OpenAi => get("OPENAI_URL").unwrap_or_else(|| DEFAULT_OPENAI_URL.into()),
        };

        let config = Self {
            grid_api_url: get("GRID_API_URL").unwrap_or_else(|| DEFAULT_GRID_API_URL.into()),
            grid_api_key: get("GRID_API_KEY").unwrap_or_default(),
            worker_name: get("GRID_WORKER_NAME").unwrap_or_else(|| DEFAULT_WORKER_NAME.into()),
            backend_kind,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            backend_api_key: get("OPENAI_API_KEY"),
            model_name: get("MODEL_NAME").unwrap_or_default(),
            grid_model_name: get("GRID_MODEL_NAME"),
            max_length: parse_or("GRID_MAX_LENGTH", get("GRID_MAX_LENGTH"), DEFAULT_MAX_LENGTH)?,
            max_context_length: parse_or(
                "GRID_MAX_CONTEXT_LENGTH",
                get("GRID_MAX_CONTEXT_LENGTH"),
                DEFAULT_MAX_CONTEXT_LENGTH,
            )?,
            max_threads: parse_or("GRID_MAX_THREADS", get("GRID_MAX_THREADS"), DEFAULT_MAX_THREADS)?,
            nsfw: parse_bool("GRID_NSFW", get("GRID_NSFW"), true)?,
            wallet_address: get("WALLET_ADDRESS"),
            poll_interval: Duration::from_secs(parse_or(
                "POLL_INTERVAL_SECS",
                get("POLL_INTERVAL_SECS"),
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            max_poll_interval: Duration::from_secs(parse_or(
                "MAX_POLL_INTERVAL_SECS",
                get("MAX_POLL_INTERVAL_SECS"),
                DEFAULT_MAX_POLL_INTERVAL_SECS,
            )?),
            backend_timeout: Duration::from_secs(parse_or(
                "BACKEND_TIMEOUT_SECS",
                get("BACKEND_TIMEOUT_SECS"),
                DEFAULT_BACKEND_TIMEOUT_SECS,
            )?),
            shutdown_grace: Duration::from_secs(parse_or(
                "SHUTDOWN_GRACE_SECS",
                get("SHUTDOWN_GRACE_SECS"),
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the snapshot can be used to serve work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_api_key.is_empty() {
            return Err(ConfigError::Missing("GRID_API_KEY"));
        }
        if self.model_name.is_empty() {
            return Err(ConfigError::Missing("MODEL_NAME"));
        }
        if self.worker_name.is_empty() {
            return Err(ConfigError::Missing("GRID_WORKER_NAME"));
        }
        if self.worker_name.chars().count() > MAX_WORKER_NAME_LEN {
            return Err(ConfigError::invalid(
                "GRID_WORKER_NAME",
                format!("must not exceed {MAX_WORKER_NAME_LEN} characters"),
            ));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::invalid("GRID_MAX_THREADS", "must be at least 1"));
        }
        if self.max_length == 0 {
            return Err(ConfigError::invalid("GRID_MAX_LENGTH", "must be at least 1"));
        }
        if self.max_context_length == 0 {
            return Err(ConfigError::invalid(
                "GRID_MAX_CONTEXT_LENGTH",
                "must be at least 1",
            ));
        }
        for (field, url) in [
            ("GRID_API_URL", &self.grid_api_url),
            ("backend URL", &self.backend_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    field,
                    format!("'{url}' is not an http(s) URL"),
                ));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("POLL_INTERVAL_SECS", "must be at least 1"));
        }
        if self.poll_interval > self.max_poll_interval {
            return Err(ConfigError::invalid(
                "MAX_POLL_INTERVAL_SECS",
                "must not be smaller than POLL_INTERVAL_SECS",
            ));
        }
        if self.backend_timeout.is_zero() {
            return Err(ConfigError::invalid("BACKEND_TIMEOUT_SECS", "must be at least 1"));
        }
        Ok(())
    }

    /// The model name advertised to the Grid.
    ///
    /// An explicit `GRID_MODEL_NAME` wins; otherwise models served from
    /// api.openai.com are advertised as `openai/<model>` and everything
    /// else as `grid/<model>`.
    pub fn grid_model_name(&self) -> String {
        if let Some(name) = &self.grid_model_name {
            return name.clone();
        }
        let domain = match self.backend_kind {
            BackendKind::OpenAi if self.backend_url.to_ascii_lowercase().contains("openai.com") => {
                "openai"
            }
            _ => "grid",
        };
        format!("{domain}/{}", self.model_name)
    }

    /// A view of the snapshot that is safe to hand to the dashboard.
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            has_api_key: !self.grid_api_key.is_empty(),
            grid_api_url: self.grid_api_url.clone(),
            worker_name: self.worker_name.clone(),
            backend_type: self.backend_kind,
            backend_url: self.backend_url.clone(),
            model_name: self.model_name.clone(),
            grid_model_name: self.grid_model_name(),
            max_threads: self.max_threads,
            max_length: self.max_length,
            max_context_length: self.max_context_length,
            nsfw: self.nsfw,
            wallet_address: self.wallet_address.clone(),
        }
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("grid_api_url", &self.grid_api_url)
            .field("grid_api_key", &"<redacted>")
            .field("worker_name", &self.worker_name)
            .field("backend_kind", &self.backend_kind)
            .field("backend_url", &self.backend_url)
            .field("model_name", &self.model_name)
            .field("grid_model_name", &self.grid_model_name)
            .field("max_length", &self.max_length)
            .field("max_context_length", &self.max_context_length)
            .field("max_threads", &self.max_threads)
            .field("nsfw", &self.nsfw)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_interval", &self.max_poll_interval)
            .field("backend_timeout", &self.backend_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

/// Dashboard-facing configuration view. Never carries secrets.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfig {
    pub has_api_key: bool,
    pub grid_api_url: String,
    pub worker_name: String,
    pub backend_type: BackendKind,
    pub backend_url: String,
    pub model_name: String,
    pub grid_model_name: String,
    pub max_threads: usize,
    pub max_length: u32,
    pub max_context_length: u32,
    pub nsfw: bool,
    pub wallet_address: Option<String>,
}

// ---------------------------------------------------------------------------
// ConfigPatch
// ---------------------------------------------------------------------------

/// Partial update submitted by the dashboard.
///
/// Absent fields keep their current value. Empty strings clear the
/// optional string settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    pub grid_api_key: Option<String>,
    pub worker_name: Option<String>,
    pub backend_type: Option<BackendKind>,
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub model_name: Option<String>,
    pub grid_model_name: Option<String>,
    pub max_length: Option<u32>,
    pub max_context_length: Option<u32>,
    pub max_threads: Option<usize>,
    pub nsfw: Option<bool>,
    pub wallet_address: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

impl ConfigPatch {
    /// Build a new validated snapshot from `base` with this patch applied.
    pub fn apply(&self, base: &WorkerConfig) -> Result<WorkerConfig, ConfigError> {
        let mut next = base.clone();
        if let Some(v) = &self.grid_api_key {
            next.grid_api_key = v.trim().to_string();
        }
        if let Some(v) = &self.worker_name {
            next.worker_name = v.trim().to_string();
        }
        if let Some(v) = self.backend_type {
            next.backend_kind = v;
        }
        if let Some(v) = &self.backend_url {
            next.backend_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = &self.backend_api_key {
            next.backend_api_key = non_empty(v);
        }
        if let Some(v) = &self.model_name {
            next.model_name = v.trim().to_string();
        }
        if let Some(v) = &self.grid_model_name {
            next.grid_model_name = non_empty(v);
        }
        if let Some(v) = self.max_length {
            next.max_length = v;
        }
        if let Some(v) = self.max_context_length {
            next.max_context_length = v;
        }
        if let Some(v) = self.max_threads {
            next.max_threads = v;
        }
        if let Some(v) = self.nsfw {
            next.nsfw = v;
        }
        if let Some(v) = &self.wallet_address {
            next.wallet_address = non_empty(v);
        }
        if let Some(v) = self.poll_interval_secs {
            next.poll_interval = Duration::from_secs(v);
            next.max_poll_interval = next.max_poll_interval.max(next.poll_interval);
        }
        next.validate()?;
        Ok(next)
    }
}

// ---- private helpers ----

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_or<T: std::str::FromStr>(
    field: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::invalid(field, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(field: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::invalid(
            field,
            format!("'{other}' is not a boolean"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![("GRID_API_KEY", "secret"), ("MODEL_NAME", "llama3.2:3b")]
    }

    #[test]
    fn defaults_applied_when_unset() {
        let config = WorkerConfig::from_lookup(lookup(&minimal())).unwrap();
        assert_eq!(config.grid_api_url, DEFAULT_GRID_API_URL);
        assert_eq!(config.worker_name, DEFAULT_WORKER_NAME);
        assert_eq!(config.backend_kind, BackendKind::Ollama);
        assert_eq!(config.backend_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.max_threads, 1);
        assert_eq!(config.max_length, 4096);
        assert!(config.nsfw);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("MODEL_NAME", "m")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("GRID_API_KEY"));
    }

    #[test]
    fn missing_model_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("GRID_API_KEY", "k")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("MODEL_NAME"));
    }

    #[test]
    fn openai_backend_uses_openai_url() {
        let mut pairs = minimal();
        pairs.push(("BACKEND_TYPE", "openai"));
        pairs.push(("OPENAI_URL", "http://10.0.0.2:8000/v1/"));
        let config = WorkerConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.backend_kind, BackendKind::OpenAi);
        assert_eq!(config.backend_url, "http://10.0.0.2:8000/v1");
    }

    #[test]
    fn unknown_backend_type_is_invalid() {
        let mut pairs = minimal();
        pairs.push(("BACKEND_TYPE", "tgi"));
        let err = WorkerConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "BACKEND_TYPE", .. }));
    }

    #[test]
    fn unparsable_number_is_invalid() {
        let mut pairs = minimal();
        pairs.push(("GRID_MAX_THREADS", "lots"));
        let err = WorkerConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "GRID_MAX_THREADS", .. }));
    }

    #[test]
    fn zero_threads_is_invalid() {
        let mut pairs = minimal();
        pairs.push(("GRID_MAX_THREADS", "0"));
        assert!(WorkerConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn nsfw_parses_false() {
        let mut pairs = minimal();
        pairs.push(("GRID_NSFW", "False"));
        let config = WorkerConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(!config.nsfw);
    }

    #[test]
    fn grid_model_name_derivation() {
        let mut config = WorkerConfig::from_lookup(lookup(&minimal())).unwrap();
        assert_eq!(config.grid_model_name(), "grid/llama3.2:3b");

        config.backend_kind = BackendKind::OpenAi;
        config.backend_url = "https://api.openai.com/v1".into();
        config.model_name = "gpt-4o-mini".into();
        assert_eq!(config.grid_model_name(), "openai/gpt-4o-mini");

        config.grid_model_name = Some("custom/name".into());
        assert_eq!(config.grid_model_name(), "custom/name");
    }

    #[test]
    fn debug_output_redacts_key() {
        let config = WorkerConfig::from_lookup(lookup(&minimal())).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn patch_builds_new_snapshot() {
        let base = WorkerConfig::from_lookup(lookup(&minimal())).unwrap();
        let patch = ConfigPatch {
            max_threads: Some(4),
            wallet_address: Some("0xabc".into()),
            ..Default::default()
        };
        let next = patch.apply(&base).unwrap();
        assert_eq!(next.max_threads, 4);
        assert_eq!(next.wallet_address.as_deref(), Some("0xabc"));
        assert_eq!(base.max_threads, 1);
    }

    #[test]
    fn patch_rejects_invalid_result() {
        let base = WorkerConfig::from_lookup(lookup(&minimal())).unwrap();
        let patch = ConfigPatch {
            backend_url: Some("ftp://nope".into()),
            ..Default::default()
        };
        assert!(patch.apply(&base).is_err());
    }
}
