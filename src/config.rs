// src/config.rs
use crate::errors::VigilError;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MAX_TOKENS: u32 = 4000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_MS: u64 = 90_000;
const DEFAULT_MAX_PAYLOAD: usize = 20 * 1024 * 1024;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;
const DEFAULT_PORT: u16 = 3001;

/// Everything the Gemini caller needs. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_base: String,
    pub model: String,
    pub api_keys: Vec<String>,
    pub max_output_tokens: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_keys: Vec::new(),
            max_output_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            backoff: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub gemini: GeminiSettings,
    pub max_payload_bytes: usize,
    pub fallback_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub development: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            gemini: GeminiSettings::default(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
            fallback_enabled: false,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            development: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, VigilError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, VigilError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();

        let api_keys = ["GEMINI_API_KEY", "GEMINI_API_KEY_2"]
            .into_iter()
            .filter_map(|key| get(key))
            .collect();

        let gemini = GeminiSettings {
            api_base: get("GEMINI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini.api_base),
            model: get("GEMINI_MODEL").unwrap_or(defaults.gemini.model),
            api_keys,
            max_output_tokens: parse_number(&get, "GEMINI_MAX_TOKENS")?
                .unwrap_or(defaults.gemini.max_output_tokens),
            max_retries: parse_number::<u32, _>(&get, "GEMINI_MAX_RETRIES")?
                .unwrap_or(defaults.gemini.max_retries)
                .max(1),
            timeout: parse_number(&get, "GEMINI_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.gemini.timeout),
            backoff: defaults.gemini.backoff,
        };

        let max_payload_bytes = match get("MAX_PAYLOAD") {
            Some(raw) => parse_size(&raw).ok_or_else(|| {
                VigilError::Configuration(format!("MAX_PAYLOAD is not a valid size: {}", raw))
            })?,
            None => defaults.max_payload_bytes,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_number(&get, "PORT")?.unwrap_or(defaults.port),
            gemini,
            max_payload_bytes,
            fallback_enabled: get("ENABLE_FALLBACK")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.fallback_enabled),
            rate_limit_per_minute: parse_number(&get, "RATE_LIMIT_PER_MINUTE")?
                .unwrap_or(defaults.rate_limit_per_minute),
            development: get("APP_ENV")
                .map(|v| v.eq_ignore_ascii_case("development"))
                .unwrap_or(defaults.development),
        })
    }
}

fn parse_number<T, G>(get: &G, key: &str) -> Result<Option<T>, VigilError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|_| {
                VigilError::Configuration(format!("{} is not a valid number: {}", key, raw))
            })
        })
        .transpose()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Parses sizes such as `20mb`, `512kb`, `1gb` or a plain byte count.
pub fn parse_size(raw: &str) -> Option<usize> {
    let lower = raw.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1)
    } else {
        (lower.as_str(), 1)
    };
    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, VigilError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.gemini.model, "gemini-1.5-pro");
        assert_eq!(config.gemini.max_output_tokens, 4000);
        assert_eq!(config.gemini.max_retries, 3);
        assert_eq!(config.gemini.timeout, Duration::from_millis(90_000));
        assert_eq!(config.max_payload_bytes, 20 * 1024 * 1024);
        assert!(!config.fallback_enabled);
        assert!(!config.development);
        assert!(config.gemini.api_keys.is_empty());
    }

    #[test]
    fn both_keys_in_order_and_blank_ignored() {
        let config = config_from(&[("GEMINI_API_KEY", "primary"), ("GEMINI_API_KEY_2", "secondary")])
            .unwrap();
        assert_eq!(config.gemini.api_keys, vec!["primary", "secondary"]);

        let config = config_from(&[("GEMINI_API_KEY", "  "), ("GEMINI_API_KEY_2", "secondary")])
            .unwrap();
        assert_eq!(config.gemini.api_keys, vec!["secondary"]);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("GEMINI_MODEL", "gemini-1.5-flash"),
            ("GEMINI_MAX_RETRIES", "5"),
            ("GEMINI_TIMEOUT_MS", "1500"),
            ("MAX_PAYLOAD", "2mb"),
            ("ENABLE_FALLBACK", "TRUE"),
            ("APP_ENV", "development"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.gemini.max_retries, 5);
        assert_eq!(config.gemini.timeout, Duration::from_millis(1500));
        assert_eq!(config.max_payload_bytes, 2 * 1024 * 1024);
        assert!(config.fallback_enabled);
        assert!(config.development);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn zero_retries_is_raised_to_one() {
        let config = config_from(&[("GEMINI_MAX_RETRIES", "0")]).unwrap();
        assert_eq!(config.gemini.max_retries, 1);
    }

    #[test]
    fn invalid_number_is_a_configuration_error() {
        let err = config_from(&[("GEMINI_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, VigilError::Configuration(_)));
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size("20mb"), Some(20 * 1024 * 1024));
        assert_eq!(parse_size("512KB"), Some(512 * 1024));
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("lots"), None);
    }
}
