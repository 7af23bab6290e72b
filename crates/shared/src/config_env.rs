use std::env;

use crate::config::ConfigError;

pub(crate) fn require_non_empty_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_url_env(key: &str, default: &str) -> Result<String, ConfigError> {
    let value = optional_trimmed_env(key).unwrap_or_else(|| default.to_string());
    ensure_http_url(key, &value)?;
    Ok(value)
}

pub(crate) fn ensure_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::InvalidConfiguration(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
