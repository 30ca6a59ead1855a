use std::str::FromStr;

use convo_store::StoreConfig;

use crate::error::SessionError;

pub const API_URL_VAR: &str = "CONVO_API_URL";
pub const ACCESS_TOKEN_VAR: &str = "CONVO_ACCESS_TOKEN";
pub const PAGE_SIZE_VAR: &str = "CONVO_PAGE_SIZE";
pub const SEEN_BUFFER_VAR: &str = "CONVO_SEEN_BUFFER";
pub const SEEN_MAX_AGE_VAR: &str = "CONVO_SEEN_MAX_AGE";
pub const LOAD_THRESHOLD_VAR: &str = "CONVO_LOAD_THRESHOLD";

/// Runtime settings for a session. Everything except the backend location
/// and the token has a default.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_url: Option<String>,
    pub access_token: Option<String>,
    pub store: StoreConfig,
}

impl SessionConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns the raw value of a variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SessionError> {
        let defaults = StoreConfig::default();
        let store = StoreConfig {
            page_size: parse_or(&lookup, PAGE_SIZE_VAR, defaults.page_size)?,
            seen_buffer_capacity: parse_or(&lookup, SEEN_BUFFER_VAR, defaults.seen_buffer_capacity)?,
            seen_buffer_max_age: parse_or(&lookup, SEEN_MAX_AGE_VAR, defaults.seen_buffer_max_age)?,
            load_more_threshold: parse_or(&lookup, LOAD_THRESHOLD_VAR, defaults.load_more_threshold)?,
            ..defaults
        };
        if store.page_size == 0 {
            return Err(SessionError::Config(format!("{} must be at least 1", PAGE_SIZE_VAR)));
        }

        Ok(Self {
            api_url: lookup(API_URL_VAR).filter(|v| !v.trim().is_empty()),
            access_token: lookup(ACCESS_TOKEN_VAR).filter(|v| !v.trim().is_empty()),
            store,
        })
    }

    /// Backend base URL and token, both required to talk HTTP.
    pub fn http_credentials(&self) -> Result<(&str, &str), SessionError> {
        let url = self
            .api_url
            .as_deref()
            .ok_or_else(|| SessionError::Config(format!("{} is not set", API_URL_VAR)))?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| SessionError::Config(format!("{} is not set", ACCESS_TOKEN_VAR)))?;
        Ok((url, token))
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, SessionError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SessionError::Config(format!("{} has invalid value {:?}", key, raw))),
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
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.store.page_size, 10);
        assert_eq!(config.store.seen_buffer_capacity, 64);
        assert!(config.api_url.is_none());
        assert!(config.http_credentials().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SessionConfig::from_lookup(lookup(&[
            (API_URL_VAR, "https://api.test/"),
            (ACCESS_TOKEN_VAR, "tok"),
            (PAGE_SIZE_VAR, " 25 "),
            (LOAD_THRESHOLD_VAR, "80"),
        ]))
        .unwrap();
        assert_eq!(config.store.page_size, 25);
        assert_eq!(config.store.load_more_threshold, 80.0);
        assert_eq!(config.http_credentials().unwrap(), ("https://api.test/", "tok"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(SessionConfig::from_lookup(lookup(&[(SEEN_BUFFER_VAR, "lots")])).is_err());
        assert!(SessionConfig::from_lookup(lookup(&[(PAGE_SIZE_VAR, "0")])).is_err());
    }
}
