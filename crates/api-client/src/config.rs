use std::{env, time::Duration};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Transport timeout for every request, uploads included
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("PHARMACY_API_BASE_URL").unwrap_or(DEFAULT_BASE_URL.to_string());

        let token = lookup("PHARMACY_API_TOKEN").filter(|token| !token.trim().is_empty());

        let timeout_secs = lookup("PHARMACY_API_TIMEOUT_SECS")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            base_url,
            token,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}
