use std::time::Duration;

use anyhow::Context;
use tracing::error;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/v1";
const DEFAULT_LANGUAGE: &str = "English";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Hosted backend project: identity, rooms/profiles tables, storage, realtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaasConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    /// `None` when the project URL or key is missing; auth, rooms and live
    /// updates are then unavailable.
    pub baas: Option<BaasConfig>,
    pub language: String,
    pub http_timeout: Duration,
    /// Restores a previous session at startup.
    pub refresh_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let baas = match (var("STUDYROOM_BAAS_URL"), var("STUDYROOM_BAAS_KEY")) {
            (Some(url), Some(anon_key)) => Some(BaasConfig { url, anon_key }),
            _ => {
                error!(
                    "STUDYROOM_BAAS_URL / STUDYROOM_BAAS_KEY not set; \
                     sign-in, rooms and live updates are disabled"
                );
                None
            }
        };

        let http_timeout = match var("STUDYROOM_HTTP_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse()
                .with_context(|| format!("STUDYROOM_HTTP_TIMEOUT_SECS is not a number: {secs}"))?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url: var("STUDYROOM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            baas,
            language: var("STUDYROOM_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.into()),
            http_timeout: Duration::from_secs(http_timeout),
            refresh_token: var("STUDYROOM_REFRESH_TOKEN"),
        })
    }
}
