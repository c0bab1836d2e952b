use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};

pub const BOT_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const VOICE_BASE_URL_VAR: &str = "VOICE_BASE_URL";
pub const MAX_CONCURRENT_ANSWERS_VAR: &str = "VOICE_MAX_CONCURRENT_ANSWERS";

/// Cap on every Bot API call made through the HTTP client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side wait for `getUpdates`; must stay below `REQUEST_TIMEOUT`.
const POLLING_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub voice: VoiceConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub request_timeout: Duration,
    pub polling_timeout: Duration,
}

// Keeps the token out of `{:?}` log lines.
impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("polling_timeout", &self.polling_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Base URL under which `greeting.ogg` is publicly reachable
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on inline-query handlers running at once
    pub max_concurrent_answers: usize,
}

fn default_max_concurrent_answers() -> usize {
    64
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through `lookup`, which maps a variable name to its value.
    ///
    /// Empty values count as missing. The error names every missing required variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let bot_token = read(BOT_TOKEN_VAR);
        let base_url = read(VOICE_BASE_URL_VAR);

        let (bot_token, base_url) = match (bot_token, base_url) {
            (Some(token), Some(url)) => (token, url),
            (token, url) => {
                let missing: Vec<&str> = [
                    (BOT_TOKEN_VAR, token.is_none()),
                    (VOICE_BASE_URL_VAR, url.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, is_missing)| is_missing.then_some(name))
                .collect();
                anyhow::bail!(
                    "Required environment variables not set: {}",
                    missing.join(", ")
                );
            }
        };

        let max_concurrent_answers = match read(MAX_CONCURRENT_ANSWERS_VAR) {
            Some(raw) => parse_positive(&raw).with_context(|| {
                format!("Invalid {}: '{}'", MAX_CONCURRENT_ANSWERS_VAR, raw)
            })?,
            None => default_max_concurrent_answers(),
        };

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                request_timeout: REQUEST_TIMEOUT,
                polling_timeout: POLLING_TIMEOUT,
            },
            voice: VoiceConfig { base_url },
            dispatch: DispatchConfig {
                max_concurrent_answers,
            },
        })
    }
}

fn parse_positive(raw: &str) -> Result<usize> {
    let value: usize = raw.trim().parse().context("not a whole number")?;
    if value == 0 {
        anyhow::bail!("must be at least 1");
    }
    Ok(value)
}
