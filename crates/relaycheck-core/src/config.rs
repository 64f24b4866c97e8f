//! relaycheck.toml configuration parser.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! A script-style argument string (`timeout=3000&cache=true`) can be
//! layered on top with [`CheckConfig::apply_arguments`].

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use http::{HeaderValue, Method, Uri};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_URL: &str = "http://connectivitycheck.platform.hicloud.com/generate_204";
pub const DEFAULT_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3.1 Mobile/15E148 Safari/604.1";
pub const DEFAULT_STATUS: &str = "204";
/// 48 hours.
pub const DEFAULT_CACHE_TTL_MS: u64 = 48 * 3600 * 1000;

/// HTTP method used for probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Head,
    Get,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Get => "get",
        }
    }

    pub fn to_http(self) -> Method {
        match self {
            Self::Head => Method::HEAD,
            Self::Get => Method::GET,
        }
    }
}

impl FromStr for ProbeMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "head" => Ok(Self::Head),
            "get" => Ok(Self::Get),
            _ => Err(ConfigError::InvalidValue {
                key: "method".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Per-attempt request timeout in milliseconds.
    pub timeout: u64,
    /// Extra attempts after the first transport failure.
    pub retries: u32,
    /// Base backoff unit in milliseconds; the n-th retry waits `n * retry_delay`.
    pub retry_delay: u64,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    pub url: String,
    pub ua: String,
    /// Regular expression matched against the numeric response status.
    pub status: String,
    pub method: ProbeMethod,
    pub show_latency: bool,
    pub keep_incompatible: bool,
    pub cache: bool,
    #[serde(alias = "ignore_failed_error")]
    pub disable_failed_cache: bool,
    /// Cache entry lifetime in milliseconds.
    pub cache_ttl: u64,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Display name of the collection being checked, used in notifications.
    pub source_name: Option<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            timeout: 5000,
            retries: 1,
            retry_delay: 1000,
            concurrency: 10,
            url: DEFAULT_URL.to_string(),
            ua: DEFAULT_UA.to_string(),
            status: DEFAULT_STATUS.to_string(),
            method: ProbeMethod::Head,
            show_latency: false,
            keep_incompatible: false,
            cache: false,
            disable_failed_cache: false,
            cache_ttl: DEFAULT_CACHE_TTL_MS,
            telegram_bot_token: None,
            telegram_chat_id: None,
            source_name: None,
        }
    }
}

/// Where failure notifications are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramTarget {
    pub bot_token: String,
    pub chat_id: String,
}

/// Validated, ready-to-use probe parameters.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub url: Uri,
    pub method: ProbeMethod,
    pub user_agent: HeaderValue,
    pub status: Regex,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub concurrency: usize,
    pub show_latency: bool,
    pub keep_incompatible: bool,
    pub cache: bool,
    pub disable_failed_cache: bool,
    pub cache_ttl: Duration,
    pub telegram: Option<TelegramTarget>,
    pub source_name: String,
}

impl CheckConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Layer a `key=value&key=value` argument string over this config.
    ///
    /// Values are percent-decoded; a literal `+` is kept as is rather than
    /// read as a space. A key without a value sets a boolean option.
    /// Returns the keys that were not recognised.
    pub fn apply_arguments(&mut self, args: &str) -> Result<Vec<String>, ConfigError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&args.replace('+', "%2B"))?;
        let mut unknown = Vec::new();

        for (key, value) in pairs {
            match key.as_str() {
                "timeout" => self.timeout = parse_number(&key, &value)?,
                "retries" => self.retries = parse_number(&key, &value)?,
                "retry_delay" => self.retry_delay = parse_number(&key, &value)?,
                "concurrency" => self.concurrency = parse_number(&key, &value)?,
                "url" => self.url = value,
                "ua" => self.ua = value,
                "status" => self.status = value,
                "method" => self.method = value.parse()?,
                "show_latency" => self.show_latency = parse_flag(&key, &value)?,
                "keep_incompatible" => self.keep_incompatible = parse_flag(&key, &value)?,
                "cache" => self.cache = parse_flag(&key, &value)?,
                "disable_failed_cache" | "ignore_failed_error" => {
                    self.disable_failed_cache = parse_flag(&key, &value)?
                }
                "cache_ttl" => self.cache_ttl = parse_number(&key, &value)?,
                "telegram_bot_token" => self.telegram_bot_token = non_empty(value),
                "telegram_chat_id" => self.telegram_chat_id = non_empty(value),
                "source_name" => self.source_name = non_empty(value),
                _ => unknown.push(key),
            }
        }

        Ok(unknown)
    }

    /// Check the configuration and compile it into [`ProbeSettings`].
    pub fn validate(&self) -> Result<ProbeSettings, ConfigError> {
        let url: Uri = self
            .url
            .parse()
            .map_err(|_| ConfigError::InvalidUrl(self.url.clone()))?;
        let scheme_ok = matches!(url.scheme_str(), Some("http") | Some("https"));
        if !scheme_ok || url.host().is_none() {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        let status = Regex::new(&self.status)?;

        let user_agent =
            HeaderValue::from_str(&self.ua).map_err(|_| ConfigError::InvalidValue {
                key: "ua".to_string(),
                value: self.ua.clone(),
            })?;

        let telegram = match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramTarget {
                bot_token: bot_token.clone(),
                chat_id: chat_id.clone(),
            }),
            _ => None,
        };

        Ok(ProbeSettings {
            url,
            method: self.method,
            user_agent,
            status,
            timeout: Duration::from_millis(self.timeout),
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay),
            concurrency: self.concurrency,
            show_latency: self.show_latency,
            keep_incompatible: self.keep_incompatible,
            cache: self.cache,
            disable_failed_cache: self.disable_failed_cache,
            cache_ttl: Duration::from_millis(self.cache_ttl),
            telegram,
            source_name: self.source_name.clone().unwrap_or_default(),
        })
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
