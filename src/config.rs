use std::time::Duration;

use crate::{Error, Result};

pub const DEFAULT_MODEL_NAME: &str = "computer-use-preview";
pub const DEFAULT_VISION_MODEL_NAME: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2025-03-01-preview";
pub const DEFAULT_WEB_CRAWL_URL: &str = "https://in.pinterest.com/ideas";
pub const DEFAULT_MAX_PAGES: usize = 5;

/// Timing knobs for polling and page readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Screenshot/model rounds before the confirmation loop gives up.
    pub confirm_attempts: u32,
    /// Pause between unconfirmed rounds.
    pub confirm_interval: Duration,
    /// Upper bound for a page to report itself ready.
    pub ready_timeout: Duration,
    /// Extra pause once the page is ready, for late-rendering content.
    pub settle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No waiting at all; for scripted runs.
    pub fn immediate() -> Self {
        Self {
            confirm_attempts: 10,
            confirm_interval: Duration::ZERO,
            ready_timeout: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

/// Settings for one compilation run.
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub model_name: String,
    pub vision_model_name: String,
    pub web_crawl_url: String,
    pub max_pages_for_crawling: usize,
    pub display_width: u32,
    pub display_height: u32,
    pub blocked_domains: Vec<String>,
    pub pacing: Pacing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            vision_model_name: DEFAULT_VISION_MODEL_NAME.to_string(),
            web_crawl_url: DEFAULT_WEB_CRAWL_URL.to_string(),
            max_pages_for_crawling: DEFAULT_MAX_PAGES,
            display_width: 1024,
            display_height: 768,
            blocked_domains: Vec::new(),
            pacing: Pacing::default(),
        }
    }
}

impl Config {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };
        let defaults = Config::default();
        let pacing = Pacing::default();

        Ok(Self {
            endpoint: get(&["AZURE_OPENAI_ENDPOINT"]).unwrap_or_default(),
            api_key: get(&["AZURE_OPENAI_API_KEY", "OPENAI_API_KEY"]).unwrap_or_default(),
            api_version: get(&["AZURE_API_VERSION"]).unwrap_or(defaults.api_version),
            model_name: get(&["MODEL_NAME"]).unwrap_or(defaults.model_name),
            vision_model_name: get(&["VISION_MODEL_NAME"]).unwrap_or(defaults.vision_model_name),
            web_crawl_url: get(&["WEB_CRAWL_URL", "web_crawl_url"])
                .unwrap_or(defaults.web_crawl_url),
            max_pages_for_crawling: parse_or(
                get(&["MAX_PAGES_FOR_CRAWLING", "max_pages_for_crawling"]),
                "MAX_PAGES_FOR_CRAWLING",
                defaults.max_pages_for_crawling,
            )?,
            display_width: parse_or(
                get(&["DISPLAY_WIDTH"]),
                "DISPLAY_WIDTH",
                defaults.display_width,
            )?,
            display_height: parse_or(
                get(&["DISPLAY_HEIGHT"]),
                "DISPLAY_HEIGHT",
                defaults.display_height,
            )?,
            blocked_domains: get(&["BLOCKED_DOMAINS"])
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            pacing: Pacing {
                confirm_attempts: parse_or(
                    get(&["CONFIRM_MAX_ATTEMPTS"]),
                    "CONFIRM_MAX_ATTEMPTS",
                    pacing.confirm_attempts,
                )?,
                confirm_interval: millis_or(
                    get(&["CONFIRM_INTERVAL_MS"]),
                    "CONFIRM_INTERVAL_MS",
                    pacing.confirm_interval,
                )?,
                ready_timeout: millis_or(
                    get(&["PAGE_READY_TIMEOUT_MS"]),
                    "PAGE_READY_TIMEOUT_MS",
                    pacing.ready_timeout,
                )?,
                settle: millis_or(get(&["SETTLE_MS"]), "SETTLE_MS", pacing.settle)?,
            },
        })
    }

    /// Fail fast on missing required values, listing all of them.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("AZURE_OPENAI_ENDPOINT", &self.endpoint),
            ("AZURE_OPENAI_API_KEY", &self.api_key),
            ("MODEL_NAME", &self.model_name),
            ("AZURE_API_VERSION", &self.api_version),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingConfig(missing));
        }
        if self.pacing.confirm_attempts == 0 {
            return Err(Error::Config("CONFIRM_MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.display_width == 0 || self.display_height == 0 {
            return Err(Error::Config("display dimensions must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{name} is not a valid number: '{raw}'"))),
        None => Ok(default),
    }
}

fn millis_or(value: Option<String>, name: &str, default: Duration) -> Result<Duration> {
    parse_or(value, name, default.as_millis() as u64).map(Duration::from_millis)
}
