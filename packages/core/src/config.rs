use std::env;
use std::fmt;

use chrono::Duration;

use crate::alerts::email::{SmtpSettings, SmtpTls};
use crate::cli::Cli;
use crate::ingest::config::DedupPolicy;
use crate::services::gemini::DEFAULT_GEMINI_URL;
use crate::services::news::DEFAULT_NEWS_URL;
use crate::services::weather::DEFAULT_WEATHER_URL;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub locations: Vec<String>,
    pub poll_interval_seconds: u64,
    pub server_port: u16,
    pub weather_url: String,
    pub weather_api_key: Option<String>,
    pub news_url: String,
    pub news_api_key: Option<String>,
    pub gemini_url: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_fast_model: String,
    pub dedup: DedupPolicy,
    pub summary_cache_seconds: u64,
    /// `None` disables e-mail notifications.
    pub smtp: Option<SmtpSettings>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let gemini_api_key = get("GEMINI_API_KEY").ok_or("GEMINI_API_KEY is required")?;

        let locations = match get("LOCATIONS") {
            Some(list) => split_locations(&list),
            None => vec![get("DEFAULT_LOCATION").unwrap_or_else(|| "New York".to_string())],
        };
        if locations.is_empty() {
            return Err("LOCATIONS must name at least one location".to_string());
        }

        let poll_interval_seconds = parse_or(get("POLL_INTERVAL_SECONDS"), "POLL_INTERVAL_SECONDS", 600u64)?;
        if poll_interval_seconds == 0 {
            return Err("POLL_INTERVAL_SECONDS must be greater than zero".to_string());
        }

        let dedup_hours = parse_or(get("DEDUP_WINDOW_HOURS"), "DEDUP_WINDOW_HOURS", 24i64)?;
        let dedup_window = Duration::try_hours(dedup_hours.max(1))
            .ok_or_else(|| format!("DEDUP_WINDOW_HOURS is out of range: {}", dedup_hours))?;
        let case_insensitive = match get("DEDUP_CASE_INSENSITIVE") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| format!("DEDUP_CASE_INSENSITIVE must be true or false, got '{}'", raw))?,
            None => true,
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => {
                let tls = match get("SMTP_TLS") {
                    Some(raw) => raw.parse::<SmtpTls>()?,
                    None => SmtpTls::StartTls,
                };
                let default_port = match tls {
                    SmtpTls::Wrapper => 465,
                    SmtpTls::StartTls => 587,
                    SmtpTls::None => 25,
                };
                Some(SmtpSettings {
                    host,
                    port: parse_or(get("SMTP_PORT"), "SMTP_PORT", default_port)?,
                    username: get("SMTP_USERNAME"),
                    password: get("SMTP_PASSWORD"),
                    from: get("SMTP_FROM")
                        .unwrap_or_else(|| "CityGuard <alerts@cityguard.local>".to_string()),
                    tls,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://cityguard.db".to_string()),
            locations,
            poll_interval_seconds,
            server_port: parse_or(get("SERVER_PORT"), "SERVER_PORT", 5000u16)?,
            weather_url: get("OPENWEATHERMAP_URL").unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            weather_api_key: get("OPENWEATHERMAP_API_KEY"),
            news_url: get("NEWS_API_URL").unwrap_or_else(|| DEFAULT_NEWS_URL.to_string()),
            news_api_key: get("NEWS_API_KEY"),
            gemini_url: get("GEMINI_API_URL").unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-pro".to_string()),
            gemini_fast_model: get("GEMINI_FAST_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            dedup: DedupPolicy {
                window: dedup_window,
                case_insensitive,
            },
            summary_cache_seconds: parse_or(get("SUMMARY_CACHE_SECONDS"), "SUMMARY_CACHE_SECONDS", 300u64)?,
            smtp,
        })
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), String> {
        if let Some(list) = &cli.locations {
            let locations = split_locations(list);
            if locations.is_empty() {
                return Err("--locations must name at least one location".to_string());
            }
            self.locations = locations;
        }
        if let Some(seconds) = cli.poll_interval {
            if seconds == 0 {
                return Err("--poll-interval must be greater than zero".to_string());
            }
            self.poll_interval_seconds = seconds;
        }
        if let Some(port) = cli.port {
            self.server_port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        Ok(())
    }
}

// API keys and SMTP credentials stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("locations", &self.locations)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("server_port", &self.server_port)
            .field("weather_enabled", &self.weather_api_key.is_some())
            .field("news_enabled", &self.news_api_key.is_some())
            .field("gemini_model", &self.gemini_model)
            .field("gemini_fast_model", &self.gemini_fast_model)
            .field("dedup", &self.dedup)
            .field("smtp_host", &self.smtp.as_ref().map(|s| s.host.as_str()))
            .finish()
    }
}

fn split_locations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, String> {
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number, got '{}'", key, value)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
