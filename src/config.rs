//! Configuration file support for stormwatch.
//!
//! Loads settings from `~/.config/stormwatch/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{
    ClientConfig, DEFAULT_USER_AGENT, IEM_BASE_URL, NHC_BASE_URL, NWS_BASE_URL, SPC_BASE_URL, SWPC_BASE_URL,
};
use crate::events::EventsConfig;
use crate::nws::DEFAULT_WARNING_EVENTS;
use crate::tracker::Horizons;

/// Age limits for remembered products.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HorizonsConfig {
    /// Watches older than this are never announced (human-readable, e.g., "24h").
    #[serde(deserialize_with = "deserialize_duration")]
    pub watch_age: Duration,

    /// Watch boxes and mesoscale discussions older than this are forgotten.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retention: Duration,

    /// Thunderstorm special weather statements are announced again after this.
    #[serde(deserialize_with = "deserialize_duration")]
    pub special_statement_refire: Duration,
}

impl Default for HorizonsConfig {
    fn default() -> Self {
        Self {
            watch_age: Duration::from_secs(24 * 3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            special_statement_refire: Duration::from_secs(6 * 3600),
        }
    }
}

impl HorizonsConfig {
    fn to_horizons(&self) -> Result<Horizons> {
        let convert = |name: &str, d: Duration| {
            chrono::Duration::from_std(d).with_context(|| format!("{} is out of range", name))
        };
        Ok(Horizons {
            watch_age: convert("watch_age", self.watch_age)?,
            retention: convert("retention", self.retention)?,
            special_statement_refire: convert("special_statement_refire", self.special_statement_refire)?,
        })
    }
}

/// Upstream service base URLs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub nws: String,
    pub spc: String,
    pub iem: String,
    pub swpc: String,
    pub nhc: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            nws: NWS_BASE_URL.to_string(),
            spc: SPC_BASE_URL.to_string(),
            iem: IEM_BASE_URL.to_string(),
            swpc: SWPC_BASE_URL.to_string(),
            nhc: NHC_BASE_URL.to_string(),
        }
    }
}

/// Deserialize a human-readable duration string like "10s" into a `Duration`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parse a human-readable duration string.
///
/// Supports: s, m, h, d (case-insensitive). A bare number is seconds.
/// Examples: "30", "10s", "2m", "6h", "7d", "1.5h"
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let s_lower = s.to_ascii_lowercase();

    let num_end = s_lower
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s_lower.len());

    let (num_str, unit) = s_lower.split_at(num_end);
    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", s))?;

    let multiplier: f64 = match unit.trim() {
        "" | "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        "d" => 86400.0,
        _ => return Err(format!("unknown duration unit: {}", unit)),
    };

    Ok(Duration::from_secs_f64(num * multiplier))
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time between poll cycles.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,

    /// Run the first poll cycle as soon as listening starts.
    pub tick_on_start: bool,

    /// Alert event categories to reconcile, lowercase.
    pub warning_events: Vec<String>,

    /// Give warnings display names such as "Tornado Emergency".
    pub custom_warning_names: bool,

    /// Per-request timeout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    /// User agent sent with every request. NWS asks for contact details.
    pub user_agent: String,

    /// Print statistics every N seconds (0 disables).
    pub stats_interval: u64,

    /// Enable Prometheus metrics HTTP endpoint.
    pub metrics_enabled: bool,

    /// Port for Prometheus metrics HTTP endpoint.
    pub metrics_port: u16,

    pub horizons: HorizonsConfig,

    pub endpoints: EndpointsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            tick_on_start: true,
            warning_events: DEFAULT_WARNING_EVENTS.iter().map(|s| s.to_string()).collect(),
            custom_warning_names: true,
            request_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            stats_interval: 60,
            metrics_enabled: false,
            metrics_port: 9090,
            horizons: HorizonsConfig::default(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
            }
            _ => Ok(Config::default()),
        }
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stormwatch/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than zero");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent must not be empty");
        }
        for (i, event) in self.warning_events.iter().enumerate() {
            if event.trim().is_empty() {
                bail!("Invalid warning_events [{}]: empty event name", i);
            }
        }
        for (name, url) in [
            ("nws", &self.endpoints.nws),
            ("spc", &self.endpoints.spc),
            ("iem", &self.endpoints.iem),
            ("swpc", &self.endpoints.swpc),
            ("nhc", &self.endpoints.nhc),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("Invalid endpoints.{}: {} is not an http(s) URL", name, url);
            }
        }
        self.horizons.to_horizons()?;
        Ok(())
    }

    /// HTTP client settings.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            nws_base_url: self.endpoints.nws.trim_end_matches('/').to_string(),
            spc_base_url: self.endpoints.spc.trim_end_matches('/').to_string(),
            iem_base_url: self.endpoints.iem.trim_end_matches('/').to_string(),
            swpc_base_url: self.endpoints.swpc.trim_end_matches('/').to_string(),
            nhc_base_url: self.endpoints.nhc.trim_end_matches('/').to_string(),
            timeout: self.request_timeout,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Engine settings.
    pub fn events_config(&self) -> Result<EventsConfig> {
        Ok(EventsConfig {
            interval: self.interval,
            tick_on_start: self.tick_on_start,
            warning_filter: self.warning_events.iter().map(|e| e.to_lowercase()).collect(),
            horizons: self.horizons.to_horizons()?,
        })
    }
}
