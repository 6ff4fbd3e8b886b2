use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use anyhow::Context;
use nonzero_ext::nonzero;
use serde::{Deserialize, de::DeserializeOwned};

const ENV_PREFIX: &str = "PORTAL_";

/// The env config needed to talk to the portal and keep local state.
///
/// Every variable is optional and read with the `PORTAL_` prefix, e.g.
/// `PORTAL_POLL_INTERVAL_SECS=60`.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
    #[serde(default = "default_events_file")]
    pub events_file: PathBuf,
    /// Timetable exported from the portal, merged into the calendar at startup.
    #[serde(default = "default_timetable_file")]
    pub timetable_file: PathBuf,
    /// Seconds between two poller sweeps.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl PortalConfig {
    pub fn new() -> anyhow::Result<Self> {
        Self::load_from_env()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn requests_per_second(&self) -> NonZeroU32 {
        NonZeroU32::new(self.requests_per_second).unwrap_or(nonzero!(5u32))
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cookie_file: default_cookie_file(),
            events_file: default_events_file(),
            timetable_file: default_timetable_file(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://moj.tvz.hr/".to_string()
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("cookies.json")
}

fn default_events_file() -> PathBuf {
    PathBuf::from("kalendar_events.json")
}

fn default_timetable_file() -> PathBuf {
    PathBuf::from("raspored.ics")
}

fn default_poll_interval_secs() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_user_agent() -> String {
    format!("portal_companion/{}", env!("CARGO_PKG_VERSION"))
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config = envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
