//! # Global runtime configuration.
//!
//! Provides [`Config`], centralized settings for the service, its jobs and the
//! request pacer, and [`Endpoints`], the site-specific URLs used by checkin.
//!
//! Config is used in three places:
//! 1. **Service creation**: `ServiceBuilder::new(config).build(..)`
//! 2. **Job runs**: worker pool size and identity endpoints
//! 3. **Fetcher**: minimum spacing between dispatched requests
//!
//! ## Sentinel values
//! - `max_concurrency = 0` → treated as 1 (a job always makes progress)
//! - `request_interval = 0s` → no pacing delay
//! - `bus_capacity = 0` → clamped to 1 by the bus

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::logger::Level;

/// Global configuration for the service runtime.
///
/// ## Field semantics
/// - `request_interval`: minimum wall-clock gap between two dispatched requests
/// - `max_concurrency`: workers per job (tasks running at once)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `log_level`: threshold below which log entries are discarded
/// - `log_history`: number of log entries retained in memory (`0` = none)
/// - `command_capacity`: bounded queue size of the remote command channel
#[derive(Clone, Debug)]
pub struct Config {
    /// Minimum spacing between two outbound requests, across all tasks.
    pub request_interval: Duration,

    /// Number of workers a job runs its tasks on.
    ///
    /// Bounds logical concurrency only; pacing already serializes the
    /// actual network issuance.
    pub max_concurrency: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Default logger threshold.
    pub log_level: Level,

    /// How many log entries the logger keeps for late observers.
    pub log_history: usize,

    /// Capacity of the [`ServiceHandle`](crate::ServiceHandle) command channel.
    pub command_capacity: usize,

    /// Site endpoints used by checkin and user lookups.
    pub endpoints: Endpoints,
}

impl Config {
    /// Returns the worker pool size, never less than 1.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the pacing interval as an `Option`.
    ///
    /// - `None` → requests are never delayed
    /// - `Some(d)` → requests are spaced at least `d` apart
    #[inline]
    pub fn pacing(&self) -> Option<Duration> {
        if self.request_interval.is_zero() {
            None
        } else {
            Some(self.request_interval)
        }
    }

    /// Loads configuration from the environment (and a `.env` file if present),
    /// falling back to [`Config::default`] for anything unset.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `JOBVISOR_REQUEST_INTERVAL_MS`  | `1000`  |
    /// | `JOBVISOR_MAX_CONCURRENCY`      | `3`     |
    /// | `JOBVISOR_BUS_CAPACITY`         | `1024`  |
    /// | `JOBVISOR_LOG_LEVEL`            | `info`  |
    /// | `JOBVISOR_LOG_HISTORY`          | `1000`  |
    /// | `JOBVISOR_COMMAND_CAPACITY`     | `64`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "JOBVISOR_REQUEST_INTERVAL_MS")? {
            cfg.request_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "JOBVISOR_MAX_CONCURRENCY")? {
            cfg.max_concurrency = n;
        }
        if let Some(n) = parse_var(&lookup, "JOBVISOR_BUS_CAPACITY")? {
            cfg.bus_capacity = n;
        }
        if let Some(level) = parse_var(&lookup, "JOBVISOR_LOG_LEVEL")? {
            cfg.log_level = level;
        }
        if let Some(n) = parse_var(&lookup, "JOBVISOR_LOG_HISTORY")? {
            cfg.log_history = n;
        }
        if let Some(n) = parse_var(&lookup, "JOBVISOR_COMMAND_CAPACITY")? {
            cfg.command_capacity = n;
        }
        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&'static str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `request_interval = 1s`
    /// - `max_concurrency = 3`
    /// - `bus_capacity = 1024`
    /// - `log_level = Info`
    /// - `log_history = 1000`
    /// - `command_capacity = 64`
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(1000),
            max_concurrency: 3,
            bus_capacity: 1024,
            log_level: Level::Info,
            log_history: 1000,
            command_capacity: 64,
            endpoints: Endpoints::default(),
        }
    }
}

/// Site endpoints and secret names used while resolving a [`Session`](crate::Session).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Authenticated identity page; a redirect means "not logged in".
    pub identity_url: String,
    /// User-info JSON endpoint with `{uid}` and `{ck}` placeholders.
    pub user_info_url: String,
    /// Referer sent with user-info lookups.
    pub user_info_referer: String,
    /// Cookie domain filter passed to the cookie jar.
    pub cookie_domain: String,
    /// Cookie names copied into `Session::secrets`.
    pub secret_names: Vec<String>,
    /// Secret used as the anti-CSRF token in API URLs.
    pub csrf_secret: String,
}

impl Endpoints {
    /// Expands the user-info template for `uid`.
    pub fn user_info(&self, uid: &str, csrf: &str) -> String {
        self.user_info_url
            .replace("{uid}", uid)
            .replace("{ck}", csrf)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            identity_url: "https://m.douban.com/mine/".into(),
            user_info_url: "https://m.douban.com/rexxar/api/v2/user/{uid}?ck={ck}&for_mobile=1"
                .into(),
            user_info_referer: "https://m.douban.com/".into(),
            cookie_domain: "https://*.douban.com".into(),
            secret_names: ["ue", "bid", "frodotk_db", "ck", "dbcl2"]
                .into_iter()
                .map(String::from)
                .collect(),
            csrf_secret: "ck".into(),
        }
    }
}
