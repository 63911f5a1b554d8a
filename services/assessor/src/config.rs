use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::backend_local::FixtureLatency;
use crate::job::PollPolicy;

pub const DEFAULT_BACKEND: &str = "local";

/// Which backend answers requests. Fixed for the life of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendMode {
    Local,
    Live { base_url: String },
}

impl BackendMode {
    /// `local`, or an http(s) base address selecting live mode.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("local") {
            return Ok(BackendMode::Local);
        }
        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            bail!("ASSESSOR_BACKEND must be `local` or start with http:// or https:// (got `{raw}`)");
        }
        Ok(BackendMode::Live {
            base_url: raw.trim_end_matches('/').to_string(),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, BackendMode::Local)
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendMode,
    pub token: Option<String>,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
    pub fixture_latency: FixtureLatency,
    pub fixture_seed: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = BackendMode::parse(&get("ASSESSOR_BACKEND").unwrap_or_else(|| DEFAULT_BACKEND.to_string()))?;
        let token = get("ASSESSOR_TOKEN");

        let defaults = PollPolicy::default();
        let interval_ms = number(&get, "ASSESSOR_POLL_INTERVAL_MS")?.unwrap_or(defaults.interval.as_millis() as u64);
        if interval_ms == 0 {
            bail!("ASSESSOR_POLL_INTERVAL_MS must be greater than zero");
        }
        let attempt_timeout = match number(&get, "ASSESSOR_POLL_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.attempt_timeout,
        };
        let max_polls = match number(&get, "ASSESSOR_MAX_POLLS")? {
            Some(0) => bail!("ASSESSOR_MAX_POLLS must be greater than zero (leave it unset for no limit)"),
            Some(n) => Some(u32::try_from(n).context("ASSESSOR_MAX_POLLS is too large")?),
            None => None,
        };
        let max_consecutive_failures = number(&get, "ASSESSOR_POLL_RETRIES")?
            .map(|n| u32::try_from(n).context("ASSESSOR_POLL_RETRIES is too large"))
            .transpose()?
            .unwrap_or(defaults.max_consecutive_failures);

        let request_timeout = Duration::from_secs(number(&get, "ASSESSOR_REQUEST_TIMEOUT_SECS")?.unwrap_or(30));

        let fixture_latency = match get("ASSESSOR_FIXTURE_DELAY_MS") {
            Some(raw) => FixtureLatency::parse(&raw)
                .with_context(|| format!("ASSESSOR_FIXTURE_DELAY_MS must be `min-max` or a number of ms (got `{raw}`)"))?,
            None => FixtureLatency::default(),
        };
        let fixture_seed = number(&get, "ASSESSOR_FIXTURE_SEED")?.unwrap_or(0);

        Ok(Self {
            backend,
            token,
            poll: PollPolicy {
                interval: Duration::from_millis(interval_ms),
                attempt_timeout,
                max_polls,
                max_consecutive_failures,
            },
            request_timeout,
            fixture_latency,
            fixture_seed,
        })
    }
}

fn number<G>(get: &G, key: &str) -> Result<Option<u64>>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| v.parse::<u64>().with_context(|| format!("{key} must be a non-negative integer (got `{v}`)")))
        .transpose()
}
