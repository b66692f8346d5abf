use std::time::Duration;

use dispatch_core::ranking::{RankingPolicy, DEFAULT_MAX_RADIUS_KM};

use crate::retry::RetryPolicy;

/// Default response window for one offer.
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(300);

/// First delay before a failed escalation is tried again.
pub const DEFAULT_RESUME_DELAY: Duration = Duration::from_secs(1);

/// Longest delay between escalation retries.
pub const MAX_RESUME_DELAY: Duration = Duration::from_secs(60);

/// Dispatch tunables loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// How long a provider has to answer an offer.
    pub offer_timeout: Duration,
    pub ranking: RankingPolicy,
    /// Backoff for internally retried write conflicts.
    pub retry: RetryPolicy,
    /// Backoff for re-opening a session whose next offer failed to open.
    /// Resumes repeat until the session makes progress, so `max_retries`
    /// is ignored here.
    pub resume: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            ranking: RankingPolicy::default(),
            retry: RetryPolicy::default(),
            resume: resume_policy(DEFAULT_RESUME_DELAY),
        }
    }
}

fn resume_policy(base_delay: Duration) -> RetryPolicy {
    RetryPolicy {
        max_retries: u32::MAX,
        base_delay,
        max_delay: MAX_RESUME_DELAY.max(base_delay),
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default     |
    /// |---------------------------------|-------------|
    /// | `DISPATCH_OFFER_TIMEOUT_SECS`   | `300`       |
    /// | `DISPATCH_MAX_RADIUS_KM`        | `40`        |
    /// | `DISPATCH_MAX_CANDIDATES`       | unset       |
    /// | `DISPATCH_CONFLICT_MAX_RETRIES` | `5`         |
    /// | `DISPATCH_CONFLICT_BACKOFF_MS`  | `10`        |
    /// | `DISPATCH_RESUME_BACKOFF_MS`    | `1000`      |
    ///
    /// Panics with a descriptive message on invalid values; this runs once
    /// at startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
            .unwrap_or_else(|e| panic!("Invalid dispatch configuration: {e}"))
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let offer_timeout_secs: u64 = parse_or(&lookup, "DISPATCH_OFFER_TIMEOUT_SECS", 300)?;
        if offer_timeout_secs == 0 {
            return Err("DISPATCH_OFFER_TIMEOUT_SECS must be greater than 0".into());
        }

        let max_radius_km: f64 =
            parse_or(&lookup, "DISPATCH_MAX_RADIUS_KM", DEFAULT_MAX_RADIUS_KM)?;
        if !max_radius_km.is_finite() || max_radius_km <= 0.0 {
            return Err("DISPATCH_MAX_RADIUS_KM must be a positive number".into());
        }

        let max_candidates = match lookup("DISPATCH_MAX_CANDIDATES") {
            Some(raw) if !raw.trim().is_empty() => {
                let cap: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("DISPATCH_MAX_CANDIDATES must be a valid usize, got {raw:?}"))?;
                if cap == 0 {
                    return Err("DISPATCH_MAX_CANDIDATES must be greater than 0".into());
                }
                Some(cap)
            }
            _ => None,
        };

        let max_retries: u32 = parse_or(&lookup, "DISPATCH_CONFLICT_MAX_RETRIES", 5)?;
        let backoff_ms: u64 = parse_or(&lookup, "DISPATCH_CONFLICT_BACKOFF_MS", 10)?;
        let resume_ms: u64 = parse_or(&lookup, "DISPATCH_RESUME_BACKOFF_MS", 1000)?;
        if resume_ms == 0 {
            return Err("DISPATCH_RESUME_BACKOFF_MS must be greater than 0".into());
        }

        Ok(Self {
            offer_timeout: Duration::from_secs(offer_timeout_secs),
            ranking: RankingPolicy {
                max_radius_km: Some(max_radius_km),
                max_candidates,
            },
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(backoff_ms),
                ..RetryPolicy::default()
            },
            resume: resume_policy(Duration::from_millis(resume_ms)),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} has invalid value {raw:?}")),
        None => Ok(default),
    }
}
