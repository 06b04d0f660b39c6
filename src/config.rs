//! Runtime configuration.

use std::{str::FromStr, sync::OnceLock, time::Duration};

use crate::log::warning;

const CHECK_CANCELED_KEY: &str = "VIGIL_CHECK_CANCELED";
const PING_INTERVAL_KEY: &str = "VIGIL_PING_INTERVAL_MS";
const MAX_PRIORITIZATION_KEY: &str = "VIGIL_MAX_PRIORITIZATION_MS";

pub(crate) fn global_config() -> &'static ProgressConfig {
    static CONFIG: OnceLock<ProgressConfig> = OnceLock::new();

    CONFIG.get_or_init(ProgressConfig::from_env)
}

/// Tunables of the cancellation and prioritization machinery.
#[derive(Clone, PartialEq, Debug)]
pub struct ProgressConfig {
    /// Whether canceled indicators make `check_canceled()` raise at all.
    pub check_canceled_enabled: bool,
    /// Polling interval of the non-standard indicator pinger.
    pub ping_interval: Duration,
    /// Prioritization younger than this never makes other threads yield.
    pub min_prioritization: Duration,
    /// Prioritization older than this is considered leaked and force-cleared.
    pub max_prioritization: Duration,
    /// How long a low-priority thread parks when yielding.
    pub deprioritization_park: Duration,
    /// Delay between checks whether blocked prioritized threads have resumed.
    pub unblock_recheck_delay: Duration,
    /// Nesting depth of `suppress_prioritizing()` reported as a likely leak.
    pub suppression_nesting_limit: usize,
}

impl Default for ProgressConfig {
    /// Returns a config with following default values:
    ///
    /// - `check_canceled_enabled: true`,
    /// - `ping_interval: 10ms`,
    /// - `min_prioritization: 5ms`,
    /// - `max_prioritization: 12s`,
    /// - `deprioritization_park: 1ms`,
    /// - `unblock_recheck_delay: 5ms`,
    /// - `suppression_nesting_limit: 100 + 2 * available parallelism`,
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1);

        Self {
            check_canceled_enabled: true,
            ping_interval: Duration::from_millis(10),
            min_prioritization: Duration::from_millis(5),
            max_prioritization: Duration::from_secs(12),
            deprioritization_park: Duration::from_millis(1),
            unblock_recheck_delay: Duration::from_millis(5),
            suppression_nesting_limit: 100 + parallelism * 2,
        }
    }
}

impl ProgressConfig {
    /// Returns the defaults, overridden by the environment where set.
    ///
    /// The following environment variables are recognized:
    ///
    /// ```terminal
    /// VIGIL_CHECK_CANCELED=[enabled|disabled]
    /// VIGIL_PING_INTERVAL_MS=[millis]
    /// VIGIL_MAX_PRIORITIZATION_MS=[millis]
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(EnvSwitch(enabled)) = read_env(CHECK_CANCELED_KEY) {
            config.check_canceled_enabled = enabled;
        }

        if let Some(EnvMillis(interval)) = read_env(PING_INTERVAL_KEY) {
            config.ping_interval = interval;
        }

        if let Some(EnvMillis(max)) = read_env(MAX_PRIORITIZATION_KEY) {
            config.max_prioritization = max;
        }

        config
    }

    /// Builder-style method for enabling or disabling indicator cancellation checks.
    pub fn check_canceled_enabled(mut self, enabled: bool) -> Self {
        self.check_canceled_enabled = enabled;
        self
    }

    /// Builder-style method for setting the pinger's polling interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Builder-style method for setting the minimum prioritization age.
    pub fn min_prioritization(mut self, duration: Duration) -> Self {
        self.min_prioritization = duration;
        self
    }

    /// Builder-style method for setting the prioritization safety ceiling.
    pub fn max_prioritization(mut self, duration: Duration) -> Self {
        self.max_prioritization = duration;
        self
    }

    /// Builder-style method for setting the yield duration of low-priority threads.
    pub fn deprioritization_park(mut self, duration: Duration) -> Self {
        self.deprioritization_park = duration;
        self
    }

    /// Builder-style method for setting the blocked-thread recheck delay.
    pub fn unblock_recheck_delay(mut self, duration: Duration) -> Self {
        self.unblock_recheck_delay = duration;
        self
    }
}

fn read_env<T>(key: &'static str) -> Option<T>
where
    T: FromStr<Err = EnvValueError>,
{
    let Ok(value) = std::env::var(key) else {
        return None;
    };

    match T::from_str(&value) {
        Ok(parsed) => Some(parsed),
        #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
        Err(err) => {
            warning!(
                env_key = key,
                value = ?err.unknown,
                "Unrecognized value for environment variable. Using default."
            );
            None
        }
    }
}

#[derive(Debug)]
pub(crate) struct EnvValueError {
    #[allow(dead_code)]
    pub(crate) unknown: String,
}

pub(crate) struct EnvSwitch(pub(crate) bool);

impl FromStr for EnvSwitch {
    type Err = EnvValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let string = s.trim().to_lowercase();
        match string.as_str() {
            "enabled" | "true" | "1" => Ok(Self(true)),
            "disabled" | "false" | "0" => Ok(Self(false)),
            _ => Err(Self::Err { unknown: string }),
        }
    }
}

pub(crate) struct EnvMillis(pub(crate) Duration);

impl FromStr for EnvMillis {
    type Err = EnvValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(|millis| Self(Duration::from_millis(millis)))
            .map_err(|_| Self::Err {
                unknown: s.to_owned(),
            })
    }
}
