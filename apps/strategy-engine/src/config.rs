//! Engine configuration, loaded from environment variables with typed
//! defaults.

/// Default number of periods retained in the candle and tick windows.
const DEFAULT_N_PERIODS: usize = 20;

/// Default capacity of the strategy -> broker request channel.
const DEFAULT_REQUEST_CAPACITY: usize = 128;

/// Default capacity of the broker -> strategy response channel.
const DEFAULT_BROKER_CAPACITY: usize = 128;

/// Default capacity of the notification channel.
const DEFAULT_NOTIFY_CAPACITY: usize = 64;

/// Default capacity of the errors channel.
const DEFAULT_ERROR_CAPACITY: usize = 64;

/// Runtime configuration for one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of periods retained in the candle and tick windows; callbacks
    /// fire only once a window is warm.
    pub n_periods: usize,
    /// Capacity of the strategy -> broker request channel.
    pub request_channel_capacity: usize,
    /// Capacity of the broker -> strategy response channel.
    pub broker_channel_capacity: usize,
    /// Capacity of the notification channel.
    pub notify_channel_capacity: usize,
    /// Capacity of the errors channel.
    pub error_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_periods: DEFAULT_N_PERIODS,
            request_channel_capacity: DEFAULT_REQUEST_CAPACITY,
            broker_channel_capacity: DEFAULT_BROKER_CAPACITY,
            notify_channel_capacity: DEFAULT_NOTIFY_CAPACITY,
            error_channel_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for unset or unparsable variables.
    ///
    /// Recognized variables: `STRATEGY_N_PERIODS`,
    /// `STRATEGY_REQUEST_CAPACITY`, `STRATEGY_BROKER_CAPACITY`,
    /// `STRATEGY_NOTIFY_CAPACITY`, `STRATEGY_ERROR_CAPACITY`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            n_periods: env_usize("STRATEGY_N_PERIODS", defaults.n_periods),
            request_channel_capacity: env_usize(
                "STRATEGY_REQUEST_CAPACITY",
                defaults.request_channel_capacity,
            ),
            broker_channel_capacity: env_usize(
                "STRATEGY_BROKER_CAPACITY",
                defaults.broker_channel_capacity,
            ),
            notify_channel_capacity: env_usize(
                "STRATEGY_NOTIFY_CAPACITY",
                defaults.notify_channel_capacity,
            ),
            error_channel_capacity: env_usize(
                "STRATEGY_ERROR_CAPACITY",
                defaults.error_channel_capacity,
            ),
        }
    }

    /// Override the window size.
    #[must_use]
    pub const fn with_n_periods(mut self, n_periods: usize) -> Self {
        self.n_periods = n_periods;
        self
    }
}

/// Parse a positive usize from the environment, keeping `default` on any
/// failure.
fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
