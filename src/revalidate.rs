//! Probabilistic early revalidation.
//!
//! A cache entry inside its refresh window may be voluntarily refreshed
//! before expiry so that load spikes at TTL boundaries are spread out
//! instead of stampeding the backing store all at once.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Decides whether a not-yet-expired entry should be refreshed early.
///
/// With a refresh window `W` and shape parameter `β`, an entry with
/// `remaining` time to expiry is refreshed with probability
/// `((W - remaining) / W)^β`. Entries outside the window are never
/// refreshed. `β = 1` ramps linearly across the window, `β > 1` defers
/// refreshes towards expiry, `β < 1` refreshes more aggressively.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyRefreshPolicy {
    window: Duration,
    beta: f64,
}

impl EarlyRefreshPolicy {
    /// Creates a policy.
    ///
    /// # Panics
    ///
    /// Panics if `window` is zero or `beta` is not strictly positive;
    /// both would make the probability curve meaningless.
    pub fn new(window: Duration, beta: f64) -> Self {
        assert!(!window.is_zero(), "refresh window must be non-zero");
        assert!(beta > 0.0, "beta must be strictly positive");
        EarlyRefreshPolicy { window, beta }
    }

    /// The refresh window before expiry in which refreshes may trigger.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The refresh probability for an entry with `remaining` time to
    /// expiry. Zero outside the window, approaching one towards expiry.
    pub fn probability(&self, remaining: Duration) -> f64 {
        if remaining >= self.window {
            return 0.0;
        }
        let window = self.window.as_secs_f64();
        let elapsed = window - remaining.as_secs_f64();
        (elapsed / window).powf(self.beta)
    }

    /// The pure decision: refresh iff the uniform draw `u ∈ [0, 1)` falls
    /// below the refresh probability.
    pub fn should_refresh_with(&self, remaining: Duration, u: f64) -> bool {
        u < self.probability(remaining)
    }

    /// Draws from the thread-local RNG and decides.
    pub fn should_refresh(&self, remaining: Duration) -> bool {
        self.should_refresh_with(remaining, rand::rng().random::<f64>())
    }
}

/// Configuration form of [`EarlyRefreshPolicy`].
///
/// Durations deserialize from human-readable strings (`"30s"`, `"5m"`).
/// The default configuration is disabled: entries are served until hard
/// expiry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RevalidationConfig {
    /// Whether early revalidation is active.
    pub enabled: bool,
    /// The refresh window before expiry.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// The probability curve shape parameter.
    pub beta: f64,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        RevalidationConfig {
            enabled: false,
            window: Duration::from_secs(60),
            beta: 1.0,
        }
    }
}

impl RevalidationConfig {
    /// The policy this configuration describes, or `None` when disabled.
    pub fn policy(&self) -> Option<EarlyRefreshPolicy> {
        self.enabled
            .then(|| EarlyRefreshPolicy::new(self.window, self.beta))
    }
}
