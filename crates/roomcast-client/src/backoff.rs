//! Reconnect delay calculation.
//!
//! Delays grow geometrically from `initial_delay` by `backoff_multiplier`
//! per attempt and are capped at `max_delay`. No jitter is applied, so the
//! schedule is deterministic for a given configuration.

use std::time::Duration;

use crate::config::ClientConfig;

/// Delay before reconnect attempt `attempt` (zero-based).
///
/// Formula: `min(initial_delay * backoff_multiplier^attempt, max_delay)`.
/// A multiplier below `1.0` or a non-finite result is treated as the cap,
/// so the delay never exceeds `max_delay`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn reconnect_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let initial_ms = config.initial_delay.as_millis() as f64;
    let max_ms = config.max_delay.as_millis() as f64;
    let multiplier = config.backoff_multiplier.max(1.0);

    let exponent = attempt.min(i32::MAX as u32) as i32;
    let raw = initial_ms * multiplier.powi(exponent);
    let capped = if raw.is_finite() { raw.min(max_ms) } else { max_ms };

    Duration::from_millis(capped.round().max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(initial_ms: u64, multiplier: f64, max_ms: u64) -> ClientConfig {
        ClientConfig {
            initial_delay: Duration::from_millis(initial_ms),
            backoff_multiplier: multiplier,
            max_delay: Duration::from_millis(max_ms),
            ..ClientConfig::new("ws://test")
        }
    }

    #[test]
    fn doubles_until_capped() {
        let cfg = config(1000, 2.0, 8000);
        let delays: Vec<u128> = (0..6)
            .map(|n| reconnect_delay(&cfg, n).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn fractional_multiplier() {
        let cfg = config(1000, 1.5, 60_000);
        assert_eq!(reconnect_delay(&cfg, 1), Duration::from_millis(1500));
        assert_eq!(reconnect_delay(&cfg, 2), Duration::from_millis(2250));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let cfg = config(1000, 2.0, 30_000);
        assert_eq!(reconnect_delay(&cfg, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn shrinking_multiplier_is_flat() {
        let cfg = config(1000, 0.5, 30_000);
        assert_eq!(reconnect_delay(&cfg, 3), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn monotone_and_bounded(
            initial in 1u64..10_000,
            multiplier in 1.0f64..4.0,
            max in 1u64..120_000,
            attempts in 1u32..40,
        ) {
            let cfg = config(initial, multiplier, max);
            let mut previous = Duration::ZERO;
            for n in 0..attempts {
                let delay = reconnect_delay(&cfg, n);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= cfg.max_delay);
                previous = delay;
            }
        }
    }
}
