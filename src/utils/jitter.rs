//! Jitter utility for retry backoff

use rand::{rng, Rng};
use std::time::Duration;

/// Random jitter between 0 and `max_jitter_ms` (inclusive)
pub fn generate_jitter_ms(max_jitter_ms: u64) -> u64 {
    if max_jitter_ms == 0 {
        return 0;
    }
    rng().random_range(0..=max_jitter_ms)
}

/// Jitter as a percentage of a base duration
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use iptv_player::utils::jitter::generate_jitter_percent;
///
/// let jitter = generate_jitter_percent(Duration::from_secs(1), 25);
/// assert!(jitter <= Duration::from_millis(250));
/// ```
pub fn generate_jitter_percent(base: Duration, jitter_percent: u8) -> Duration {
    if jitter_percent == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_jitter = base_ms.saturating_mul(u64::from(jitter_percent)) / 100;
    Duration::from_millis(generate_jitter_ms(max_jitter))
}
