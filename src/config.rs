//! Cart business configuration.
//!
//! The shipping threshold and flat fee are business constants that belong to
//! merchandising, not to code; they are injected here so tests can probe both
//! sides of the free-shipping breakpoint.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CartConfig {
    /// Subtotal (minor currency units) at which shipping becomes free.
    pub free_shipping_threshold: i64,
    /// Flat shipping fee below the threshold.
    pub shipping_fee: i64,
    /// Upper bound on any single pricing/promo gateway lookup.
    pub gateway_timeout: Duration,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: 50_000,
            shipping_fee: 2_000,
            gateway_timeout: Duration::from_secs(3),
        }
    }
}

impl CartConfig {
    /// Reads overrides from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            free_shipping_threshold: env_i64(
                "FREE_SHIPPING_THRESHOLD",
                defaults.free_shipping_threshold,
            ),
            shipping_fee: env_i64("SHIPPING_FEE", defaults.shipping_fee),
            gateway_timeout: timeout_from_ms(
                env_i64(
                    "GATEWAY_TIMEOUT_MS",
                    defaults.gateway_timeout.as_millis() as i64,
                ),
                defaults.gateway_timeout,
            ),
        }
    }
}

/// A negative millisecond override would wrap into an enormous timeout if
/// cast blindly; fall back to the default instead.
fn timeout_from_ms(ms: i64, default: Duration) -> Duration {
    match u64::try_from(ms) {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            tracing::warn!(ms, "ignoring negative gateway timeout override");
            default
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(%key, %raw, "ignoring unparsable config override");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_timeout_override_falls_back_to_default() {
        let default = Duration::from_secs(3);
        assert_eq!(timeout_from_ms(-1, default), default);
        assert_eq!(timeout_from_ms(0, default), Duration::from_millis(0));
        assert_eq!(timeout_from_ms(250, default), Duration::from_millis(250));
    }
}
