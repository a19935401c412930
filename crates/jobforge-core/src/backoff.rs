//! Retry backoff strategies, selectable per job class.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delays never fall below this floor, even after jitter pulls them down.
const MIN_DELAY_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// `base` seconds every time, optionally jittered. This is the default,
    /// matching the reference implementation's own default.
    Constant { base_secs: f64, jitter: f64 },
    /// `attempt * base` seconds.
    Linear { base_secs: f64 },
    /// `base * multiplier^attempt` seconds, capped at `cap_secs`.
    Exponential {
        base_secs: f64,
        multiplier: f64,
        cap_secs: f64,
        jitter: f64,
    },
    /// `attempt^4 + 2`, jittered by `attempt^4 * jitter`.
    Polynomial { jitter: f64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Constant {
            base_secs: 3.0,
            jitter: 0.15,
        }
    }
}

impl Backoff {
    /// Computes the delay before the next attempt, given the 1-indexed attempt
    /// number that just failed. Jitter, if any, is additive and sampled
    /// uniformly from `[0, delay * jitter)`. The result is never below one second.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt_f = attempt as f64;
        let raw = match *self {
            Backoff::Constant { base_secs, jitter } => Self::jittered(base_secs, jitter),
            Backoff::Linear { base_secs } => attempt_f * base_secs,
            Backoff::Exponential {
                base_secs,
                multiplier,
                cap_secs,
                jitter,
            } => {
                let exp = (base_secs * multiplier.powf(attempt_f)).min(cap_secs);
                Self::jittered(exp, jitter)
            }
            Backoff::Polynomial { jitter } => {
                let base = attempt_f.powi(4) + 2.0;
                Self::jittered(base, jitter)
            }
        };
        Duration::from_secs_f64(raw.max(MIN_DELAY_SECS))
    }

    fn jittered(base: f64, jitter: f64) -> f64 {
        if jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..(base * jitter).max(f64::EPSILON));
        base + extra
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_is_constant_without_jitter() {
        let b = Backoff::Constant {
            base_secs: 5.0,
            jitter: 0.0,
        };
        assert_eq!(b.delay(1), Duration::from_secs_f64(5.0));
        assert_eq!(b.delay(9), Duration::from_secs_f64(5.0));
    }

    #[test]
    fn linear_scales_with_attempt() {
        let b = Backoff::Linear { base_secs: 2.0 };
        assert_eq!(b.delay(3), Duration::from_secs_f64(6.0));
    }

    #[test]
    fn exponential_is_capped() {
        let b = Backoff::Exponential {
            base_secs: 1.0,
            multiplier: 2.0,
            cap_secs: 10.0,
            jitter: 0.0,
        };
        assert_eq!(b.delay(10), Duration::from_secs_f64(10.0));
    }

    #[test]
    fn polynomial_is_at_least_n4_plus_2() {
        let b = Backoff::Polynomial { jitter: 0.0 };
        assert_eq!(b.delay(3), Duration::from_secs_f64(3f64.powi(4) + 2.0));
    }

    #[test]
    fn delay_never_drops_below_one_second() {
        let b = Backoff::Constant {
            base_secs: 0.01,
            jitter: 0.0,
        };
        assert_eq!(b.delay(1), Duration::from_secs_f64(1.0));
    }
}
