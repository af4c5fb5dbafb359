use std::time::Duration;

use rand::Rng;

/// How long the agent waits before the next connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay every time.
    Fixed(Duration),
    /// Exponential backoff with up to 20% random jitter, capped at `max`.
    /// Suited to many clients reconnecting after a shared outage.
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(3))
    }
}

/// Mutable delay state driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        let current = Self::initial(&policy);
        Self { policy, current }
    }

    fn initial(policy: &ReconnectPolicy) -> Duration {
        match policy {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Backoff { initial, .. } => *initial,
        }
    }

    /// Call after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.current = Self::initial(&self.policy);
    }

    /// Delay before the next attempt; advances the internal state.
    pub(crate) fn next_delay(&mut self) -> Duration {
        match &self.policy {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Backoff {
                max, multiplier, ..
            } => {
                let base = self.current;
                self.current = scale(base, *multiplier, *max);
                base.saturating_add(jitter(base)).min(*max)
            }
        }
    }
}

/// `base * multiplier` capped at `max`. Non-finite or oversized products saturate to `max`.
fn scale(base: Duration, multiplier: f64, max: Duration) -> Duration {
    let secs = (base.as_secs_f64() * multiplier.max(1.0)).min(max.as_secs_f64());
    Duration::try_from_secs_f64(secs).unwrap_or(max).min(max)
}

fn jitter(base: Duration) -> Duration {
    let range_ms = u64::try_from(base.as_millis() / 5).unwrap_or(u64::MAX);
    if range_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=range_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_never_changes() {
        let mut b = Backoff::new(ReconnectPolicy::default());
        for _ in 0..4 {
            assert_eq!(b.next_delay(), Duration::from_secs(3));
        }
    }

    #[test]
    fn backoff_grows_with_bounded_jitter_and_caps() {
        let mut b = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            multiplier: 2.0,
        });

        let expected_bases = [100u64, 200, 400, 800, 1_000, 1_000];
        for base in expected_bases {
            let delay = b.next_delay().as_millis() as u64;
            assert!(delay >= base, "delay {delay} below base {base}");
            assert!(delay <= (base + base / 5).min(1_000), "delay {delay} too large for {base}");
        }
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(10),
            multiplier: 3.0,
        });
        b.next_delay();
        b.next_delay();
        b.reset();
        let delay = b.next_delay();
        assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(60));
    }

    #[test]
    fn extreme_multipliers_saturate_at_max() {
        let mut b = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: f64::INFINITY,
        });
        b.next_delay();
        for _ in 0..3 {
            assert_eq!(b.next_delay(), Duration::from_secs(5));
        }

        let mut b = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::MAX,
            multiplier: 1e300,
        });
        for _ in 0..4 {
            b.next_delay();
        }

        let mut b = Backoff::new(ReconnectPolicy::Backoff {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(1),
            multiplier: f64::NAN,
        });
        for _ in 0..3 {
            let delay = b.next_delay();
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(240));
        }
    }
}
