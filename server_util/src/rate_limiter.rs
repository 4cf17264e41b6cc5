//! Token-bucket rate limiting, `Instant`-based. Used for the client
//! authenticate/socket-upgrade endpoint and for per-socket abuse limits.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Configuration for a rate limiter: how often one "token" is replenished,
/// and how many tokens may accumulate (burst).
#[derive(Copy, Clone, Debug)]
pub struct RateLimiterProps {
    pub period: Duration,
    pub burst: u32,
}

impl RateLimiterProps {
    pub const fn new(period: Duration, burst: u32) -> Self {
        Self { period, burst }
    }
}

/// Per-key token-bucket state. `should_limit_rate` returns `true` when the
/// caller should be refused and does not consume a token in that case.
#[derive(Debug)]
pub struct RateLimiterState {
    last_request: Option<Instant>,
    tokens: u32,
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self {
            last_request: None,
            tokens: 0,
        }
    }
}

impl RateLimiterState {
    pub fn should_limit_rate(&mut self, props: &RateLimiterProps) -> bool {
        self.should_limit_rate_with_now(props, Instant::now())
    }

    pub fn should_limit_rate_with_now(&mut self, props: &RateLimiterProps, now: Instant) -> bool {
        if let Some(last_request) = self.last_request {
            let elapsed = now.saturating_duration_since(last_request);
            let replenished = if props.period.is_zero() {
                props.burst
            } else {
                (elapsed.as_secs_f64() / props.period.as_secs_f64()) as u32
            };
            self.tokens = self.tokens.saturating_add(replenished).min(props.burst);
        } else {
            self.tokens = props.burst;
        }
        self.last_request = Some(now);

        if self.tokens == 0 {
            true
        } else {
            self.tokens -= 1;
            false
        }
    }
}

/// A [`RateLimiterState`] per source IP, with lazy eviction of entries that
/// haven't been touched in a while so the map doesn't grow unbounded.
pub struct IpRateLimiter {
    props: RateLimiterProps,
    states: HashMap<IpAddr, RateLimiterState>,
    last_swept: Instant,
}

impl IpRateLimiter {
    pub fn new(props: RateLimiterProps) -> Self {
        Self {
            props,
            states: HashMap::new(),
            last_swept: Instant::now(),
        }
    }

    const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    const EVICT_AFTER: Duration = Duration::from_secs(300);

    pub fn should_limit_rate(&mut self, ip: IpAddr) -> bool {
        let now = Instant::now();
        self.maybe_sweep(now);
        self.states
            .entry(ip)
            .or_default()
            .should_limit_rate_with_now(&self.props, now)
    }

    fn maybe_sweep(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_swept) < Self::SWEEP_INTERVAL {
            return;
        }
        self.last_swept = now;
        self.states.retain(|_, state| {
            state
                .last_request
                .map(|last| now.saturating_duration_since(last) < Self::EVICT_AFTER)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let props = RateLimiterProps::new(Duration::from_secs(1), 2);
        let mut state = RateLimiterState::default();
        let now = Instant::now();
        assert!(!state.should_limit_rate_with_now(&props, now));
        assert!(!state.should_limit_rate_with_now(&props, now));
        assert!(state.should_limit_rate_with_now(&props, now));
    }

    #[test]
    fn replenishes_over_time() {
        let props = RateLimiterProps::new(Duration::from_millis(100), 1);
        let mut state = RateLimiterState::default();
        let t0 = Instant::now();
        assert!(!state.should_limit_rate_with_now(&props, t0));
        assert!(state.should_limit_rate_with_now(&props, t0));
        let t1 = t0 + Duration::from_millis(150);
        assert!(!state.should_limit_rate_with_now(&props, t1));
    }

    #[test]
    fn ip_limiter_tracks_keys_independently() {
        let mut limiter = IpRateLimiter::new(RateLimiterProps::new(Duration::from_secs(1), 1));
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(!limiter.should_limit_rate(a));
        assert!(limiter.should_limit_rate(a));
        assert!(!limiter.should_limit_rate(b));
    }
}
