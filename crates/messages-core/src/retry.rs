use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Upper bound for computed backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);
/// Fraction of the backoff that jitter may take away.
pub const DEFAULT_JITTER: f64 = 0.25;
/// Server-suggested waits at or above this are ignored.
pub const DEFAULT_MAX_SERVER_DELAY: Duration = Duration::from_secs(6);

pub const SHOULD_RETRY_HEADER: &str = "x-should-retry";
pub const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Status and headers of one HTTP response, as seen by the retry policy.
pub trait ResponseMetadata {
    fn status(&self) -> u16;
    /// First value of header `name` (case-insensitive).
    fn header(&self, name: &str) -> Option<&str>;
}

impl<T: ResponseMetadata + ?Sized> ResponseMetadata for &T {
    fn status(&self) -> u16 {
        (**self).status()
    }

    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }
}

/// In-memory response metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticResponse {
    status: u16,
    headers: HashMap<String, String>,
}

impl StaticResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

impl ResponseMetadata for StaticResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What an attempt produced, for retry purposes.
#[derive(Clone, Copy)]
pub enum AttemptOutcome<'a> {
    /// The request never produced a response.
    Transport,
    /// A response arrived; the status and headers decide.
    Response(&'a dyn ResponseMetadata),
}

impl fmt::Debug for AttemptOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("Transport"),
            Self::Response(response) => f
                .debug_tuple("Response")
                .field(&response.status())
                .finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    /// Retry after the given wait. `Duration::ZERO` asks for default backoff.
    RetryAfter(Duration),
}

/// Source of uniform jitter in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn unit(&self) -> f64;
}

/// Thread-local RNG jitter.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Reproducible jitter from a fixed seed.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn unit(&self) -> f64 {
        self.rng.lock().random::<f64>()
    }
}

/// Retry decision and backoff for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed backoff removed at most by jitter.
    pub jitter: f64,
    /// Exclusive upper bound for honoring server-suggested waits.
    pub max_server_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            max_server_delay: DEFAULT_MAX_SERVER_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn decide(&self, outcome: &AttemptOutcome<'_>) -> RetryDecision {
        let response = match outcome {
            AttemptOutcome::Transport => return RetryDecision::RetryAfter(Duration::ZERO),
            AttemptOutcome::Response(response) => *response,
        };
        if self.should_retry(response) {
            RetryDecision::RetryAfter(self.server_delay(response))
        } else {
            RetryDecision::Stop
        }
    }

    fn should_retry(&self, response: &dyn ResponseMetadata) -> bool {
        let status = response.status();
        if (200..300).contains(&status) {
            return false;
        }
        match response.header(SHOULD_RETRY_HEADER) {
            Some("true") => return true,
            Some("false") => return false,
            _ => {}
        }
        matches!(status, 408 | 409 | 429) || status >= 500
    }

    /// Wait suggested by the response, or zero when absent or unreasonable.
    fn server_delay(&self, response: &dyn ResponseMetadata) -> Duration {
        let mut wait = response
            .header(RETRY_AFTER_MS_HEADER)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .map(|ms| ms / 1000.0)
            .unwrap_or(0.0);
        if wait == 0.0
            && let Some(value) = response.header(RETRY_AFTER_HEADER)
        {
            wait = parse_retry_after(value).unwrap_or(0.0);
        }
        let bound = self.max_server_delay.as_secs_f64();
        if !(0.0..bound).contains(&wait) {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(wait)
    }

    /// Default backoff before retry number `attempt_number` (zero-based).
    ///
    /// `min(initial * 2^n, max) * (1 - u * jitter)` for `u` drawn from `jitter`.
    pub fn backoff(&self, attempt_number: u32, jitter: &dyn JitterSource) -> Duration {
        let exponential = self.initial_delay.as_secs_f64() * 2f64.powi(attempt_number.min(31) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let factor = 1.0 - jitter.unit().clamp(0.0, 1.0) * self.jitter;
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// `Retry-After` as seconds: a float, or an HTTP date relative to now.
/// Dates in the past come back negative.
fn parse_retry_after(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Some(seconds);
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.signed_duration_since(chrono::Utc::now());
    Some(delta.num_milliseconds() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedJitter(f64);

    impl JitterSource for FixedJitter {
        fn unit(&self) -> f64 {
            self.0
        }
    }

    fn decide(response: StaticResponse) -> RetryDecision {
        RetryPolicy::default().decide(&AttemptOutcome::Response(&response))
    }

    #[test]
    fn server_errors_are_retried_with_default_backoff() {
        assert_eq!(
            decide(StaticResponse::new(500)),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
        assert_eq!(
            decide(StaticResponse::new(529)),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
    }

    #[test]
    fn success_and_client_errors_stop() {
        assert_eq!(decide(StaticResponse::new(200)), RetryDecision::Stop);
        assert_eq!(decide(StaticResponse::new(400)), RetryDecision::Stop);
        assert_eq!(decide(StaticResponse::new(404)), RetryDecision::Stop);
    }

    #[test]
    fn should_retry_header_overrides_status() {
        let rate_limited = StaticResponse::new(429).with_header("x-should-retry", "false");
        assert_eq!(decide(rate_limited), RetryDecision::Stop);

        let bad_request = StaticResponse::new(400).with_header("X-Should-Retry", "true");
        assert_eq!(decide(bad_request), RetryDecision::RetryAfter(Duration::ZERO));

        let junk = StaticResponse::new(409).with_header("x-should-retry", "maybe");
        assert_eq!(decide(junk), RetryDecision::RetryAfter(Duration::ZERO));
    }

    #[test]
    fn success_ignores_should_retry_header() {
        let ok = StaticResponse::new(200).with_header("x-should-retry", "true");
        assert_eq!(decide(ok), RetryDecision::Stop);
    }

    #[test]
    fn transport_failures_are_retried() {
        assert_eq!(
            RetryPolicy::default().decide(&AttemptOutcome::Transport),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
    }

    #[test]
    fn retry_after_ms_is_preferred() {
        let response = StaticResponse::new(408)
            .with_header("retry-after-ms", "250")
            .with_header("retry-after", "2");
        assert_eq!(
            decide(response),
            RetryDecision::RetryAfter(Duration::from_millis(250))
        );
    }

    #[test]
    fn zero_retry_after_ms_falls_through_to_retry_after() {
        let response = StaticResponse::new(503)
            .with_header("retry-after-ms", "0")
            .with_header("retry-after", "1.5");
        assert_eq!(
            decide(response),
            RetryDecision::RetryAfter(Duration::from_millis(1500))
        );
    }

    #[test]
    fn out_of_range_waits_use_default_backoff() {
        let too_long = StaticResponse::new(429).with_header("retry-after", "6");
        assert_eq!(decide(too_long), RetryDecision::RetryAfter(Duration::ZERO));

        let negative = StaticResponse::new(429).with_header("retry-after-ms", "-5");
        assert_eq!(decide(negative), RetryDecision::RetryAfter(Duration::ZERO));

        let garbage = StaticResponse::new(429).with_header("retry-after", "soon");
        assert_eq!(decide(garbage), RetryDecision::RetryAfter(Duration::ZERO));
    }

    #[test]
    fn retry_after_http_date_is_relative_to_now() {
        let at = chrono::Utc::now() + chrono::Duration::seconds(3);
        let response = StaticResponse::new(503).with_header("retry-after", at.to_rfc2822());
        let RetryDecision::RetryAfter(wait) = decide(response) else {
            panic!("503 must retry");
        };
        assert!(wait > Duration::from_secs(1), "{wait:?}");
        assert!(wait < Duration::from_secs(4), "{wait:?}");

        let past = StaticResponse::new(503)
            .with_header("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(decide(past), RetryDecision::RetryAfter(Duration::ZERO));
    }

    #[test]
    fn backoff_without_jitter_doubles_up_to_cap() {
        let policy = RetryPolicy::default();
        let none = FixedJitter(0.0);
        let delays: Vec<Duration> = (0..6).map(|n| policy.backoff(n, &none)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn full_jitter_takes_a_quarter_off() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(1, &FixedJitter(1.0)),
            Duration::from_millis(750)
        );
    }

    #[test]
    fn jittered_backoff_stays_below_cap_and_never_shrinks() {
        let policy = RetryPolicy::default();
        let jitter = SeededJitter::new(7);
        for _ in 0..100 {
            let u = jitter.unit();
            assert!((0.0..1.0).contains(&u));
            let fixed = FixedJitter(u);
            let mut previous = Duration::ZERO;
            for n in 0..10 {
                let delay = policy.backoff(n, &fixed);
                assert!(delay <= DEFAULT_MAX_DELAY);
                assert!(delay < DEFAULT_MAX_DELAY || u == 0.0);
                assert!(delay >= previous, "attempt {n}: {delay:?} < {previous:?}");
                previous = delay;
            }
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let a = SeededJitter::new(42);
        let b = SeededJitter::new(42);
        for _ in 0..5 {
            assert_eq!(a.unit().to_bits(), b.unit().to_bits());
        }
    }
}
