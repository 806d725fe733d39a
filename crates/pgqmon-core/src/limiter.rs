//! Token bucket bounding how often execution plans are captured.
//!
//! Callers reserve a slot under the bucket lock and then sleep until the slot
//! is due, outside the lock. Tokens may go negative; the debt is what orders
//! concurrent waiters. A reservation that cannot be honoured before the
//! caller's deadline, or whose caller is cancelled while waiting, is handed
//! back.

use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::QpmError;

/// Burst size and refill rate (tokens per second).
pub const EXPLAIN_TOKENS_PER_SECOND: u32 = 5;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

static SHARED: LazyLock<Arc<ExplainRateLimiter>> =
    LazyLock::new(|| Arc::new(ExplainRateLimiter::new()));

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, per_second: f64, now: Instant) -> Self {
        Self {
            capacity: f64::from(capacity),
            per_second,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.per_second).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Takes one token, returning how long the caller must wait for it.
    fn reserve(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.per_second)
        }
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn release(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

/// Rate limiter for `EXPLAIN` statements.
#[derive(Debug)]
pub struct ExplainRateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl Default for ExplainRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplainRateLimiter {
    /// A fresh bucket of 5 tokens refilling at 5 per second.
    pub fn new() -> Self {
        Self::with_rate(EXPLAIN_TOKENS_PER_SECOND, f64::from(EXPLAIN_TOKENS_PER_SECOND))
    }

    pub fn with_rate(capacity: u32, per_second: f64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(capacity, per_second, Instant::now())),
        }
    }

    /// Process-wide limiter shared by every pipeline that does not inject its own.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.lock().try_take(Instant::now())
    }

    /// Blocks until a token is available.
    ///
    /// Fails with `DeadlineExceeded` without waiting when the token would
    /// only become available after the deadline of `ctx`, and with
    /// `Cancelled` when `ctx` is cancelled during the wait.
    pub fn acquire(&self, ctx: &Context) -> Result<(), QpmError> {
        ctx.check()?;
        let reserved_at = Instant::now();
        let wait = self.lock().reserve(reserved_at);
        if wait.is_zero() {
            return Ok(());
        }
        if wait > ctx.remaining() {
            self.lock().release(Instant::now());
            return Err(QpmError::DeadlineExceeded);
        }

        let ready = reserved_at + wait;
        loop {
            if ctx.is_cancelled() {
                self.lock().release(Instant::now());
                return Err(QpmError::Cancelled);
            }
            let now = Instant::now();
            if now >= ready {
                return Ok(());
            }
            thread::sleep((ready - now).min(SLEEP_SLICE));
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(d: Duration) -> f64 {
        d.as_secs_f64()
    }

    #[test]
    fn burst_then_spaced_reservations() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5, 5.0, t0);
        let waits: Vec<f64> = (0..10).map(|_| secs(bucket.reserve(t0))).collect();
        let expected = [0.0, 0.0, 0.0, 0.0, 0.0, 0.2, 0.4, 0.6, 0.8, 1.0];
        for (w, e) in waits.iter().zip(expected) {
            assert!((w - e).abs() < 1e-6, "got {waits:?}");
        }
    }

    #[test]
    fn sustained_load_admits_at_most_five_per_second() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5, 5.0, t0);
        // 40 callers all arriving at t0.
        let admitted: Vec<Duration> = (0..40).map(|_| bucket.reserve(t0)).collect();
        // A full bucket admits its burst of 5 plus the refills at 0.2..0.8s,
        // so the first second sees 9 admissions. The bound of 5 per rolling
        // second holds under sustained contention once the burst is spent:
        // from admission 4 on, every six consecutive admissions span at
        // least a second.
        for i in 4..admitted.len() - 5 {
            assert!(
                secs(admitted[i + 5] - admitted[i]) >= 1.0 - 1e-6,
                "window starting at admission {i}"
            );
        }
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(5, 5.0, t0);
        for _ in 0..5 {
            assert!(bucket.try_take(t0));
        }
        assert!(!bucket.try_take(t0));
        let later = t0 + Duration::from_secs(60);
        for _ in 0..5 {
            assert!(bucket.try_take(later));
        }
        assert!(!bucket.try_take(later));
    }

    #[test]
    fn deadline_shorter_than_wait_returns_the_token() {
        let limiter = ExplainRateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        let ctx = Context::with_timeout(Duration::from_millis(50));
        assert_eq!(limiter.acquire(&ctx), Err(QpmError::DeadlineExceeded));
        // The released reservation does not push later callers back.
        let ctx = Context::with_timeout(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire(&ctx).unwrap();
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn cancelled_context_fails_fast() {
        let limiter = ExplainRateLimiter::new();
        let ctx = Context::with_timeout(Duration::from_secs(1));
        ctx.cancel();
        assert_eq!(limiter.acquire(&ctx), Err(QpmError::Cancelled));
    }

    #[test]
    fn cancel_during_wait_aborts() {
        let limiter = Arc::new(ExplainRateLimiter::with_rate(1, 0.5));
        assert!(limiter.try_acquire());
        let ctx = Context::with_timeout(Duration::from_secs(5));
        let canceller = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let start = Instant::now();
        assert_eq!(limiter.acquire(&ctx), Err(QpmError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_callers_are_spaced_out() {
        let limiter = Arc::new(ExplainRateLimiter::new());
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    let ctx = Context::with_timeout(Duration::from_secs(5));
                    limiter.acquire(&ctx).unwrap();
                    Instant::now()
                })
            })
            .collect();
        let mut admitted: Vec<Instant> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        admitted.sort();
        for i in 4..admitted.len() - 5 {
            let span = admitted[i + 5] - admitted[i];
            assert!(span >= Duration::from_millis(900), "span {span:?} at {i}");
        }
    }

    #[test]
    fn shared_instance_is_a_singleton() {
        assert!(Arc::ptr_eq(
            &ExplainRateLimiter::shared(),
            &ExplainRateLimiter::shared()
        ));
    }
}
