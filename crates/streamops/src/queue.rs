//! Rate-limited work queue.
//!
//! A blocking queue shared between the thread that enqueues work and the
//! worker that drains it. An item is never handed out twice at once: adding
//! an item that is already queued is a no-op, and adding one that is being
//! processed parks it until [`WorkQueue::done`] is called for it.
//!
//! Retries go through a [`RateLimiter`], which decides how long an item waits
//! before it becomes visible again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::Result;

/// Per-item backoff base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
/// Per-item backoff cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);
/// Overall retry rate.
pub const DEFAULT_QPS: f64 = 10.0;
/// Overall retry burst.
pub const DEFAULT_BURST: u32 = 100;

/// How long an item should wait before being retried.
pub trait RateLimiter<T>: Send {
    /// Delay for the next retry of `item`; counts as one requeue.
    fn when(&mut self, item: &T) -> Duration;
    /// Stop tracking `item`.
    fn forget(&mut self, item: &T);
    /// Requeues of `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> u32;
}

/// Doubles the delay on every failure of the same item.
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter<T> {
    base: Duration,
    max: Duration,
    failures: HashMap<T, u32>,
}

impl<T> ExponentialFailureRateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash + Clone + Send> RateLimiter<T> for ExponentialFailureRateLimiter<T> {
    fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);

        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

/// Token bucket shared by all items.
///
/// Each call to `when` reserves one token; once the bucket is empty the
/// returned delay grows by `1 / qps` per reservation.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl BucketRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            tokens: burst,
            last: Instant::now(),
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&mut self, _item: &T) -> Duration {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst) - 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }

    fn forget(&mut self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Takes the longest delay of several limiters.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&mut self, item: &T) -> Duration {
        self.limiters
            .iter_mut()
            .map(|limiter| limiter.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&mut self, item: &T) {
        for limiter in &mut self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

/// Per-item exponential backoff combined with an overall token bucket.
///
/// The `DEFAULT_*` constants give 5 ms to 1000 s backoff under 10 qps with a
/// burst of 100.
pub fn controller_rate_limiter<T>(
    base: Duration,
    max: Duration,
    qps: f64,
    burst: u32,
) -> MaxOfRateLimiter<T>
where
    T: Eq + Hash + Clone + Send + 'static,
{
    MaxOfRateLimiter::new(vec![
        Box::new(ExponentialFailureRateLimiter::new(base, max)),
        Box::new(BucketRateLimiter::new(qps, burst)),
    ])
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    waiting: Vec<(Instant, T)>,
    limiter: Box<dyn RateLimiter<T>>,
    shutting_down: bool,
    draining: bool,
}

impl<T: Eq + Hash + Clone> State<T> {
    fn enqueue(&mut self, item: T) {
        if self.shutting_down || self.dirty.contains(&item) {
            return;
        }
        self.dirty.insert(item.clone());
        if !self.processing.contains(&item) {
            self.queue.push_back(item);
        }
    }

    /// Move every delayed item whose time has come; returns the next wake-up.
    fn promote_ready(&mut self, now: Instant) -> Option<Instant> {
        let mut next = None::<Instant>;
        let mut index = 0;
        while index < self.waiting.len() {
            let ready_at = self.waiting[index].0;
            if ready_at <= now {
                let (_, item) = self.waiting.swap_remove(index);
                self.enqueue(item);
            } else {
                next = Some(next.map_or(ready_at, |n| n.min(ready_at)));
                index += 1;
            }
        }
        next
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.waiting.is_empty() && self.processing.is_empty()
    }
}

/// Blocking, deduplicating, rate-limited queue.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Upper bound on a single blocking wait, so cancellation is noticed.
const WAIT_SLICE: Duration = Duration::from_millis(50);

impl<T: Eq + Hash + Clone> WorkQueue<T> {
    pub fn with_rate_limiter(limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: Vec::new(),
                limiter,
                shutting_down: false,
                draining: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `item` available now.
    pub fn add(&self, item: T) {
        self.state().enqueue(item);
        self.cond.notify_all();
    }

    /// Make `item` available after `delay`.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        state.waiting.push((Instant::now() + delay, item));
        drop(state);
        self.cond.notify_all();
    }

    /// Requeue `item` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.state().limiter.when(&item);
        log::trace!("requeue after {delay:?}");
        self.add_after(item, delay);
    }

    /// Reset the rate limiter's memory of `item`.
    pub fn forget(&self, item: &T) {
        self.state().limiter.forget(item);
    }

    /// Times `item` has been requeued through the rate limiter.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.state().limiter.num_requeues(item)
    }

    /// Block until an item is available; `None` once the queue is shut down.
    ///
    /// A draining queue keeps handing out work, including delayed retries,
    /// until nothing is queued, waiting or in flight.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state();
        loop {
            if state.shutting_down {
                return None;
            }
            let now = Instant::now();
            let next_ready = state.promote_ready(now);

            if let Some(item) = state.queue.pop_front() {
                state.dirty.remove(&item);
                state.processing.insert(item.clone());
                return Some(item);
            }
            if state.draining && state.is_idle() {
                return None;
            }

            let wait = next_ready.map_or(WAIT_SLICE, |at| (at - now).min(WAIT_SLICE));
            state = self
                .cond
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark `item` as processed. If it was re-added meanwhile it becomes
    /// available again.
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Items currently queued or waiting, excluding those in flight.
    pub fn len(&self) -> usize {
        let state = self.state();
        state.queue.len() + state.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out work immediately; queued items are abandoned.
    pub fn shut_down(&self) {
        let mut state = self.state();
        state.shutting_down = true;
        state.queue.clear();
        state.waiting.clear();
        state.dirty.clear();
        drop(state);
        self.cond.notify_all();
    }

    /// Wait until every item (retries included) has been processed, then
    /// shut down.
    ///
    /// If `cancel` fires first the queue is shut down without draining and
    /// the cancellation error is returned.
    pub fn shut_down_with_drain(&self, cancel: &CancelToken) -> Result<()> {
        let mut state = self.state();
        state.draining = true;
        self.cond.notify_all();

        loop {
            if state.is_idle() {
                break;
            }
            if let Err(e) = cancel.check() {
                drop(state);
                self.shut_down();
                return Err(e);
            }
            let now = Instant::now();
            let next_ready = state.promote_ready(now);
            let mut wait = next_ready.map_or(WAIT_SLICE, |at| (at - now).min(WAIT_SLICE));
            if let Some(remaining) = cancel.remaining() {
                wait = wait.min(remaining);
            }
            state = self
                .cond
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        drop(state);
        self.shut_down();
        Ok(())
    }
}
