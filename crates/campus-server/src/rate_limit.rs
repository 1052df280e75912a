//! Status Poll Limiting
//!
//! Fixed-window counter per caller address and session reference.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use campus_billing::PaymentError;

/// Expired windows are dropped once the table grows past this
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    hits: u32,
}

pub struct PollLimiter {
    quota: u32,
    window: Duration,
    windows: Mutex<HashMap<(IpAddr, String), Window>>,
}

impl PollLimiter {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one poll, failing with `RateLimited` once the quota is spent
    pub fn check(&self, addr: IpAddr, reference: &str) -> Result<(), PaymentError> {
        self.check_at(addr, reference, Instant::now())
    }

    fn check_at(&self, addr: IpAddr, reference: &str, now: Instant) -> Result<(), PaymentError> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let window = windows
            .entry((addr, reference.to_string()))
            .or_insert(Window {
                started: now,
                hits: 0,
            });
        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                hits: 0,
            };
        }

        if window.hits >= self.quota {
            tracing::warn!(addr = %addr, reference = %reference, "Status poll rate limited");
            return Err(PaymentError::RateLimited);
        }
        window.hits += 1;
        Ok(())
    }
}
