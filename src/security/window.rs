//! Per-IP request tally for rate-style features.
//!
//! This is a fixed window, not a sliding one: the whole tally is cleared once
//! the window length has elapsed since the last reset. A client can keep its
//! counts low by straddling the reset boundary; that approximation is known
//! and kept as is.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Tally view for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests from this IP in the current window, including this one.
    pub ip_requests: u64,
    /// Distinct IPs seen in the current window.
    pub distinct_ips: usize,
}

#[derive(Debug)]
struct Tally {
    counts: HashMap<IpAddr, u64>,
    started: Instant,
}

/// Coarse per-IP request counter, reset in bulk.
#[derive(Debug)]
pub struct IpWindow {
    length: Duration,
    tally: Mutex<Tally>,
}

impl IpWindow {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            tally: Mutex::new(Tally {
                counts: HashMap::new(),
                started: Instant::now(),
            }),
        }
    }

    /// Count one request from `ip`.
    pub fn observe(&self, ip: IpAddr) -> WindowSnapshot {
        self.observe_at(ip, Instant::now())
    }

    /// Count one request from `ip` at `now`.
    ///
    /// Expiry, reset and increment happen under one lock, so an increment is
    /// never lost to a concurrent reset; it lands in whichever window the
    /// lock order puts it.
    pub fn observe_at(&self, ip: IpAddr, now: Instant) -> WindowSnapshot {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);

        if now.saturating_duration_since(tally.started) >= self.length {
            tracing::trace!(ips = tally.counts.len(), "Resetting per-IP window");
            tally.counts.clear();
            tally.started = now;
        }

        let count = tally.counts.entry(ip).or_insert(0);
        *count += 1;
        let ip_requests = *count;

        WindowSnapshot {
            ip_requests,
            distinct_ips: tally.counts.len(),
        }
    }

    /// Clear the tally immediately.
    pub fn reset(&self) {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        tally.counts.clear();
        tally.started = Instant::now();
    }
}
