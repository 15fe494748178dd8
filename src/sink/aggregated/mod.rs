pub mod channel;
pub mod config;
pub mod exporter;
pub mod file;
pub mod flush;

use std::time::SystemTime;

use parking_lot::Mutex;

/// Bytes and latency samples accumulated between two drains.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    /// Start of this aggregation window.
    pub started_at: SystemTime,
    /// Moment the window was drained.
    pub ended_at: SystemTime,
    /// Bytes attributed to identities and payloads in the window.
    pub bytes: u64,
    /// Origin-to-arrival delays in seconds, in insertion order.
    pub delays: Vec<f64>,
}

impl Interval {
    /// Returns true if nothing was recorded in the window.
    pub fn is_empty(&self) -> bool {
        self.bytes == 0 && self.delays.is_empty()
    }
}

/// What one parsed record adds to the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub bytes: u64,
    pub latency: Option<f64>,
}

impl Contribution {
    pub fn bytes(bytes: u64) -> Self {
        Self {
            bytes,
            latency: None,
        }
    }

    pub fn with_latency(bytes: u64, latency: f64) -> Self {
        Self {
            bytes,
            latency: Some(latency),
        }
    }
}

/// The mutable part of a window. Counter and buffer always move together.
#[derive(Debug)]
struct Window {
    started_at: SystemTime,
    bytes: u64,
    delays: Vec<f64>,
}

impl Window {
    fn open(started_at: SystemTime) -> Self {
        Self {
            started_at,
            bytes: 0,
            delays: Vec::new(),
        }
    }
}

/// Interval aggregator shared by all ingestors and the flush scheduler.
///
/// The byte counter and the delay buffer sit behind a single lock, so a
/// drain always observes both from the same instant. `add` holds the lock
/// for one addition and one push; `drain` holds it for a pointer swap.
#[derive(Debug)]
pub struct Aggregator {
    window: Mutex<Window>,
}

impl Aggregator {
    /// Creates an aggregator with an empty window opened now.
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Creates an aggregator with an empty window opened at `started_at`.
    pub fn starting_at(started_at: SystemTime) -> Self {
        Self {
            window: Mutex::new(Window::open(started_at)),
        }
    }

    /// Adds bytes and an optional delay sample to the current window.
    pub fn add(&self, bytes: u64, latency: Option<f64>) {
        let mut window = self.window.lock();
        window.bytes = window.bytes.saturating_add(bytes);
        if let Some(latency) = latency {
            window.delays.push(latency);
        }
    }

    /// Applies a parsed record's contribution.
    #[inline]
    pub fn record(&self, contribution: Contribution) {
        self.add(contribution.bytes, contribution.latency);
    }

    /// Returns everything added since the previous drain and opens a new window.
    ///
    /// Adds racing with the drain land either entirely before the swap (and
    /// are returned here) or entirely after it (and go to the next window).
    pub fn drain(&self) -> Interval {
        let now = SystemTime::now();
        let old = {
            let mut window = self.window.lock();
            std::mem::replace(&mut *window, Window::open(now))
        };

        Interval {
            started_at: old.started_at,
            ended_at: now,
            bytes: old.bytes,
            delays: old.delays,
        }
    }

    /// Current window byte total and sample count, without resetting.
    pub fn pending(&self) -> (u64, usize) {
        let window = self.window.lock();
        (window.bytes, window.delays.len())
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
