//! The spate admission controller
//!
//! This library gates how many units of work the rest of the spate project
//! may dispatch per second. The heart of it is [`bucket::Bucket`], a token
//! bucket with reservation semantics; [`Throttle`] binds a bucket to a
//! [`Clock`] so callers can simply wait out whatever delay a reservation
//! carries.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tokio::time::{self, Duration, Instant};

pub mod bucket;

pub use bucket::{Bucket, Reservation, TICKS_PER_SECOND};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of a [`Throttle`].
pub enum Config {
    /// A throttle that admits every request immediately.
    AllOut,
    /// A throttle that refills at a steady rate up to a burst ceiling.
    Stable {
        /// The sustained number of units admitted per second.
        units_per_second: NonZeroU32,
        /// The most units that may be admitted in a single burst. Defaults to
        /// `units_per_second`.
        #[serde(default)]
        burst: Option<NonZeroU32>,
    },
}

impl Config {
    /// The burst capacity of this configuration, `None` if unbounded.
    #[must_use]
    pub fn burst(&self) -> Option<NonZeroU32> {
        match self {
            Config::AllOut => None,
            Config::Stable {
                units_per_second,
                burst,
            } => Some(burst.unwrap_or(*units_per_second)),
        }
    }
}

/// Errors produced by [`Throttle`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Requested capacity is greater than the burst capacity of the bucket.
    /// No amount of waiting will satisfy the request.
    #[error("Request for {requested} units exceeds burst capacity of {burst}")]
    Capacity {
        /// The number of units requested
        requested: u32,
        /// The burst capacity of the bucket
        burst: u32,
    },
}

#[async_trait]
/// The `Clock` used for every throttle
pub trait Clock {
    /// The number of ticks elapsed since the clock was created. One tick is
    /// one microsecond.
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created.
    ///
    /// # Panics
    ///
    /// Function will panic if the number of ticks elapsed is greater than u64::MAX.
    #[allow(clippy::cast_possible_truncation)]
    fn ticks_elapsed(&self) -> u64 {
        let now = Instant::now();
        let ticks_since: u128 = now.duration_since(self.start).as_micros();
        assert!(
            ticks_since <= u128::from(u64::MAX),
            "584,554 years elapsed since last call!"
        );
        ticks_since as u64
    }

    async fn wait(&self, ticks: u64) {
        if ticks > 0 {
            time::sleep(Duration::from_micros(ticks)).await;
        }
    }
}

#[derive(Debug)]
enum Mode {
    AllOut,
    Stable(Bucket),
}

/// The throttle mechanism
///
/// A `Throttle` is owned by exactly one caller. Reservation correctness
/// depends on linear accounting of elapsed time, so callers spreading work
/// across tasks must serialize access to a shared `Throttle` themselves.
#[derive(Debug)]
pub struct Throttle<C = RealClock> {
    mode: Mode,
    clock: C,
}

impl Throttle<RealClock> {
    /// Create a new instance of `Throttle` with a real-time clock
    #[must_use]
    pub fn new_with_config(config: Config) -> Self {
        Self::with_clock(config, RealClock::default())
    }
}

impl<C> Throttle<C>
where
    C: Clock + Sync + Send,
{
    /// Create a new instance of `Throttle` driven by `clock`
    #[must_use]
    pub fn with_clock(config: Config, clock: C) -> Self {
        let mode = match config {
            Config::AllOut => Mode::AllOut,
            Config::Stable {
                units_per_second, ..
            } => {
                // `burst` is always `Some` for the stable variant.
                let burst = config.burst().unwrap_or(units_per_second);
                Mode::Stable(Bucket::new(
                    units_per_second,
                    burst,
                    clock.ticks_elapsed(),
                ))
            }
        };
        Self { mode, clock }
    }

    /// The burst capacity of this throttle, `None` if unbounded.
    #[must_use]
    pub fn burst(&self) -> Option<u32> {
        match &self.mode {
            Mode::AllOut => None,
            Mode::Stable(bucket) => Some(bucket.burst()),
        }
    }

    /// The clock driving this throttle.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Reserve `request` units as of the clock's current reading.
    ///
    /// The returned [`Reservation`] has already drawn down the bucket; the
    /// caller is expected to wait out its delay before acting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] if `request` can never be satisfied. The
    /// bucket is not modified in that case.
    pub fn reserve(&mut self, request: u32) -> Result<Reservation, Error> {
        match &mut self.mode {
            Mode::AllOut => Ok(Reservation::immediate()),
            Mode::Stable(bucket) => bucket.reserve(request, self.clock.ticks_elapsed()),
        }
    }

    /// Wait for `request` capacity to be available in the throttle, returning
    /// how long the caller was made to wait.
    ///
    /// # Errors
    ///
    /// See documentation in `Error`
    pub async fn wait_for(&mut self, request: u32) -> Result<Duration, Error> {
        let reservation = self.reserve(request)?;
        self.clock.wait(reservation.delay_ticks()).await;
        Ok(reservation.delay())
    }

    /// Wait `delay` on this throttle's clock without reserving anything.
    pub async fn pause(&self, delay: Duration) {
        let ticks = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX);
        self.clock.wait(ticks).await;
    }
}
