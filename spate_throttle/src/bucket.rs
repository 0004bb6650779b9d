//! Token bucket with reservation semantics
//!
//! The bucket refills linearly with time up to a burst ceiling. A reservation
//! always draws down the bucket immediately, possibly into overdraft, and
//! tells the caller how long to wait before the reserved capacity has
//! actually been refilled. Because the overdraft is carried forward,
//! back-to-back reservations compose: no unit of capacity is ever handed out
//! twice.

use std::{cmp, num::NonZeroU32};

use crate::Error;

/// Number of clock ticks in one second. One tick is one microsecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000;

// Capacity is tracked in micro-units, one millionth of a unit. With this
// scaling each tick refills exactly `rate` micro-units and no precision is
// lost to floating point.
const SCALE: i128 = 1_000_000;

/// The outcome of a granted request for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Reservation {
    delay_ticks: u64,
}

impl Reservation {
    pub(crate) fn immediate() -> Self {
        Self { delay_ticks: 0 }
    }

    /// Ticks the caller must wait before the reservation is spent.
    #[must_use]
    pub fn delay_ticks(&self) -> u64 {
        self.delay_ticks
    }

    /// The delay as a [`std::time::Duration`].
    #[must_use]
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_micros(self.delay_ticks)
    }

    /// Whether the reservation may be acted on without waiting.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.delay_ticks == 0
    }
}

/// A token bucket.
///
/// The non-async interior of [`crate::Throttle`]. All time is passed in
/// explicitly as absolute ticks which keeps the arithmetic here easy to test
/// and reason about.
#[derive(Debug, Clone, Copy)]
pub struct Bucket {
    /// Units refilled per second. Equivalently, micro-units per tick.
    rate: u64,
    /// The ceiling on accumulated capacity, in units.
    burst: u64,
    /// Capacity in micro-units as of `last_tick`. Negative when reservations
    /// have been made against capacity that has not yet refilled.
    balance: i128,
    /// Monotonically increasing recording of the last tick at each request.
    last_tick: u64,
}

impl Bucket {
    /// Create a new, full `Bucket` as of `now` ticks.
    #[must_use]
    pub fn new(rate: NonZeroU32, burst: NonZeroU32, now: u64) -> Self {
        let burst = u64::from(burst.get());
        Self {
            rate: u64::from(rate.get()),
            burst,
            balance: i128::from(burst) * SCALE,
            last_tick: now,
        }
    }

    /// The burst capacity of this bucket, in units.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn burst(&self) -> u32 {
        // Constructed from a u32, cannot truncate.
        self.burst as u32
    }

    /// The refill rate of this bucket, in units per second.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rate(&self) -> u32 {
        self.rate as u32
    }

    /// Whole units available for immediate reservation at `now`. Does not
    /// modify the bucket.
    #[must_use]
    pub fn available(&self, now: u64) -> u64 {
        let balance = self.refilled(now);
        if balance <= 0 {
            0
        } else {
            u64::try_from(balance / SCALE).unwrap_or(u64::MAX)
        }
    }

    /// Reserve `request` units at `now` ticks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] if `request` exceeds the burst capacity.
    /// The bucket is left untouched in that case.
    pub fn reserve(&mut self, request: u32, now: u64) -> Result<Reservation, Error> {
        // Fast bail-out. There's no way for this to ever be satisfied and is a
        // bug on the part of the caller, arguably.
        if u64::from(request) > self.burst {
            return Err(Error::Capacity {
                requested: request,
                burst: self.burst(),
            });
        }
        if request == 0 {
            return Ok(Reservation::immediate());
        }

        let balance = self.refilled(now) - i128::from(request) * SCALE;
        self.balance = balance;
        self.last_tick = cmp::max(self.last_tick, now);

        if balance >= 0 {
            return Ok(Reservation::immediate());
        }
        // Round up: the caller must not act before the overdraft is refilled.
        let rate = i128::from(self.rate);
        let delay_ticks = (-balance + rate - 1) / rate;
        Ok(Reservation {
            delay_ticks: u64::try_from(delay_ticks).unwrap_or(u64::MAX),
        })
    }

    /// The balance at `now` after refill, capped at burst. A clock that reads
    /// earlier than the last request refills nothing.
    fn refilled(&self, now: u64) -> i128 {
        let elapsed = now.saturating_sub(self.last_tick);
        let refill = i128::from(elapsed) * i128::from(self.rate);
        cmp::min(
            self.balance.saturating_add(refill),
            i128::from(self.burst) * SCALE,
        )
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use proptest::{collection, prelude::*};

    use super::{Bucket, TICKS_PER_SECOND};
    use crate::Error;

    fn bucket(rate: u32, burst: u32) -> Bucket {
        Bucket::new(
            NonZeroU32::new(rate).unwrap(),
            NonZeroU32::new(burst).unwrap(),
            0,
        )
    }

    #[test]
    fn starts_full() {
        let b = bucket(990, 990);
        assert_eq!(b.available(0), 990);
        assert_eq!(b.burst(), 990);
        assert_eq!(b.rate(), 990);
    }

    #[test]
    fn overdraft_is_carried_forward() {
        let mut b = bucket(990, 990);
        assert_eq!(b.reserve(500, 0).unwrap().delay_ticks(), 0);
        // 490 left, 10 short.
        let second = b.reserve(500, 0).unwrap();
        assert_eq!(second.delay_ticks(), (10 * TICKS_PER_SECOND).div_ceil(990));
        // 510 short now.
        let third = b.reserve(500, 0).unwrap();
        assert_eq!(third.delay_ticks(), (510 * TICKS_PER_SECOND).div_ceil(990));
        assert!(third.delay().as_secs_f64() >= (1500.0 - 990.0) / 990.0);
        assert_eq!(b.available(0), 0);
    }

    #[test]
    fn waiting_between_reservations_composes() {
        // Same scenario as above but the caller honours each delay before
        // asking again. Total wait is the same.
        let mut b = bucket(990, 990);
        let mut now = 0;
        for _ in 0..3 {
            now += b.reserve(500, now).unwrap().delay_ticks();
        }
        let expected = (510.0 / 990.0) * TICKS_PER_SECOND as f64;
        assert!(now as f64 >= expected);
        assert!((now as f64) < expected + 2.0);
    }

    #[test]
    fn rejection_does_not_mutate() {
        let mut b = bucket(100, 100);
        assert_eq!(b.reserve(60, 0).unwrap().delay_ticks(), 0);
        assert_eq!(b.available(10), 40);
        assert_eq!(
            b.reserve(101, 10),
            Err(Error::Capacity {
                requested: 101,
                burst: 100
            })
        );
        assert_eq!(b.available(10), 40);
        assert_eq!(b.last_tick, 0);
    }

    #[test]
    fn zero_request_is_free() {
        let mut b = bucket(10, 10);
        assert!(b.reserve(0, 5).unwrap().is_immediate());
        assert_eq!(b.available(5), 10);
        assert_eq!(b.last_tick, 0);
    }

    #[test]
    fn steady_state_needs_no_delay() {
        let mut b = bucket(1_000, 1_000);
        // Drain the initial burst.
        assert!(b.reserve(1_000, 0).unwrap().is_immediate());
        let spacing = 500 * TICKS_PER_SECOND / 1_000;
        let mut now = 0;
        for _ in 0..1_000 {
            now += spacing;
            assert!(b.reserve(500, now).unwrap().is_immediate());
            assert_eq!(b.available(now), 0);
        }
    }

    #[test]
    fn backwards_clock_refills_nothing() {
        let mut b = bucket(100, 100);
        assert!(b.reserve(100, 1_000).unwrap().is_immediate());
        let r = b.reserve(1, 10).unwrap();
        assert_eq!(r.delay_ticks(), TICKS_PER_SECOND / 100);
        assert_eq!(b.last_tick, 1_000);
    }

    #[test]
    fn copies_reserve_independently() {
        let mut b = bucket(100, 100);
        assert!(b.reserve(40, 0).unwrap().is_immediate());
        let mut fork = b;
        assert!(fork.reserve(60, 0).unwrap().is_immediate());
        assert_eq!(fork.available(0), 0);
        assert_eq!(b.available(0), 60);
        assert_eq!(b.reserve(60, 0).unwrap().delay_ticks(), 0);
    }

    #[test]
    fn refill_caps_at_burst() {
        let mut b = bucket(100, 50);
        assert!(b.reserve(50, 0).unwrap().is_immediate());
        assert_eq!(b.available(100 * TICKS_PER_SECOND), 50);
    }

    fn requests(burst: u32) -> impl Strategy<Value = Vec<(u32, u64)>> {
        collection::vec((1..=burst, 0..2 * TICKS_PER_SECOND), 1..200)
    }

    fn granted_never_exceeds_bound_inner(
        rate: u32,
        burst: u32,
        requests: Vec<(u32, u64)>,
    ) -> Result<(), TestCaseError> {
        let mut b = bucket(rate, burst);
        let mut now: u64 = 0;
        let mut grants: Vec<(u64, u64)> = Vec::with_capacity(requests.len());
        for (request, gap) in requests {
            now += gap;
            let reservation = b.reserve(request, now).expect("request within burst");
            now += reservation.delay_ticks();
            grants.push((now, u64::from(request)));
        }

        // Between any two grants `i <= j` the units granted must not exceed
        // what the bucket can hold plus what it refills in the window, with
        // one tick of slack for the rounded-up delay.
        let rate = u128::from(rate);
        let burst = u128::from(burst) * u128::from(TICKS_PER_SECOND);
        for i in 0..grants.len() {
            let mut sum: u128 = 0;
            for j in i..grants.len() {
                sum += u128::from(grants[j].1) * u128::from(TICKS_PER_SECOND);
                let window = u128::from(grants[j].0 - grants[i].0);
                let bound = burst + rate * (window + 1);
                prop_assert!(
                    sum <= bound,
                    "granted {sum} micro-units in {window} ticks, bound {bound}"
                );
            }
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            .. ProptestConfig::default()
        })]
        #[test]
        fn granted_never_exceeds_bound(
            rate in 1..10_000u32,
            burst in 1..10_000u32,
            seed_requests in requests(10_000),
        ) {
            let requests = seed_requests
                .into_iter()
                .map(|(r, gap)| (((r - 1) % burst) + 1, gap))
                .collect();
            granted_never_exceeds_bound_inner(rate, burst, requests)?;
        }

        #[test]
        fn oversized_requests_never_mutate(
            burst in 1..u32::MAX,
            over in 1..1_000u32,
            now in 0..u64::from(u32::MAX),
        ) {
            let mut b = bucket(burst, burst);
            let request = burst.saturating_add(over);
            prop_assume!(request > burst);
            let before = b.available(now);
            prop_assert!(b.reserve(request, now).is_err());
            prop_assert_eq!(before, b.available(now));
            prop_assert_eq!(b.last_tick, 0);
        }
    }
}
