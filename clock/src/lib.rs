//! Slot timing relative to genesis and a [`Stream`] of ticks within slots.
//!
//! The ticker is built on [`Interval`]. [`Instant`]s are opaque, so the first tick is located
//! by pairing an [`Instant`] with a [`SystemTime`] taken at the same moment. Delays of
//! individual ticks do not accumulate.
//!
//! [`Instant`]:  std::time::Instant
//! [`Interval`]: tokio::time::Interval

use core::{error::Error, num::NonZeroU64, time::Duration};
use std::time::{Instant, SystemTime, SystemTimeError};

use anyhow::Result;
use futures::stream::{Stream, StreamExt as _};
use helper_functions::misc;
use serde::{Deserialize, Serialize};
use strum::AsRefStr;
use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use types::{
    config::Config,
    consts::GENESIS_SLOT,
    primitives::{Epoch, Slot, UnixSeconds},
};

#[cfg(test)]
mod fake_time;

const TICKS_PER_SLOT: u32 = 3;

pub trait InstantLike: Sized {
    fn checked_add(self, duration: Duration) -> Option<Self>;
}

pub trait SystemTimeLike: Copy {
    type Error: Error + Send + Sync + 'static;

    const UNIX_EPOCH: Self;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error>;
}

impl InstantLike for Instant {
    fn checked_add(self, duration: Duration) -> Option<Self> {
        Self::checked_add(&self, duration)
    }
}

impl SystemTimeLike for SystemTime {
    type Error = SystemTimeError;

    const UNIX_EPOCH: Self = Self::UNIX_EPOCH;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error> {
        Self::duration_since(&self, earlier)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Deserialize, Serialize)]
pub struct Tick {
    pub slot: Slot,
    pub kind: TickKind,
}

impl Tick {
    #[must_use]
    pub const fn start_of_slot(slot: Slot) -> Self {
        Self::new(slot, TickKind::Propose)
    }

    pub fn current(config: &Config, genesis_time: UnixSeconds) -> Result<Self> {
        let duration_since_unix_epoch = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
        Ok(Self::from_duration(config, duration_since_unix_epoch, genesis_time))
    }

    #[must_use]
    pub const fn epoch(self, config: &Config) -> Epoch {
        misc::compute_epoch_at_slot(config, self.slot)
    }

    #[must_use]
    pub const fn is_start_of_slot(self) -> bool {
        matches!(self.kind, TickKind::Propose)
    }

    #[must_use]
    pub const fn is_start_of_epoch(self, config: &Config) -> bool {
        misc::is_epoch_start(config, self.slot) && self.is_start_of_slot()
    }

    fn from_duration(
        config: &Config,
        duration_since_unix_epoch: Duration,
        genesis_time: UnixSeconds,
    ) -> Self {
        let duration_since_genesis =
            duration_since_unix_epoch.saturating_sub(Duration::from_secs(genesis_time));

        // `Duration` does not implement `Div<Duration>` or `Rem<Duration>`.
        let nanos_since_genesis = duration_since_genesis.as_nanos();
        let nanos_per_slot = config.slot_duration().as_nanos();
        let nanos_per_tick = tick_duration(config).as_nanos();

        let slots_since_genesis =
            u64::try_from(nanos_since_genesis / nanos_per_slot).unwrap_or(u64::MAX);

        let kind = match (nanos_since_genesis % nanos_per_slot) / nanos_per_tick {
            0 => TickKind::Propose,
            1 => TickKind::Attest,
            _ => TickKind::Aggregate,
        };

        Self::new(GENESIS_SLOT.saturating_add(slots_since_genesis), kind)
    }

    const fn new(slot: Slot, kind: TickKind) -> Self {
        Self { slot, kind }
    }

    fn next(self) -> Result<Self> {
        let Self { slot, kind } = self;

        let next = match kind {
            TickKind::Propose => Self::new(slot, TickKind::Attest),
            TickKind::Attest => Self::new(slot, TickKind::Aggregate),
            TickKind::Aggregate => {
                Self::start_of_slot(slot.checked_add(1).ok_or(ClockError::RanOutOfSlots)?)
            }
        };

        Ok(next)
    }
}

/// Intervals of a slot. Blocks are proposed at the start of a slot, attestations are made a third
/// of the way in and aggregated two thirds of the way in.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, AsRefStr, Deserialize, Serialize,
)]
pub enum TickKind {
    Propose,
    Attest,
    Aggregate,
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClockError {
    #[error("time of next tick overflowed")]
    NextInstantOverflow,
    #[error("ran out of slots")]
    RanOutOfSlots,
}

/// Time since the Unix epoch at which `slot` starts.
#[must_use]
pub fn slot_start(config: &Config, genesis_time: UnixSeconds, slot: Slot) -> Duration {
    let slots_since_genesis = slot.saturating_sub(GENESIS_SLOT);

    Duration::from_secs(genesis_time).saturating_add(Duration::from_secs(
        config.seconds_per_slot.get().saturating_mul(slots_since_genesis),
    ))
}

/// Slot in progress at `duration_since_unix_epoch`. Times before genesis map to the genesis slot.
#[must_use]
pub fn slot_at(
    config: &Config,
    genesis_time: UnixSeconds,
    duration_since_unix_epoch: Duration,
) -> Slot {
    Tick::from_duration(config, duration_since_unix_epoch, genesis_time).slot
}

pub fn current_slot(config: &Config, genesis_time: UnixSeconds) -> Result<Slot> {
    Tick::current(config, genesis_time).map(|tick| tick.slot)
}

/// Whether a block for `slot` seen at `duration_since_unix_epoch` arrived early enough in its
/// slot to receive the proposer boost.
///
/// A block is timely if it arrives before `seconds_per_slot / boost_denominator` has passed since
/// the start of its slot. Blocks arriving before their slot starts count as timely.
#[must_use]
pub fn is_timely(
    config: &Config,
    genesis_time: UnixSeconds,
    slot: Slot,
    duration_since_unix_epoch: Duration,
    boost_denominator: NonZeroU64,
) -> bool {
    let elapsed = duration_since_unix_epoch.saturating_sub(slot_start(config, genesis_time, slot));
    let threshold_millis = config.seconds_per_slot.get().saturating_mul(1000) / boost_denominator;

    elapsed < Duration::from_millis(threshold_millis)
}

pub fn ticks(
    config: &Config,
    genesis_time: UnixSeconds,
) -> Result<impl Stream<Item = Result<Tick>> + use<>> {
    // The `Instant` and `SystemTime` obtained here are assumed to refer to the same moment.
    // The error is negligible compared to clock differences between nodes.
    let now_instant = Instant::now();
    let now_system_time = SystemTime::now();

    let (mut next_tick, next_instant) =
        next_tick_with_instant(config, now_instant, now_system_time, genesis_time)?;

    let interval = tokio::time::interval_at(next_instant.into(), tick_duration(config));

    Ok(IntervalStream::new(interval).map(move |_| {
        let current_tick = next_tick;
        next_tick = current_tick.next()?;
        Ok(current_tick)
    }))
}

fn next_tick_with_instant<I: InstantLike, S: SystemTimeLike>(
    config: &Config,
    now_instant: I,
    now_system_time: S,
    genesis_time: UnixSeconds,
) -> Result<(Tick, I)> {
    let unix_epoch_to_now = now_system_time.duration_since(S::UNIX_EPOCH)?;
    let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

    // `Instant`s before the platform specific epoch may panic, so only additions are performed.
    let (next_tick, now_to_next_tick) = if unix_epoch_to_now <= unix_epoch_to_genesis {
        (
            Tick::start_of_slot(GENESIS_SLOT),
            unix_epoch_to_genesis - unix_epoch_to_now,
        )
    } else {
        let genesis_to_now = unix_epoch_to_now - unix_epoch_to_genesis;
        let tick_duration = tick_duration(config);
        let current_tick = Tick::from_duration(config, unix_epoch_to_now, genesis_time);

        let genesis_to_slot =
            slot_start(config, genesis_time, current_tick.slot) - unix_epoch_to_genesis;
        let current_tick_start = genesis_to_slot + tick_duration * current_tick.kind as u32;

        if current_tick_start == genesis_to_now {
            (current_tick, Duration::ZERO)
        } else {
            let next_tick_start = current_tick_start + tick_duration;
            (current_tick.next()?, next_tick_start - genesis_to_now)
        }
    };

    let next_instant = now_instant
        .checked_add(now_to_next_tick)
        .ok_or(ClockError::NextInstantOverflow)?;

    Ok((next_tick, next_instant))
}

fn tick_duration(config: &Config) -> Duration {
    config.slot_duration() / TICKS_PER_SLOT
}

#[cfg(test)]
mod tests {
    use futures::future::FutureExt as _;
    use nonzero_ext::nonzero;
    use test_case::test_case;

    use crate::fake_time::{FakeInstant, FakeSystemTime};

    use super::*;

    const GENESIS_TIME: UnixSeconds = 1_000;

    // Minimal slots last 6 seconds, so ticks are 2 seconds apart.
    #[test_case(999, Tick::start_of_slot(0))]
    #[test_case(1_000, Tick::start_of_slot(0))]
    #[test_case(1_003, Tick::new(0, TickKind::Attest))]
    #[test_case(1_005, Tick::new(0, TickKind::Aggregate))]
    #[test_case(1_006, Tick::start_of_slot(1))]
    #[test_case(1_017, Tick::new(2, TickKind::Aggregate))]
    fn tick_at_time(time: UnixSeconds, expected: Tick) {
        let config = Config::minimal();
        let actual = Tick::from_duration(&config, Duration::from_secs(time), GENESIS_TIME);

        assert_eq!(actual, expected);
    }

    #[test]
    fn slot_start_is_the_inverse_of_slot_at() {
        let config = Config::minimal();

        for slot in 0..20 {
            let start = slot_start(&config, GENESIS_TIME, slot);

            assert_eq!(slot_at(&config, GENESIS_TIME, start), slot);
            assert_eq!(
                slot_at(&config, GENESIS_TIME, start + Duration::from_millis(5_999)),
                slot,
            );
        }
    }

    // With a denominator of 3 the boost window of a 6 second slot is 2 seconds long.
    #[test_case(Duration::from_secs(1_030), true; "at slot start")]
    #[test_case(Duration::from_millis(1_031_999), true; "just before the deadline")]
    #[test_case(Duration::from_secs(1_032), false; "at the deadline")]
    #[test_case(Duration::from_secs(1_029), true; "before slot start")]
    #[test_case(Duration::from_secs(1_040), false; "in the next slot")]
    fn timeliness(seen_at: Duration, expected: bool) {
        let config = Config::minimal();

        assert_eq!(
            is_timely(&config, GENESIS_TIME, 5, seen_at, nonzero!(3_u64)),
            expected,
        );
    }

    #[test_case(0, 1_000, Tick::start_of_slot(0), 1_000)]
    #[test_case(1_000, 1_000, Tick::start_of_slot(0), 0)]
    #[test_case(1_001, 1_000, Tick::new(0, TickKind::Attest), 1)]
    #[test_case(1_002, 1_000, Tick::new(0, TickKind::Attest), 0)]
    #[test_case(1_005, 1_000, Tick::start_of_slot(1), 1)]
    fn next_tick(
        now: u64,
        genesis_time: UnixSeconds,
        expected_tick: Tick,
        wait: u64,
    ) -> Result<()> {
        let config = Config::minimal();
        let start = Duration::from_secs(10);

        let (tick, instant) = next_tick_with_instant(
            &config,
            FakeInstant(start),
            FakeSystemTime(Duration::from_secs(now)),
            genesis_time,
        )?;

        assert_eq!(tick, expected_tick);
        assert_eq!(instant, FakeInstant(start + Duration::from_secs(wait)));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_produced_every_third_of_a_slot() -> Result<()> {
        let genesis_time = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs()
            + 1;

        let config = Config::minimal();
        let mut ticks = ticks(&config, genesis_time)?;
        let mut next_tick = || ticks.next().now_or_never().flatten().transpose();

        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(next_tick()?, Some(Tick::start_of_slot(0)));
        assert_eq!(next_tick()?, None);

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Attest)));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(next_tick()?, Some(Tick::new(0, TickKind::Aggregate)));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(next_tick()?, Some(Tick::start_of_slot(1)));
        assert_eq!(next_tick()?, None);

        Ok(())
    }
}
