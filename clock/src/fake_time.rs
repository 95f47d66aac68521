//! Stand-ins for [`Instant`] and [`SystemTime`] with explicit values.
//!
//! [`Instant`]:    std::time::Instant
//! [`SystemTime`]: std::time::SystemTime

use core::time::Duration;

use thiserror::Error;

use crate::{InstantLike, SystemTimeLike};

/// Time as a [`Duration`] after the Unix epoch.
pub type Timespec = Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FakeInstant(pub Timespec);

#[derive(Clone, Copy)]
pub struct FakeSystemTime(pub Timespec);

#[derive(Debug, Error)]
#[error("second time provided was later by {0:?}")]
pub struct FakeSystemTimeError(pub Duration);

impl InstantLike for FakeInstant {
    fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }
}

impl SystemTimeLike for FakeSystemTime {
    type Error = FakeSystemTimeError;

    const UNIX_EPOCH: Self = Self(Duration::ZERO);

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error> {
        let later = self.0;
        let earlier = earlier.0;
        later
            .checked_sub(earlier)
            .ok_or_else(|| FakeSystemTimeError(earlier - later))
    }
}
