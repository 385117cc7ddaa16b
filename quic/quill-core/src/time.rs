// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time passed into the core by the event loop.
//!
//! Nothing in the core reads a clock; every operation that needs the
//! current time takes a [`Timestamp`] argument. Wall-clock seconds for
//! token expiry are passed separately by the caller.

use core::{
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

/// A point in time, measured from the start of the event loop's clock
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    #[inline]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Returns the duration elapsed since `earlier`, or zero if `earlier`
    /// is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_elapsed() {
        let a = Timestamp::from_millis(100);
        let b = Timestamp::from_millis(350);

        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(250));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
        assert_eq!(b - a, Duration::from_millis(250));
        assert_eq!(a + Duration::from_millis(250), b);
    }
}
