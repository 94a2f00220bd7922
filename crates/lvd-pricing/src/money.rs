//! Whole-cent money type.
//!
//! # Motivation
//!
//! All money in this system is whole cents stored as `i64`. Raw `i64` for
//! money is error-prone: it allows accidental arithmetic with unrelated
//! integers (basis points, sequence numbers, IDs) without any compile-time
//! signal. `Cents` wraps the raw value so the type system keeps monetary
//! amounts separate from everything else.
//!
//! # Scale
//!
//! 1 USD = `Cents(100)`. Rates are not `Cents`; they are plain basis points
//! (`u32`) and only ever meet money through [`Cents::checked_mul_bps_half_up`].
//!
//! # Rounding
//!
//! The one rounding rule in the fee schedule is round-half-up on basis-point
//! products. It lives here, next to the type, so no caller reimplements it.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};

// ---------------------------------------------------------------------------
// Cents newtype
// ---------------------------------------------------------------------------

/// A monetary amount in whole cents.
///
/// No `From<i64>` impl on purpose; construction goes through [`Cents::new`]
/// so a raw integer becoming money is always visible in the code.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Cents(raw)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `amount * bps / 10_000`, rounded half-up.
    ///
    /// Defined for non-negative amounts only; fares and fees never go below
    /// zero. The intermediate product is widened to `i128`; a rounded result
    /// outside the `i64` cent range returns `None`, and callers must handle
    /// it explicitly.
    #[inline]
    pub fn checked_mul_bps_half_up(self, bps: u32) -> Option<Cents> {
        debug_assert!(self.0 >= 0, "checked_mul_bps_half_up on negative amount");
        let product = self.0 as i128 * bps as i128;
        i64::try_from((product + 5_000) / 10_000).ok().map(Cents)
    }

    /// Overflow-checked addition. Returns `None` instead of wrapping; money
    /// leaving the `i64` cent range is an error, not a routine saturation.
    #[inline]
    pub fn checked_add(self, rhs: Cents) -> Option<Cents> {
        self.0.checked_add(rhs.0).map(Cents)
    }
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Cents)
// ---------------------------------------------------------------------------

impl Add for Cents {
    type Output = Cents;
    #[inline]
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Cents;
    #[inline]
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl AddAssign for Cents {
    #[inline]
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Cents {
    #[inline]
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 -= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dollars = self.0 / 100;
        let frac = (self.0 % 100).abs();
        // When |value| < $1 and value is negative, dollars truncates to 0,
        // losing the sign. Emit "-0" explicitly in that case.
        if self.0 < 0 && dollars == 0 {
            write!(f, "-{dollars}.{frac:02}")
        } else {
            write!(f, "{dollars}.{frac:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
