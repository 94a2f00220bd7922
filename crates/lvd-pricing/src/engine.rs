//! Fare breakdown and card-fee gross-up.
//!
//! Fee order is fixed: dispatcher fee and app fee are both computed on the
//! base fare (not on each other), then the card fee is grossed up on top of
//! the subtotal so the processor's percentage-of-total cut never eats into
//! the subtotal.
//!
//! Invariants:
//! - `subtotal = base_fare + dispatcher_fee + app_fee`.
//! - `total` is the smallest whole-cent charge with
//!   `total - (total * card_rate + card_fixed) >= subtotal`.
//! - `card_fee = total - subtotal`; the breakdown always sums exactly.

use crate::money::Cents;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// All configurable rates in one place. Loaded from config; the defaults are
/// the production schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    /// Dispatcher fee on the base fare, basis points.
    pub dispatcher_fee_bps: u32,
    /// App fee on the base fare, basis points.
    pub app_fee_bps: u32,
    /// Card processor percentage of the charged total, basis points.
    pub card_rate_bps: u32,
    /// Card processor fixed fee per charge, cents.
    pub card_fixed_cents: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            dispatcher_fee_bps: 2_000,
            app_fee_bps: 1_000,
            card_rate_bps: 290,
            card_fixed_cents: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Breakdown
// ---------------------------------------------------------------------------

/// One fully priced fare. Every field is whole cents and the identities in
/// the module doc hold by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_fare_cents: Cents,
    pub dispatcher_fee_cents: Cents,
    pub app_fee_cents: Cents,
    pub subtotal_cents: Cents,
    pub card_fee_cents: Cents,
    pub total_cents: Cents,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingError {
    /// Fares are charges, never credits.
    NegativeAmount(Cents),
    /// A processor rate at or above 100% makes the gross-up undefined.
    CardRateTooHigh { rate_bps: u32 },
    /// A fee or total left the `i64` cent range.
    Overflow,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::NegativeAmount(c) => write!(f, "negative amount: {c}"),
            PricingError::CardRateTooHigh { rate_bps } => {
                write!(f, "card rate {rate_bps} bps leaves nothing to charge")
            }
            PricingError::Overflow => write!(f, "amount overflows the cent range"),
        }
    }
}

impl std::error::Error for PricingError {}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Price a base fare end to end.
pub fn breakdown(schedule: &FeeSchedule, base_fare: Cents) -> Result<PriceBreakdown, PricingError> {
    if base_fare.is_negative() {
        return Err(PricingError::NegativeAmount(base_fare));
    }
    let dispatcher = base_fare
        .checked_mul_bps_half_up(schedule.dispatcher_fee_bps)
        .ok_or(PricingError::Overflow)?;
    let app = base_fare
        .checked_mul_bps_half_up(schedule.app_fee_bps)
        .ok_or(PricingError::Overflow)?;
    let subtotal = base_fare
        .checked_add(dispatcher)
        .and_then(|s| s.checked_add(app))
        .ok_or(PricingError::Overflow)?;
    let total = gross_up(schedule, subtotal)?;
    Ok(PriceBreakdown {
        base_fare_cents: base_fare,
        dispatcher_fee_cents: dispatcher,
        app_fee_cents: app,
        subtotal_cents: subtotal,
        card_fee_cents: total - subtotal,
        total_cents: total,
    })
}

/// Smallest whole-cent charge that still nets `subtotal` after the card
/// processor takes `rate * total + fixed`.
///
/// `total = ceil((subtotal + fixed) * 10_000 / (10_000 - rate_bps))`, in
/// `i128` so the division cannot overflow for any representable subtotal.
/// A total past the `i64` cent range is refused, never truncated.
pub fn gross_up(schedule: &FeeSchedule, subtotal: Cents) -> Result<Cents, PricingError> {
    if subtotal.is_negative() {
        return Err(PricingError::NegativeAmount(subtotal));
    }
    if schedule.card_rate_bps >= 10_000 {
        return Err(PricingError::CardRateTooHigh {
            rate_bps: schedule.card_rate_bps,
        });
    }
    let numer = (subtotal.raw() as i128 + schedule.card_fixed_cents as i128) * 10_000;
    let denom = (10_000 - schedule.card_rate_bps) as i128;
    let total = (numer + denom - 1) / denom;
    i64::try_from(total)
        .map(Cents::new)
        .map_err(|_| PricingError::Overflow)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
