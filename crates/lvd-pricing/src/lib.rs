//! lvd-pricing
//!
//! Integer fare, commission and card-fee arithmetic.
//!
//! Pure logic. No IO, no floats. Every amount is whole cents; every rate is
//! whole basis points. The engine is deterministic so quotes can be
//! recomputed and compared byte-for-byte.

mod engine;
mod money;

pub use engine::{breakdown, gross_up, FeeSchedule, PriceBreakdown, PricingError};
pub use money::Cents;
