//! Stage transition gating.
//!
//! One adjacency map, consulted by the store before any stage move is
//! persisted. Staying in place is always legal so that raw-field updates
//! which do not move the canonical stage (note edits, price fills) pass
//! through without special cases.

use crate::stage::Stage;

use serde::Serialize;

/// Stages a booking may move to from `from`. Does not include `from` itself;
/// identity moves are handled by [`validate`].
pub fn legal_next(from: Stage) -> &'static [Stage] {
    use Stage::*;
    match from {
        Pending => &[DriverAccepted, OfferSent, Cancelled, Expired],
        DriverAccepted => &[
            OfferSent,
            PaymentConfirmedAwaitingCounterpart,
            AllSet,
            Cancelled,
            Expired,
        ],
        OfferSent => &[OfferAccepted, Cancelled, Expired],
        OfferAccepted => &[PaymentConfirmedAwaitingCounterpart, AllSet, Cancelled, Expired],
        PaymentConfirmedAwaitingCounterpart => &[AllSet, Cancelled, Refunded],
        AllSet => &[DriverHeadingToPickup, Cancelled, Refunded],
        DriverHeadingToPickup => &[DriverArrivedAtPickup, PassengerOnboard, Cancelled],
        DriverArrivedAtPickup => &[PassengerOnboard, Cancelled],
        PassengerOnboard => &[InTransit, Completed],
        InTransit => &[Completed],
        Completed => &[Refunded, Disputed],
        Cancelled => &[Refunded],
        Disputed => &[Refunded, Completed],
        Expired => &[],
        Refunded => &[],
    }
}

pub fn validate(from: Stage, to: Stage) -> Result<(), InvalidTransition> {
    if from == to || legal_next(from).contains(&to) {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal stage transition {} -> {} (legal: ", self.from, self.to)?;
        let legal = legal_next(self.from);
        if legal.is_empty() {
            f.write_str("none")?;
        } else {
            for (i, s) in legal.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{s}")?;
            }
        }
        f.write_str(")")
    }
}

impl std::error::Error for InvalidTransition {}
