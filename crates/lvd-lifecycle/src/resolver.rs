//! Canonical stage derivation.
//!
//! The raw columns are redundant and written by clients of different
//! generations, so any combination can show up. This module is the single
//! place that knows the derivation order. Bands, highest first:
//!
//! 1. Terminal signals. `ride_stage == "completed"` or a terminal
//!    `legacy_status`. Within the band: refunded > disputed > completed >
//!    cancelled > expired.
//! 2. Ride progress. Most advanced of `ride_stage`
//!    ("heading_to_pickup" ... "in_transit"), the chauffeur flag
//!    ("heading"/"arrived") and the rider flag ("onboard"):
//!    in transit > onboard > arrived > heading.
//! 3. Payment. `all_set` (or rider "paid" plus chauffeur "ready"), else the
//!    one-sided confirmations.
//! 4. Offer. Accepted beats sent; a recorded accepted price that differs
//!    from the quote also counts as an offer round.
//! 5. Chauffeur acceptance.
//! 6. Pending.
//!
//! Invariants:
//! - Total: every input resolves to some stage. Unrecognized tokens are
//!   treated as absent, never as errors.
//! - Pure: no IO, no clock. Same fields in, same stage out.
//! - Raw fields are never mutated here and never surfaced past the store.

use crate::fields::RawBookingFields;
use crate::stage::Stage;

use serde::Serialize;

/// A disagreement between raw fields that the cascade had to paper over.
/// Callers log these; resolution itself never fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Contradiction {
    /// More than one terminal signal present. Band precedence kept `chosen`.
    TerminalConflict { chosen: Stage, also: Vec<Stage> },
}

impl std::fmt::Display for Contradiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Contradiction::TerminalConflict { chosen, also } => {
                write!(f, "conflicting terminal signals: kept {chosen}, also saw ")?;
                for (i, s) in also.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{s}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub stage: Stage,
    pub contradictions: Vec<Contradiction>,
}

/// Canonical stage for one set of raw fields.
pub fn resolve(raw: &RawBookingFields) -> Stage {
    resolve_with_audit(raw).stage
}

/// Same as [`resolve`] but also reports contradictions for the caller to log.
pub fn resolve_with_audit(raw: &RawBookingFields) -> Resolution {
    let legacy = raw.legacy_status.as_deref();
    let rider = raw.rider_stage_flag.as_deref();
    let chauffeur = raw.chauffeur_stage_flag.as_deref();
    let ride = raw.ride_stage.as_deref();
    let payment = raw.payment_confirmation_stage.as_deref();

    // Band 1: terminal signals, collected in precedence order.
    let mut terminal = Vec::new();
    if legacy == Some("refunded") {
        terminal.push(Stage::Refunded);
    }
    if legacy == Some("disputed") {
        terminal.push(Stage::Disputed);
    }
    if ride == Some("completed") || legacy == Some("completed") {
        terminal.push(Stage::Completed);
    }
    if legacy == Some("cancelled") {
        terminal.push(Stage::Cancelled);
    }
    if legacy == Some("expired") {
        terminal.push(Stage::Expired);
    }
    if let Some((chosen, rest)) = terminal.split_first() {
        let contradictions = if rest.is_empty() {
            Vec::new()
        } else {
            vec![Contradiction::TerminalConflict {
                chosen: *chosen,
                also: rest.to_vec(),
            }]
        };
        return Resolution {
            stage: *chosen,
            contradictions,
        };
    }

    // Band 2: ride progress, most advanced signal wins. The ride_stage
    // column and the chauffeur flag use different vocabularies for the same
    // checkpoints; both are mapped onto one rank scale.
    let mut rank = match ride {
        Some("in_transit") => 4,
        Some("passenger_onboard") => 3,
        Some("arrived_at_pickup") => 2,
        Some("heading_to_pickup") => 1,
        _ => 0,
    };
    rank = rank.max(match chauffeur {
        Some("arrived") => 2,
        Some("heading") => 1,
        _ => 0,
    });
    if rider == Some("onboard") {
        rank = rank.max(3);
    }
    let ride_stage = match rank {
        4 => Some(Stage::InTransit),
        3 => Some(Stage::PassengerOnboard),
        2 => Some(Stage::DriverArrivedAtPickup),
        1 => Some(Stage::DriverHeadingToPickup),
        _ => None,
    };
    if let Some(stage) = ride_stage {
        return Resolution {
            stage,
            contradictions: Vec::new(),
        };
    }

    // Band 3: payment confirmations.
    let rider_paid = rider == Some("paid");
    if payment == Some("all_set") || (rider_paid && chauffeur == Some("ready")) {
        return done(Stage::AllSet);
    }
    if payment == Some("rider_confirmed") || raw.paid_at.is_some() || rider_paid {
        return done(Stage::PaymentConfirmedAwaitingCounterpart);
    }

    // Band 4: offer round. An accepted price that does not match the quote
    // (or exists without one) means an offer went out and came back.
    if legacy == Some("offer_accepted") {
        return done(Stage::OfferAccepted);
    }
    let renegotiated = match (raw.accepted_price_cents, raw.quoted_price_cents) {
        (Some(a), Some(q)) => a != q,
        (Some(_), None) => true,
        _ => false,
    };
    if legacy == Some("offer_sent") || renegotiated {
        return done(Stage::OfferSent);
    }

    // Band 5: chauffeur acceptance.
    if chauffeur == Some("accepted") || legacy == Some("accepted") {
        return done(Stage::DriverAccepted);
    }

    done(Stage::Pending)
}

fn done(stage: Stage) -> Resolution {
    Resolution {
        stage,
        contradictions: Vec::new(),
    }
}
