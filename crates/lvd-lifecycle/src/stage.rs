//! Canonical lifecycle stages.
//!
//! Invariants:
//! - Every booking is in exactly one canonical stage at any point in time.
//! - Terminal stages never progress (except the explicit post-terminal edges
//!   in the validator, e.g. completed -> refunded).
//! - Raw legacy fields never reach callers; they are collapsed to `Stage` by
//!   the resolver before anything else looks at them.

use serde::{Deserialize, Serialize};

/// Canonical booking stage. Wire and DB form is the snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    DriverAccepted,
    OfferSent,
    OfferAccepted,
    /// Rider side has paid, chauffeur side not yet confirmed (or vice versa).
    PaymentConfirmedAwaitingCounterpart,
    /// Both sides confirmed. The ride may start.
    AllSet,
    DriverHeadingToPickup,
    DriverArrivedAtPickup,
    PassengerOnboard,
    InTransit,
    Completed,
    Cancelled,
    Expired,
    Refunded,
    Disputed,
}

impl Stage {
    pub const ALL: [Stage; 15] = [
        Stage::Pending,
        Stage::DriverAccepted,
        Stage::OfferSent,
        Stage::OfferAccepted,
        Stage::PaymentConfirmedAwaitingCounterpart,
        Stage::AllSet,
        Stage::DriverHeadingToPickup,
        Stage::DriverArrivedAtPickup,
        Stage::PassengerOnboard,
        Stage::InTransit,
        Stage::Completed,
        Stage::Cancelled,
        Stage::Expired,
        Stage::Refunded,
        Stage::Disputed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::DriverAccepted => "driver_accepted",
            Stage::OfferSent => "offer_sent",
            Stage::OfferAccepted => "offer_accepted",
            Stage::PaymentConfirmedAwaitingCounterpart => "payment_confirmed_awaiting_counterpart",
            Stage::AllSet => "all_set",
            Stage::DriverHeadingToPickup => "driver_heading_to_pickup",
            Stage::DriverArrivedAtPickup => "driver_arrived_at_pickup",
            Stage::PassengerOnboard => "passenger_onboard",
            Stage::InTransit => "in_transit",
            Stage::Completed => "completed",
            Stage::Cancelled => "cancelled",
            Stage::Expired => "expired",
            Stage::Refunded => "refunded",
            Stage::Disputed => "disputed",
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "pending" => Some(Stage::Pending),
            "driver_accepted" => Some(Stage::DriverAccepted),
            "offer_sent" => Some(Stage::OfferSent),
            "offer_accepted" => Some(Stage::OfferAccepted),
            "payment_confirmed_awaiting_counterpart" => {
                Some(Stage::PaymentConfirmedAwaitingCounterpart)
            }
            "all_set" => Some(Stage::AllSet),
            "driver_heading_to_pickup" => Some(Stage::DriverHeadingToPickup),
            "driver_arrived_at_pickup" => Some(Stage::DriverArrivedAtPickup),
            "passenger_onboard" => Some(Stage::PassengerOnboard),
            "in_transit" => Some(Stage::InTransit),
            "completed" => Some(Stage::Completed),
            "cancelled" => Some(Stage::Cancelled),
            "expired" => Some(Stage::Expired),
            "refunded" => Some(Stage::Refunded),
            "disputed" => Some(Stage::Disputed),
            _ => None,
        }
    }

    /// Terminal stages. History still accrues (refund after completion), but
    /// normal forward progress is over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Completed | Stage::Cancelled | Stage::Expired | Stage::Refunded | Stage::Disputed
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for or causing a change. Drives change-feed filtering and
/// history attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Rider,
    Chauffeur,
    Operator,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Rider => "rider",
            ActorRole::Chauffeur => "chauffeur",
            ActorRole::Operator => "operator",
            ActorRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<ActorRole> {
        match s {
            "rider" => Some(ActorRole::Rider),
            "chauffeur" => Some(ActorRole::Chauffeur),
            "operator" => Some(ActorRole::Operator),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
