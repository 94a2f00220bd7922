//! Raw booking fields as the legacy writers left them.
//!
//! Four generations of clients wrote overlapping status columns. Nothing here
//! is trusted on its own; the resolver is the only reader that may interpret
//! these, and it must tolerate any combination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The redundant raw lifecycle fields of one booking row.
///
/// All fields are optional. A freshly created booking has every one unset,
/// which the resolver maps to `Stage::Pending`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBookingFields {
    /// Oldest writer: one free-form status string for everything.
    pub legacy_status: Option<String>,
    /// Rider app flag ("paid", "onboard", ...).
    pub rider_stage_flag: Option<String>,
    /// Chauffeur app flag ("accepted", "ready", "heading", "arrived", ...).
    pub chauffeur_stage_flag: Option<String>,
    /// Ride progress column ("heading_to_pickup", "arrived_at_pickup",
    /// "passenger_onboard", "in_transit", "completed").
    pub ride_stage: Option<String>,
    /// Payment checkpoint column ("none", "rider_confirmed", "all_set").
    pub payment_confirmation_stage: Option<String>,
    pub quoted_price_cents: Option<i64>,
    pub accepted_price_cents: Option<i64>,
    /// Set exactly once by the payment reconciler, never by clients.
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_provider_reference: Option<String>,
    pub paid_amount_cents: Option<i64>,
    pub paid_currency: Option<String>,
}

/// A partial update to the raw fields, as sent by mutate and legacy-fields
/// callers. `None` leaves the stored value alone.
///
/// Payment provider fields are deliberately absent: `paid_at`,
/// `payment_provider_reference` and the paid amount are owned by the
/// reconciler's mark-paid path so the one-reference-one-booking rule cannot
/// be bypassed through a field patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider_stage_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chauffeur_stage_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_confirmation_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_price_cents: Option<i64>,
    /// Row-level chauffeur assignment, usually sent together with
    /// `chauffeur_stage_flag: "accepted"`. Not a resolver input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chauffeur_id: Option<String>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        *self == FieldPatch::default()
    }

    /// Names of the fields this patch would write, for history records.
    pub fn changed_names(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.legacy_status.is_some() {
            out.push("legacy_status");
        }
        if self.rider_stage_flag.is_some() {
            out.push("rider_stage_flag");
        }
        if self.chauffeur_stage_flag.is_some() {
            out.push("chauffeur_stage_flag");
        }
        if self.ride_stage.is_some() {
            out.push("ride_stage");
        }
        if self.payment_confirmation_stage.is_some() {
            out.push("payment_confirmation_stage");
        }
        if self.quoted_price_cents.is_some() {
            out.push("quoted_price_cents");
        }
        if self.accepted_price_cents.is_some() {
            out.push("accepted_price_cents");
        }
        if self.chauffeur_id.is_some() {
            out.push("chauffeur_id");
        }
        out
    }

    /// Overlays the set fields onto `raw`. `chauffeur_id` is row-level and
    /// applied by the store, not here.
    pub fn apply(&self, raw: &mut RawBookingFields) {
        if let Some(v) = &self.legacy_status {
            raw.legacy_status = Some(v.clone());
        }
        if let Some(v) = &self.rider_stage_flag {
            raw.rider_stage_flag = Some(v.clone());
        }
        if let Some(v) = &self.chauffeur_stage_flag {
            raw.chauffeur_stage_flag = Some(v.clone());
        }
        if let Some(v) = &self.ride_stage {
            raw.ride_stage = Some(v.clone());
        }
        if let Some(v) = &self.payment_confirmation_stage {
            raw.payment_confirmation_stage = Some(v.clone());
        }
        if let Some(v) = self.quoted_price_cents {
            raw.quoted_price_cents = Some(v);
        }
        if let Some(v) = self.accepted_price_cents {
            raw.accepted_price_cents = Some(v);
        }
    }
}
