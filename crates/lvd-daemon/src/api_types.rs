//! Request and response types for all lvd-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::{DateTime, Utc};
use lvd_db::BookingRecord;
use lvd_lifecycle::{ActorRole, FieldPatch, RawBookingFields, Stage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/bookings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub rider_id: String,
    #[serde(default)]
    pub quoted_price_cents: Option<i64>,
}

/// The raw field soup plus the canonical stage derived from it. Every read
/// and every successful write answers with this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub booking_id: Uuid,
    pub rider_id: String,
    pub chauffeur_id: Option<String>,
    pub stage: Stage,
    pub raw: RawBookingFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BookingRecord> for BookingResponse {
    fn from(r: BookingRecord) -> Self {
        Self {
            booking_id: r.booking_id,
            rider_id: r.rider_id,
            chauffeur_id: r.chauffeur_id,
            stage: r.stage,
            raw: r.raw,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// /v1/lifecycle/mutate  /v1/lifecycle/legacy-fields
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateRequest {
    pub booking_id: Uuid,
    pub fields: FieldPatch,
    pub actor_role: ActorRole,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// 409 body when strict gating refuses a stage move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRefusedResponse {
    pub error: String,
    pub from: Stage,
    pub to: Stage,
    /// Stages the booking could legally move to instead.
    pub legal: Vec<Stage>,
}

/// Generic error body for 4xx/5xx responses without richer evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/lifecycle/{id}/changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChangesQuery {
    pub actor_role: ActorRole,
    #[serde(default)]
    pub actor_id: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/payments/webhook  /v1/payments/reconcile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookRequest {
    /// Provider event class, e.g. "charge.succeeded". Logged, not dispatched
    /// on: only settlement events reach this endpoint.
    pub event_type: String,
    pub provider_reference: String,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
}

/// 200 body for an acknowledged payment event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcomeResponse {
    /// "reconciled" | "duplicate_ignored"
    pub outcome: String,
    pub booking_id: Uuid,
    pub stage: Stage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilePollQuery {
    pub reference: String,
    #[serde(default)]
    pub booking_id: Option<Uuid>,
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilePollResponse {
    pub paid: bool,
    pub booking_id: Option<Uuid>,
    /// Present when the poll carried a full event and drove reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/pricing/breakdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PricingQuery {
    pub base_estimate_cents: i64,
}
