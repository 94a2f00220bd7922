//! The `LifecycleStore` contract shared by the Postgres and in-memory
//! backends.
//!
//! Invariants every backend must uphold:
//! - A mutation is one atomic unit: row update + history append land
//!   together or not at all.
//! - The strict path (`mutate`) gates the canonical stage move through the
//!   adjacency map; the legacy path (`apply_raw_fields`) does not, and every
//!   use of it is logged at WARN.
//! - `mark_paid` is idempotent per provider reference: re-delivery of the
//!   same reference is `AlreadyPaid` with zero new history entries, and one
//!   reference can never mark two bookings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use lvd_lifecycle::{ActorRole, FieldPatch, InvalidTransition, RawBookingFields, Stage};

use crate::history::HistoryEntry;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Input for creating a booking. Everything else starts unset and the
/// canonical stage starts at `Pending`.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub rider_id: String,
    pub quoted_price_cents: Option<i64>,
}

/// One booking as the store hands it out: raw fields plus the canonical
/// stage derived from them at load time. The stage is a cache of the
/// resolver output, never an independent source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: Uuid,
    pub rider_id: String,
    pub chauffeur_id: Option<String>,
    pub stage: Stage,
    pub raw: RawBookingFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who performed a mutation.
#[derive(Debug, Clone)]
pub struct Actor {
    pub role: ActorRole,
    pub id: Option<String>,
}

impl Actor {
    pub fn new(role: ActorRole, id: impl Into<String>) -> Self {
        Actor {
            role,
            id: Some(id.into()),
        }
    }

    pub fn system() -> Self {
        Actor {
            role: ActorRole::System,
            id: None,
        }
    }
}

/// A payment confirmation as delivered by webhook or poll. Transient; only
/// the fields it writes into the booking row are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub provider_reference: String,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
}

/// Result of `mark_paid`.
#[derive(Debug, Clone)]
pub enum PaidOutcome {
    /// The payment was recorded by this call.
    Applied(BookingRecord),
    /// The booking was already paid (same reference re-delivered, or paid
    /// earlier through another event). Nothing was written.
    AlreadyPaid(BookingRecord),
}

impl PaidOutcome {
    pub fn record(&self) -> &BookingRecord {
        match self {
            PaidOutcome::Applied(r) | PaidOutcome::AlreadyPaid(r) => r,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    InvalidTransition(InvalidTransition),
    /// The provider reference already marked a different booking as paid.
    ReferenceConflict {
        reference: String,
        existing_booking_id: Uuid,
    },
    /// The backend did not answer within the command timeout. The mutation
    /// is not resumable; retry from scratch.
    Timeout,
    Backend(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => f.write_str("booking not found"),
            StoreError::InvalidTransition(e) => write!(f, "{e}"),
            StoreError::ReferenceConflict {
                reference,
                existing_booking_id,
            } => write!(
                f,
                "provider reference {reference} already paid booking {existing_booking_id}"
            ),
            StoreError::Timeout => f.write_str("store command timed out"),
            StoreError::Backend(e) => write!(f, "store backend error: {e:#}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::InvalidTransition(e) => Some(e),
            StoreError::Backend(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<InvalidTransition> for StoreError {
    fn from(e: InvalidTransition) -> Self {
        StoreError::InvalidTransition(e)
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Backend(e)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Create a `Pending` booking and its first history entry.
    async fn create(&self, new: NewBooking) -> Result<BookingRecord, StoreError>;

    /// Current row with the canonical stage resolved from raw fields.
    async fn get_current(&self, booking_id: Uuid) -> Result<BookingRecord, StoreError>;

    /// Strict mutation: apply the patch, re-resolve, gate the stage move,
    /// persist row + history atomically.
    async fn mutate(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError>;

    /// Legacy passthrough: same atomic write unit, no stage gating.
    /// Migration-era compatibility hole; every call is WARN-logged.
    async fn apply_raw_fields(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError>;

    /// Full history in creation order.
    async fn history(&self, booking_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Idempotent payment upsert keyed on the provider reference.
    async fn mark_paid(
        &self,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaidOutcome, StoreError>;

    /// Booking previously marked paid by this reference, if any.
    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// History metadata (shared by both backends)
// ---------------------------------------------------------------------------

/// Metadata object for a field-patch history entry.
pub(crate) fn patch_metadata(
    via: &str,
    from: Stage,
    patch: &FieldPatch,
    actor: &Actor,
    note: Option<&str>,
    bypassed_gating: bool,
) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("via".to_string(), json!(via));
    obj.insert("from_stage".to_string(), json!(from.as_str()));
    obj.insert("fields_changed".to_string(), json!(patch.changed_names()));
    if let Some(id) = &actor.id {
        obj.insert("actor_id".to_string(), json!(id));
    }
    if let Some(n) = note {
        obj.insert("note".to_string(), json!(n));
    }
    if bypassed_gating {
        obj.insert("bypassed_gating".to_string(), json!(true));
    }
    Value::Object(obj)
}

/// Metadata object for the mark-paid history entry.
pub(crate) fn payment_metadata(from: Stage, event: &PaymentEvent) -> Value {
    json!({
        "via": "payment",
        "from_stage": from.as_str(),
        "provider_reference": event.provider_reference,
        "amount_cents": event.amount_cents,
        "currency": event.currency,
    })
}

/// Metadata object for the creation history entry.
pub(crate) fn create_metadata(new: &NewBooking) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("via".to_string(), json!("create"));
    obj.insert("actor_id".to_string(), json!(new.rider_id));
    if let Some(q) = new.quoted_price_cents {
        obj.insert("quoted_price_cents".to_string(), json!(q));
    }
    Value::Object(obj)
}

/// True when `entry` is the single paid entry for a reference.
pub fn is_payment_entry(entry: &HistoryEntry) -> bool {
    entry
        .metadata
        .get("via")
        .and_then(Value::as_str)
        .map(|v| v == "payment")
        .unwrap_or(false)
}
