//! In-process backend.
//!
//! Same semantics as the Postgres backend, one `Mutex` instead of row locks.
//! Used by router and scenario tests (which must run without a database) and
//! as a dev backend. Atomicity is upheld by doing all fallible work on
//! copies before the maps are touched.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use lvd_lifecycle::{resolve_with_audit, validate, ActorRole, FieldPatch, RawBookingFields, Stage};

use crate::history::{build_entry, HistoryEntry};
use crate::store::{
    create_metadata, patch_metadata, payment_metadata, Actor, BookingRecord, LifecycleStore,
    NewBooking, PaidOutcome, PaymentEvent, StoreError,
};

#[derive(Default)]
pub struct MemLifecycleStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    bookings: HashMap<Uuid, StoredRow>,
    history: HashMap<Uuid, Vec<HistoryEntry>>,
    by_reference: HashMap<String, Uuid>,
}

#[derive(Clone)]
struct StoredRow {
    rider_id: String,
    chauffeur_id: Option<String>,
    raw: RawBookingFields,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MemLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("store mutex poisoned")))
    }
}

fn record_of(booking_id: Uuid, row: &StoredRow) -> BookingRecord {
    let resolution = resolve_with_audit(&row.raw);
    for c in &resolution.contradictions {
        tracing::warn!(booking_id = %booking_id, contradiction = %c, "raw booking fields disagree");
    }
    BookingRecord {
        booking_id,
        rider_id: row.rider_id.clone(),
        chauffeur_id: row.chauffeur_id.clone(),
        stage: resolution.stage,
        raw: row.raw.clone(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn next_chain_link(history: &[HistoryEntry]) -> (i64, Option<String>) {
    match history.last() {
        Some(last) => (last.seq + 1, last.hash_self.clone()),
        None => (0, None),
    }
}

impl MemLifecycleStore {
    fn write_patch(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
        gated: bool,
    ) -> Result<BookingRecord, StoreError> {
        let mut inner = self.locked()?;
        let row = inner
            .bookings
            .get(&booking_id)
            .ok_or(StoreError::NotFound)?
            .clone();
        let before = record_of(booking_id, &row);

        let mut raw = row.raw.clone();
        patch.apply(&mut raw);
        let chauffeur_id = patch.chauffeur_id.clone().or(row.chauffeur_id);

        let after = resolve_with_audit(&raw);
        let via = if gated {
            validate(before.stage, after.stage)?;
            "strict"
        } else {
            "legacy"
        };
        let bypassed = !gated && validate(before.stage, after.stage).is_err();
        if !gated {
            tracing::warn!(
                booking_id = %booking_id,
                actor_role = %actor.role,
                from = %before.stage,
                to = %after.stage,
                bypassed_gating = bypassed,
                "legacy raw-field passthrough used"
            );
        }

        let now = Utc::now();
        let metadata = patch_metadata(via, before.stage, &patch, &actor, note.as_deref(), bypassed);
        let chain = inner.history.entry(booking_id).or_default();
        let (seq, hash_prev) = next_chain_link(chain);
        let entry = build_entry(
            booking_id,
            seq,
            now,
            after.stage,
            actor.role,
            metadata,
            hash_prev,
        )?;

        // All fallible work done; commit row + history together.
        chain.push(entry);
        inner.bookings.insert(
            booking_id,
            StoredRow {
                rider_id: before.rider_id.clone(),
                chauffeur_id: chauffeur_id.clone(),
                raw: raw.clone(),
                created_at: before.created_at,
                updated_at: now,
            },
        );

        Ok(BookingRecord {
            booking_id,
            rider_id: before.rider_id,
            chauffeur_id,
            stage: after.stage,
            raw,
            created_at: before.created_at,
            updated_at: now,
        })
    }
}

#[async_trait::async_trait]
impl LifecycleStore for MemLifecycleStore {
    async fn create(&self, new: NewBooking) -> Result<BookingRecord, StoreError> {
        let booking_id = Uuid::new_v4();
        let now = Utc::now();
        let entry = build_entry(
            booking_id,
            0,
            now,
            Stage::Pending,
            ActorRole::Rider,
            create_metadata(&new),
            None,
        )?;

        let raw = RawBookingFields {
            quoted_price_cents: new.quoted_price_cents,
            ..Default::default()
        };
        let row = StoredRow {
            rider_id: new.rider_id,
            chauffeur_id: None,
            raw,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.locked()?;
        inner.history.insert(booking_id, vec![entry]);
        inner.bookings.insert(booking_id, row.clone());

        Ok(record_of(booking_id, &row))
    }

    async fn get_current(&self, booking_id: Uuid) -> Result<BookingRecord, StoreError> {
        let inner = self.locked()?;
        let row = inner.bookings.get(&booking_id).ok_or(StoreError::NotFound)?;
        Ok(record_of(booking_id, row))
    }

    async fn mutate(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError> {
        self.write_patch(booking_id, patch, actor, note, true)
    }

    async fn apply_raw_fields(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError> {
        self.write_patch(booking_id, patch, actor, note, false)
    }

    async fn history(&self, booking_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.locked()?;
        inner
            .history
            .get(&booking_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_paid(
        &self,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaidOutcome, StoreError> {
        let mut inner = self.locked()?;
        let row = inner
            .bookings
            .get(&event.booking_id)
            .ok_or(StoreError::NotFound)?
            .clone();
        let before = record_of(event.booking_id, &row);

        if before.raw.payment_provider_reference.as_deref()
            == Some(event.provider_reference.as_str())
            || before.raw.paid_at.is_some()
        {
            return Ok(PaidOutcome::AlreadyPaid(before));
        }

        if let Some(&existing_id) = inner.by_reference.get(&event.provider_reference) {
            if existing_id != event.booking_id {
                return Err(StoreError::ReferenceConflict {
                    reference: event.provider_reference.clone(),
                    existing_booking_id: existing_id,
                });
            }
        }

        let mut raw = row.raw.clone();
        raw.paid_at = Some(now);
        raw.payment_provider_reference = Some(event.provider_reference.clone());
        raw.paid_amount_cents = Some(event.amount_cents);
        raw.paid_currency = Some(event.currency.clone());
        if raw.payment_confirmation_stage.as_deref() != Some("all_set") {
            raw.payment_confirmation_stage = Some("rider_confirmed".to_string());
        }
        let after = resolve_with_audit(&raw);

        let metadata = payment_metadata(before.stage, event);
        let chain = inner.history.entry(event.booking_id).or_default();
        let (seq, hash_prev) = next_chain_link(chain);
        let entry = build_entry(
            event.booking_id,
            seq,
            now,
            after.stage,
            ActorRole::System,
            metadata,
            hash_prev,
        )?;

        chain.push(entry);
        inner
            .by_reference
            .insert(event.provider_reference.clone(), event.booking_id);
        let updated = StoredRow {
            raw: raw.clone(),
            updated_at: now,
            ..row
        };
        inner.bookings.insert(event.booking_id, updated);

        Ok(PaidOutcome::Applied(BookingRecord {
            booking_id: event.booking_id,
            rider_id: before.rider_id,
            chauffeur_id: before.chauffeur_id,
            stage: after.stage,
            raw,
            created_at: before.created_at,
            updated_at: now,
        }))
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingRecord>, StoreError> {
        let inner = self.locked()?;
        Ok(inner
            .by_reference
            .get(reference)
            .and_then(|id| inner.bookings.get(id).map(|row| record_of(*id, row))))
    }
}
