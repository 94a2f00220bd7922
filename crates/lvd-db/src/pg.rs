//! Postgres backend.
//!
//! Write path discipline: every mutation runs in one transaction that takes
//! a `FOR UPDATE` lock on the booking row, so concurrent writers to the same
//! booking serialize and the history chain never forks. The partial unique
//! index on `payment_provider_reference` is the storage-level backstop for
//! payment idempotency; the application check in `mark_paid` is the first
//! line, the index catches races the check cannot see.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use lvd_lifecycle::{resolve_with_audit, validate, ActorRole, FieldPatch, RawBookingFields, Stage};

use crate::history::{build_entry, HistoryEntry};
use crate::store::{
    create_metadata, patch_metadata, payment_metadata, Actor, BookingRecord, LifecycleStore,
    NewBooking, PaidOutcome, PaymentEvent, StoreError,
};

pub struct PgLifecycleStore {
    pool: PgPool,
    command_timeout: Duration,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool, command_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
        }
    }

    /// Every store command is bounded; a hung backend surfaces as
    /// `StoreError::Timeout` instead of blocking the caller forever.
    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    /// Shared body of `mutate` and `apply_raw_fields`. `gated` selects the
    /// strict path; the legacy path records what the strict path would have
    /// said but writes anyway.
    async fn write_patch(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
        gated: bool,
    ) -> Result<BookingRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin booking write tx")?;

        let row = fetch_booking_for_update(&mut tx, booking_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let before = record_from_row(&row)?;

        let mut raw = before.raw.clone();
        patch.apply(&mut raw);
        let chauffeur_id = patch
            .chauffeur_id
            .clone()
            .or_else(|| before.chauffeur_id.clone());

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
        sqlx::query(
            r#"
            update bookings set
              chauffeur_id = $2,
              legacy_status = $3,
              rider_stage_flag = $4,
              chauffeur_stage_flag = $5,
              ride_stage = $6,
              payment_confirmation_stage = $7,
              quoted_price_cents = $8,
              accepted_price_cents = $9,
              updated_at = $10
            where booking_id = $1
            "#,
        )
        .bind(booking_id)
        .bind(&chauffeur_id)
        .bind(&raw.legacy_status)
        .bind(&raw.rider_stage_flag)
        .bind(&raw.chauffeur_stage_flag)
        .bind(&raw.ride_stage)
        .bind(&raw.payment_confirmation_stage)
        .bind(raw.quoted_price_cents)
        .bind(raw.accepted_price_cents)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("booking update failed")?;

        let metadata = patch_metadata(via, before.stage, &patch, &actor, note.as_deref(), bypassed);
        let (seq, hash_prev) = last_chain_link(&mut tx, booking_id).await?;
        let entry = build_entry(
            booking_id,
            seq,
            now,
            after.stage,
            actor.role,
            metadata,
            hash_prev,
        )?;
        insert_history(&mut tx, &entry).await?;

        tx.commit().await.context("commit booking write tx")?;

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
impl LifecycleStore for PgLifecycleStore {
    async fn create(&self, new: NewBooking) -> Result<BookingRecord, StoreError> {
        self.with_timeout(async {
            let booking_id = Uuid::new_v4();
            let now = Utc::now();

            let mut tx = self.pool.begin().await.context("begin create tx")?;

            sqlx::query(
                r#"
                insert into bookings (
                  booking_id, rider_id, quoted_price_cents, created_at, updated_at
                ) values ($1, $2, $3, $4, $4)
                "#,
            )
            .bind(booking_id)
            .bind(&new.rider_id)
            .bind(new.quoted_price_cents)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert booking failed")?;

            let entry = build_entry(
                booking_id,
                0,
                now,
                Stage::Pending,
                ActorRole::Rider,
                create_metadata(&new),
                None,
            )?;
            insert_history(&mut tx, &entry).await?;

            tx.commit().await.context("commit create tx")?;

            Ok(BookingRecord {
                booking_id,
                rider_id: new.rider_id,
                chauffeur_id: None,
                stage: Stage::Pending,
                raw: RawBookingFields {
                    quoted_price_cents: new.quoted_price_cents,
                    ..Default::default()
                },
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn get_current(&self, booking_id: Uuid) -> Result<BookingRecord, StoreError> {
        self.with_timeout(async {
            let row = sqlx::query(SELECT_BOOKING)
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await
                .context("fetch booking failed")?
                .ok_or(StoreError::NotFound)?;
            Ok(record_from_row(&row)?)
        })
        .await
    }

    async fn mutate(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError> {
        self.with_timeout(self.write_patch(booking_id, patch, actor, note, true))
            .await
    }

    async fn apply_raw_fields(
        &self,
        booking_id: Uuid,
        patch: FieldPatch,
        actor: Actor,
        note: Option<String>,
    ) -> Result<BookingRecord, StoreError> {
        self.with_timeout(self.write_patch(booking_id, patch, actor, note, false))
            .await
    }

    async fn history(&self, booking_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError> {
        self.with_timeout(async {
            let rows = sqlx::query(
                r#"
                select booking_id, seq, occurred_at, recorded_stage, actor_role,
                       metadata, hash_prev, hash_self
                from booking_history
                where booking_id = $1
                order by seq asc
                "#,
            )
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await
            .context("fetch history failed")?;

            // create() writes seq 0, so an empty chain means no booking.
            if rows.is_empty() {
                return Err(StoreError::NotFound);
            }

            let mut out = Vec::with_capacity(rows.len());
            for row in &rows {
                out.push(history_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn mark_paid(
        &self,
        event: &PaymentEvent,
        now: DateTime<Utc>,
    ) -> Result<PaidOutcome, StoreError> {
        self.with_timeout(async {
            let mut tx = self.pool.begin().await.context("begin mark_paid tx")?;

            let row = fetch_booking_for_update(&mut tx, event.booking_id)
                .await?
                .ok_or(StoreError::NotFound)?;
            let before = record_from_row(&row)?;

            // Idempotency, first line: the row already carries this
            // reference (re-delivery) or was paid through another event.
            if before.raw.payment_provider_reference.as_deref()
                == Some(event.provider_reference.as_str())
                || before.raw.paid_at.is_some()
            {
                return Ok(PaidOutcome::AlreadyPaid(before));
            }

            // Cross-booking reuse check inside the transaction.
            if let Some(existing) = sqlx::query(
                "select booking_id from bookings where payment_provider_reference = $1",
            )
            .bind(&event.provider_reference)
            .fetch_optional(&mut *tx)
            .await
            .context("reference pre-check failed")?
            {
                let existing_id: Uuid = existing
                    .try_get("booking_id")
                    .context("decode conflicting booking_id")?;
                return Err(StoreError::ReferenceConflict {
                    reference: event.provider_reference.clone(),
                    existing_booking_id: existing_id,
                });
            }

            let mut raw = before.raw.clone();
            raw.paid_at = Some(now);
            raw.payment_provider_reference = Some(event.provider_reference.clone());
            raw.paid_amount_cents = Some(event.amount_cents);
            raw.paid_currency = Some(event.currency.clone());
            if raw.payment_confirmation_stage.as_deref() != Some("all_set") {
                raw.payment_confirmation_stage = Some("rider_confirmed".to_string());
            }
            // No strict gating here: a confirmed payment is always recorded.
            // For terminal bookings the terminal band keeps the stage put and
            // the money lands in the row for refund accounting.
            let after = resolve_with_audit(&raw);

            let res = sqlx::query(
                r#"
                update bookings set
                  paid_at = $2,
                  payment_provider_reference = $3,
                  paid_amount_cents = $4,
                  paid_currency = $5,
                  payment_confirmation_stage = $6,
                  updated_at = $7
                where booking_id = $1
                "#,
            )
            .bind(event.booking_id)
            .bind(raw.paid_at)
            .bind(&raw.payment_provider_reference)
            .bind(raw.paid_amount_cents)
            .bind(&raw.paid_currency)
            .bind(&raw.payment_confirmation_stage)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(e) = res {
                // A racing writer claimed the reference between our pre-check
                // and the update. The index tells the truth; report it.
                if is_unique_constraint_violation(&e, "uq_bookings_payment_provider_reference") {
                    drop(tx);
                    let existing_id: Option<Uuid> = sqlx::query(
                        "select booking_id from bookings where payment_provider_reference = $1",
                    )
                    .bind(&event.provider_reference)
                    .fetch_optional(&self.pool)
                    .await
                    .context("conflict lookup failed")?
                    .map(|r| r.try_get("booking_id"))
                    .transpose()
                    .context("decode conflicting booking_id")?;

                    return match existing_id {
                        Some(id) => Err(StoreError::ReferenceConflict {
                            reference: event.provider_reference.clone(),
                            existing_booking_id: id,
                        }),
                        None => Err(StoreError::Backend(anyhow!(
                            "unique violation on {} but no row holds it",
                            event.provider_reference
                        ))),
                    };
                }
                return Err(anyhow::Error::new(e)
                    .context("mark_paid update failed")
                    .into());
            }

            let metadata = payment_metadata(before.stage, event);
            let (seq, hash_prev) = last_chain_link(&mut tx, event.booking_id).await?;
            let entry = build_entry(
                event.booking_id,
                seq,
                now,
                after.stage,
                ActorRole::System,
                metadata,
                hash_prev,
            )?;
            insert_history(&mut tx, &entry).await?;

            tx.commit().await.context("commit mark_paid tx")?;

            Ok(PaidOutcome::Applied(BookingRecord {
                booking_id: event.booking_id,
                rider_id: before.rider_id,
                chauffeur_id: before.chauffeur_id,
                stage: after.stage,
                raw,
                created_at: before.created_at,
                updated_at: now,
            }))
        })
        .await
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<BookingRecord>, StoreError> {
        self.with_timeout(async {
            let row = sqlx::query(
                r#"
                select booking_id, rider_id, chauffeur_id,
                       legacy_status, rider_stage_flag, chauffeur_stage_flag,
                       ride_stage, payment_confirmation_stage,
                       quoted_price_cents, accepted_price_cents,
                       paid_at, payment_provider_reference, paid_amount_cents, paid_currency,
                       created_at, updated_at
                from bookings
                where payment_provider_reference = $1
                "#,
            )
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .context("fetch by provider reference failed")?;

            match row {
                Some(row) => Ok(Some(record_from_row(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

const SELECT_BOOKING: &str = r#"
select booking_id, rider_id, chauffeur_id,
       legacy_status, rider_stage_flag, chauffeur_stage_flag,
       ride_stage, payment_confirmation_stage,
       quoted_price_cents, accepted_price_cents,
       paid_at, payment_provider_reference, paid_amount_cents, paid_currency,
       created_at, updated_at
from bookings
where booking_id = $1
"#;

async fn fetch_booking_for_update(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> Result<Option<PgRow>, StoreError> {
    let row = sqlx::query(
        r#"
        select booking_id, rider_id, chauffeur_id,
               legacy_status, rider_stage_flag, chauffeur_stage_flag,
               ride_stage, payment_confirmation_stage,
               quoted_price_cents, accepted_price_cents,
               paid_at, payment_provider_reference, paid_amount_cents, paid_currency,
               created_at, updated_at
        from bookings
        where booking_id = $1
        for update
        "#,
    )
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await
    .context("fetch booking for update failed")?;
    Ok(row)
}

fn record_from_row(row: &PgRow) -> Result<BookingRecord> {
    let booking_id: Uuid = row.try_get("booking_id")?;
    let raw = RawBookingFields {
        legacy_status: row.try_get("legacy_status")?,
        rider_stage_flag: row.try_get("rider_stage_flag")?,
        chauffeur_stage_flag: row.try_get("chauffeur_stage_flag")?,
        ride_stage: row.try_get("ride_stage")?,
        payment_confirmation_stage: row.try_get("payment_confirmation_stage")?,
        quoted_price_cents: row.try_get("quoted_price_cents")?,
        accepted_price_cents: row.try_get("accepted_price_cents")?,
        paid_at: row.try_get("paid_at")?,
        payment_provider_reference: row.try_get("payment_provider_reference")?,
        paid_amount_cents: row.try_get("paid_amount_cents")?,
        paid_currency: row.try_get("paid_currency")?,
    };

    let resolution = resolve_with_audit(&raw);
    for c in &resolution.contradictions {
        tracing::warn!(booking_id = %booking_id, contradiction = %c, "raw booking fields disagree");
    }

    Ok(BookingRecord {
        booking_id,
        rider_id: row.try_get("rider_id")?,
        chauffeur_id: row.try_get("chauffeur_id")?,
        stage: resolution.stage,
        raw,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<HistoryEntry> {
    let stage_s: String = row.try_get("recorded_stage")?;
    let role_s: String = row.try_get("actor_role")?;
    Ok(HistoryEntry {
        booking_id: row.try_get("booking_id")?,
        seq: row.try_get("seq")?,
        occurred_at: row.try_get("occurred_at")?,
        recorded_stage: Stage::parse(&stage_s)
            .ok_or_else(|| anyhow!("invalid stage in history: {stage_s}"))?,
        actor_role: ActorRole::parse(&role_s)
            .ok_or_else(|| anyhow!("invalid actor role in history: {role_s}"))?,
        metadata: row.try_get("metadata")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: row.try_get("hash_self")?,
    })
}

/// Next seq and the hash to chain from, under the caller's row lock.
async fn last_chain_link(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> Result<(i64, Option<String>), StoreError> {
    let row = sqlx::query(
        r#"
        select seq, hash_self
        from booking_history
        where booking_id = $1
        order by seq desc
        limit 1
        "#,
    )
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await
    .context("fetch last history link failed")?;

    match row {
        Some(row) => {
            let seq: i64 = row.try_get("seq").context("decode history seq")?;
            let hash: Option<String> = row.try_get("hash_self").context("decode hash_self")?;
            Ok((seq + 1, hash))
        }
        None => Ok((0, None)),
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: &HistoryEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into booking_history (
          booking_id, seq, occurred_at, recorded_stage, actor_role,
          metadata, hash_prev, hash_self
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.booking_id)
    .bind(entry.seq)
    .bind(entry.occurred_at)
    .bind(entry.recorded_stage.as_str())
    .bind(entry.actor_role.as_str())
    .bind(&entry.metadata)
    .bind(&entry.hash_prev)
    .bind(&entry.hash_self)
    .execute(&mut **tx)
    .await
    .context("insert history entry failed")?;
    Ok(())
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}
