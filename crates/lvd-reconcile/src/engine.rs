use std::sync::Arc;

use chrono::Utc;
use lvd_db::{LifecycleStore, PaidOutcome, PaymentEvent, StoreError};
use lvd_lifecycle::Stage;
use lvd_pricing::{breakdown, Cents, FeeSchedule};
use uuid::Uuid;

use crate::{FailureReason, ReconcileOutcome};

/// Currencies the charge provider settles in today.
const ACCEPTED_CURRENCIES: [&str; 3] = ["EUR", "USD", "GBP"];

/// Applies provider payment events to the booking store. Webhook deliveries
/// and reconcile polls run through the same `process` path, so a charge lands
/// exactly once no matter how many times or in what order it is reported.
pub struct PaymentReconciler {
    store: Arc<dyn LifecycleStore>,
    schedule: FeeSchedule,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn LifecycleStore>, schedule: FeeSchedule) -> Self {
        Self { store, schedule }
    }

    /// Deterministic reconciliation of one delivered event:
    /// - unusable event => Failed(Malformed)
    /// - unknown booking => Failed(BookingNotFound)
    /// - charge already on file => DuplicateIgnored, zero writes
    /// - undercharge vs the fee schedule => Failed(AmountMismatch)
    /// - otherwise the store's idempotent `mark_paid` decides
    pub async fn process(&self, event: &PaymentEvent) -> ReconcileOutcome {
        if let Some(detail) = malformed(event) {
            return ReconcileOutcome::Failed(FailureReason::Malformed { detail });
        }

        let booking = match self.store.get_current(event.booking_id).await {
            Ok(b) => b,
            Err(StoreError::NotFound) => {
                return ReconcileOutcome::Failed(FailureReason::BookingNotFound {
                    booking_id: event.booking_id,
                })
            }
            Err(e) => return store_failure(e),
        };

        // Duplicate detection before any arithmetic: the same reference on
        // file, a recorded paid_at, or a stage that means the money is
        // already in. All three make this delivery a replay.
        let same_reference = booking.raw.payment_provider_reference.as_deref()
            == Some(event.provider_reference.as_str());
        if same_reference || booking.raw.paid_at.is_some() || payment_settled(booking.stage) {
            tracing::info!(
                booking_id = %event.booking_id,
                reference = %event.provider_reference,
                stage = %booking.stage,
                "duplicate payment event ignored"
            );
            return ReconcileOutcome::DuplicateIgnored {
                booking_id: booking.booking_id,
                stage: booking.stage,
            };
        }

        // Amount verification against the agreed price. The accepted offer
        // wins over the original quote; a booking with neither has no
        // expectation to check against.
        if let Some(agreed) = booking
            .raw
            .accepted_price_cents
            .or(booking.raw.quoted_price_cents)
        {
            match breakdown(&self.schedule, Cents::new(agreed)) {
                Ok(b) => {
                    let expected = b.total_cents.raw();
                    if event.amount_cents < expected {
                        return ReconcileOutcome::Failed(FailureReason::AmountMismatch {
                            booking_id: booking.booking_id,
                            expected_cents: expected,
                            got_cents: event.amount_cents,
                        });
                    }
                    if event.amount_cents > expected {
                        // Never refuse money that already settled. Apply and
                        // leave the overage for operator review.
                        tracing::warn!(
                            booking_id = %event.booking_id,
                            reference = %event.provider_reference,
                            expected_cents = expected,
                            got_cents = event.amount_cents,
                            "payment above expected total, applying anyway"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        booking_id = %event.booking_id,
                        error = %e,
                        "agreed price is unpriceable, skipping amount check"
                    );
                }
            }
        }

        match self.store.mark_paid(event, Utc::now()).await {
            Ok(PaidOutcome::Applied(record)) => {
                tracing::info!(
                    booking_id = %record.booking_id,
                    reference = %event.provider_reference,
                    stage = %record.stage,
                    amount_cents = event.amount_cents,
                    "payment reconciled"
                );
                ReconcileOutcome::Reconciled {
                    booking_id: record.booking_id,
                    stage: record.stage,
                }
            }
            // Lost a race against a concurrent delivery of the same charge.
            Ok(PaidOutcome::AlreadyPaid(record)) => ReconcileOutcome::DuplicateIgnored {
                booking_id: record.booking_id,
                stage: record.stage,
            },
            Err(StoreError::NotFound) => ReconcileOutcome::Failed(FailureReason::BookingNotFound {
                booking_id: event.booking_id,
            }),
            Err(StoreError::ReferenceConflict {
                reference,
                existing_booking_id,
            }) => ReconcileOutcome::Failed(FailureReason::ReferenceConflict {
                reference,
                existing_booking_id,
            }),
            Err(e) => store_failure(e),
        }
    }

    /// Poll-path lookup: the booking this reference already paid for, if any.
    pub async fn reference_paid(&self, reference: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .store
            .find_by_provider_reference(reference)
            .await?
            .map(|r| r.booking_id))
    }
}

fn malformed(event: &PaymentEvent) -> Option<String> {
    if event.provider_reference.trim().is_empty() {
        return Some("empty provider reference".to_string());
    }
    if event.amount_cents <= 0 {
        return Some(format!("non-positive amount {}", event.amount_cents));
    }
    if !ACCEPTED_CURRENCIES.contains(&event.currency.as_str()) {
        return Some(format!("unsupported currency {:?}", event.currency));
    }
    None
}

/// Stages at or past the point where the rider's money is in. A payment
/// event for such a booking can only be a replay or a counterpart
/// confirmation, never a new charge.
fn payment_settled(stage: Stage) -> bool {
    matches!(
        stage,
        Stage::AllSet
            | Stage::DriverHeadingToPickup
            | Stage::DriverArrivedAtPickup
            | Stage::PassengerOnboard
            | Stage::InTransit
            | Stage::Completed
    )
}

fn store_failure(e: StoreError) -> ReconcileOutcome {
    tracing::error!(error = %e, "payment reconciliation store failure");
    ReconcileOutcome::Failed(FailureReason::Store {
        detail: e.to_string(),
    })
}
