//! Scenario: garbage and undercharged events must be rejected before the
//! store sees a write, and the rejection must say exactly why.

use std::sync::Arc;

use lvd_db::{Actor, LifecycleStore, MemLifecycleStore, NewBooking, PaymentEvent};
use lvd_lifecycle::{ActorRole, FieldPatch};
use lvd_pricing::FeeSchedule;
use lvd_reconcile::{FailureReason, PaymentReconciler, ReconcileOutcome};
use uuid::Uuid;

fn event(reference: &str, booking_id: Uuid, amount: i64, currency: &str) -> PaymentEvent {
    PaymentEvent {
        provider_reference: reference.to_string(),
        booking_id,
        amount_cents: amount,
        currency: currency.to_string(),
    }
}

fn reconciler_over(store: &Arc<MemLifecycleStore>) -> PaymentReconciler {
    PaymentReconciler::new(store.clone(), FeeSchedule::default())
}

fn expect_failure(outcome: ReconcileOutcome) -> FailureReason {
    match outcome {
        ReconcileOutcome::Failed(reason) => reason,
        other => panic!("expected failure, got {other}"),
    }
}

#[tokio::test]
async fn malformed_events_are_refused_up_front() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let r = reconciler_over(&store);
    let id = Uuid::new_v4();

    for bad in [
        event("", id, 100, "EUR"),
        event("   ", id, 100, "EUR"),
        event("ch_1", id, 0, "EUR"),
        event("ch_1", id, -500, "EUR"),
        event("ch_1", id, 100, "BTC"),
    ] {
        let reason = expect_failure(r.process(&bad).await);
        assert!(
            matches!(reason, FailureReason::Malformed { .. }),
            "expected Malformed for {bad:?}, got {reason}"
        );
        assert!(!reason.is_retryable());
    }
    Ok(())
}

#[tokio::test]
async fn unknown_booking_is_not_found() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let r = reconciler_over(&store);
    let ghost = Uuid::new_v4();

    let reason = expect_failure(r.process(&event("ch_1", ghost, 100, "EUR")).await);
    assert_eq!(reason, FailureReason::BookingNotFound { booking_id: ghost });
    Ok(())
}

#[tokio::test]
async fn undercharge_is_refused_and_leaves_no_trace() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(2_500),
        })
        .await?;
    let r = reconciler_over(&store);

    // Quoted 2500 prices out to 3378; the rider's card only moved 3000.
    let reason = expect_failure(r.process(&event("ch_1", b.booking_id, 3_000, "EUR")).await);
    assert_eq!(
        reason,
        FailureReason::AmountMismatch {
            booking_id: b.booking_id,
            expected_cents: 3_378,
            got_cents: 3_000,
        }
    );

    let row = store.get_current(b.booking_id).await?;
    assert_eq!(row.raw.paid_at, None);
    assert_eq!(store.history(b.booking_id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn accepted_price_outranks_the_quote() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(9_999),
        })
        .await?;
    // Haggled down. The accepted price is what the charge must cover.
    let mut p = FieldPatch::default();
    p.legacy_status = Some("offer_sent".to_string());
    store
        .mutate(b.booking_id, p, Actor::system(), None)
        .await?;
    let mut p = FieldPatch::default();
    p.legacy_status = Some("offer_accepted".to_string());
    p.accepted_price_cents = Some(2_500);
    store
        .mutate(b.booking_id, p, Actor::new(ActorRole::Rider, "rid-1"), None)
        .await?;

    let r = reconciler_over(&store);
    let outcome = r.process(&event("ch_1", b.booking_id, 3_378, "EUR")).await;
    assert!(outcome.is_applied(), "got {outcome}");
    Ok(())
}

#[tokio::test]
async fn overcharge_applies_anyway() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(2_500),
        })
        .await?;
    let r = reconciler_over(&store);

    // The provider settled more than our total (tip added at the terminal).
    // Money that moved is never refused.
    let outcome = r.process(&event("ch_1", b.booking_id, 4_000, "EUR")).await;
    assert!(outcome.is_applied());

    let row = store.get_current(b.booking_id).await?;
    assert_eq!(row.raw.paid_amount_cents, Some(4_000));
    Ok(())
}

#[tokio::test]
async fn unpriced_booking_skips_the_amount_check() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: None,
        })
        .await?;
    let r = reconciler_over(&store);

    // No quote, no accepted price. There is nothing to verify against, so
    // the charge is taken at face value.
    let outcome = r.process(&event("ch_1", b.booking_id, 123, "EUR")).await;
    assert!(outcome.is_applied());
    Ok(())
}

#[tokio::test]
async fn unpriceable_quote_skips_the_amount_check() -> anyhow::Result<()> {
    let store = Arc::new(MemLifecycleStore::new());
    // A quote the pricing engine refuses outright (fees overflow the cent
    // range). The expected total cannot be computed, so the settled charge
    // must land anyway instead of crashing the reconciliation.
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(i64::MAX),
        })
        .await?;
    let r = reconciler_over(&store);

    let outcome = r.process(&event("ch_1", b.booking_id, 5_000, "EUR")).await;
    assert!(outcome.is_applied(), "got {outcome}");

    let row = store.get_current(b.booking_id).await?;
    assert_eq!(row.raw.paid_amount_cents, Some(5_000));
    Ok(())
}
