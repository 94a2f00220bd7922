//! Scenario: the payment provider redelivers a webhook after a timeout. The
//! first delivery must land the money and advance the stage; every replay of
//! the same provider reference must be a no-op; the same reference on a second
//! booking must be refused outright.

use chrono::Utc;
use lvd_db::{
    is_payment_entry, Actor, BookingRecord, LifecycleStore, MemLifecycleStore, NewBooking,
    PaidOutcome, PaymentEvent, StoreError,
};
use lvd_lifecycle::{ActorRole, FieldPatch, Stage};
use uuid::Uuid;

async fn booking_at_offer_accepted(
    store: &MemLifecycleStore,
    price: i64,
) -> anyhow::Result<BookingRecord> {
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(price),
        })
        .await?;
    let chauffeur = Actor::new(ActorRole::Chauffeur, "chf-1");
    let mut p = FieldPatch::default();
    p.chauffeur_stage_flag = Some("accepted".to_string());
    store.mutate(b.booking_id, p, chauffeur.clone(), None).await?;

    let mut p = FieldPatch::default();
    p.legacy_status = Some("offer_sent".to_string());
    store.mutate(b.booking_id, p, chauffeur.clone(), None).await?;

    let mut p = FieldPatch::default();
    p.legacy_status = Some("offer_accepted".to_string());
    p.accepted_price_cents = Some(price);
    let b = store
        .mutate(b.booking_id, p, Actor::new(ActorRole::Rider, "rid-1"), None)
        .await?;
    assert_eq!(b.stage, Stage::OfferAccepted);
    Ok(b)
}

fn event(reference: &str, booking_id: Uuid, amount: i64) -> PaymentEvent {
    PaymentEvent {
        provider_reference: reference.to_string(),
        booking_id,
        amount_cents: amount,
        currency: "EUR".to_string(),
    }
}

#[tokio::test]
async fn redelivered_webhook_is_ignored() -> anyhow::Result<()> {
    let store = MemLifecycleStore::new();
    let b = booking_at_offer_accepted(&store, 3_378).await?;

    let first = store
        .mark_paid(&event("ch_abc123", b.booking_id, 3_378), Utc::now())
        .await?;
    assert!(matches!(first, PaidOutcome::Applied(_)));

    let paid = store.get_current(b.booking_id).await?;
    assert_eq!(paid.stage, Stage::PaymentConfirmedAwaitingCounterpart);
    assert!(paid.raw.paid_at.is_some());
    assert_eq!(
        paid.raw.payment_provider_reference.as_deref(),
        Some("ch_abc123")
    );
    assert_eq!(paid.raw.paid_amount_cents, Some(3_378));

    // Replay. Same reference, same booking.
    let second = store
        .mark_paid(&event("ch_abc123", b.booking_id, 3_378), Utc::now())
        .await?;
    assert!(matches!(second, PaidOutcome::AlreadyPaid(_)));
    assert_eq!(second.record().booking_id, b.booking_id);

    let after = store.get_current(b.booking_id).await?;
    assert_eq!(after.updated_at, paid.updated_at, "replay must not touch the row");

    let history = store.history(b.booking_id).await?;
    let payments = history.iter().filter(|e| is_payment_entry(e)).count();
    assert_eq!(payments, 1, "exactly one paid entry after a replay");
    Ok(())
}

#[tokio::test]
async fn second_charge_with_a_new_reference_is_still_refused() -> anyhow::Result<()> {
    let store = MemLifecycleStore::new();
    let b = booking_at_offer_accepted(&store, 3_378).await?;

    store.mark_paid(&event("ch_abc123", b.booking_id, 3_378), Utc::now()).await?;
    // A different charge against an already-paid booking is the double-charge
    // case, not a replay. It must not overwrite the recorded money.
    let outcome = store
        .mark_paid(&event("ch_later99", b.booking_id, 3_378), Utc::now())
        .await?;
    assert!(matches!(outcome, PaidOutcome::AlreadyPaid(_)));

    let row = store.get_current(b.booking_id).await?;
    assert_eq!(
        row.raw.payment_provider_reference.as_deref(),
        Some("ch_abc123")
    );
    Ok(())
}

#[tokio::test]
async fn reference_reuse_across_bookings_conflicts() -> anyhow::Result<()> {
    let store = MemLifecycleStore::new();
    let a = booking_at_offer_accepted(&store, 2_000).await?;
    let b = booking_at_offer_accepted(&store, 2_000).await?;

    store.mark_paid(&event("ch_abc123", a.booking_id, 2_000), Utc::now()).await?;
    let err = store
        .mark_paid(&event("ch_abc123", b.booking_id, 2_000), Utc::now())
        .await
        .unwrap_err();
    match err {
        StoreError::ReferenceConflict {
            reference,
            existing_booking_id,
        } => {
            assert_eq!(reference, "ch_abc123");
            assert_eq!(existing_booking_id, a.booking_id);
        }
        other => panic!("expected ReferenceConflict, got {other}"),
    }

    // The losing booking is untouched.
    let row = store.get_current(b.booking_id).await?;
    assert_eq!(row.raw.paid_at, None);
    assert_eq!(row.stage, Stage::OfferAccepted);
    Ok(())
}

#[tokio::test]
async fn payment_on_a_cancelled_booking_records_money_without_reviving_it() -> anyhow::Result<()> {
    let store = MemLifecycleStore::new();
    let b = store
        .create(NewBooking {
            rider_id: "rid-1".to_string(),
            quoted_price_cents: Some(2_000),
        })
        .await?;
    let mut p = FieldPatch::default();
    p.legacy_status = Some("cancelled".to_string());
    store
        .mutate(b.booking_id, p, Actor::new(ActorRole::Rider, "rid-1"), None)
        .await?;

    // The charge settled while the cancellation was in flight. The money must
    // land in the row for refund accounting, but the terminal stage wins.
    let outcome = store
        .mark_paid(&event("ch_race1", b.booking_id, 2_000), Utc::now())
        .await?;
    assert!(matches!(outcome, PaidOutcome::Applied(_)));

    let row = store.get_current(b.booking_id).await?;
    assert_eq!(row.stage, Stage::Cancelled);
    assert!(row.raw.paid_at.is_some());
    assert_eq!(row.raw.paid_amount_cents, Some(2_000));
    Ok(())
}

#[tokio::test]
async fn find_by_provider_reference_locates_the_paid_booking() -> anyhow::Result<()> {
    let store = MemLifecycleStore::new();
    let b = booking_at_offer_accepted(&store, 3_378).await?;
    store.mark_paid(&event("ch_abc123", b.booking_id, 3_378), Utc::now()).await?;

    let found = store
        .find_by_provider_reference("ch_abc123")
        .await?
        .map(|r| r.booking_id);
    assert_eq!(found, Some(b.booking_id));
    assert!(store.find_by_provider_reference("ch_nope").await?.is_none());
    Ok(())
}
