//! In-process scenario tests for the payment endpoints.
//!
//! The webhook and the poll route share one reconciliation path; these tests
//! drive both through the router and check that a charge lands exactly once
//! no matter how often the provider repeats itself.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use lvd_daemon::{routes, state};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_state() -> Arc<state::AppState> {
    Arc::new(state::AppState::in_memory())
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

/// Agreed price for every booking below, and its grossed-up card total.
const AGREED_CENTS: i64 = 2_500;
const TOTAL_CENTS: i64 = 3_378;

/// Walk a fresh booking to offer_accepted with an agreed price through the
/// API, so a charge for `TOTAL_CENTS` reconciles cleanly.
async fn priced_booking(st: &Arc<state::AppState>) -> String {
    let req = post_json(
        "/v1/bookings",
        serde_json::json!({ "rider_id": "rider-1", "quoted_price_cents": AGREED_CENTS }),
    );
    let (status, body) = call(routes::build_router(Arc::clone(st)), req).await;
    assert_eq!(status, StatusCode::OK);
    let id = parse_json(body)["booking_id"]
        .as_str()
        .expect("booking_id missing")
        .to_string();

    let steps = [
        serde_json::json!({
            "booking_id": id,
            "fields": { "chauffeur_stage_flag": "accepted", "chauffeur_id": "chf-9" },
            "actor_role": "chauffeur",
            "actor_id": "chf-9",
        }),
        serde_json::json!({
            "booking_id": id,
            "fields": { "legacy_status": "offer_sent" },
            "actor_role": "operator",
        }),
        serde_json::json!({
            "booking_id": id,
            "fields": { "legacy_status": "offer_accepted", "accepted_price_cents": AGREED_CENTS },
            "actor_role": "rider",
            "actor_id": "rider-1",
        }),
    ];
    for step in steps {
        let (status, _) = call(
            routes::build_router(Arc::clone(st)),
            post_json("/v1/lifecycle/mutate", step),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    id
}

fn webhook(reference: &str, booking_id: &str, amount_cents: i64) -> serde_json::Value {
    serde_json::json!({
        "event_type": "charge.succeeded",
        "provider_reference": reference,
        "booking_id": booking_id,
        "amount_cents": amount_cents,
        "currency": "EUR",
    })
}

// ---------------------------------------------------------------------------
// POST /v1/payments/webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redelivered_webhook_settles_exactly_once() {
    let st = make_state();
    let id = priced_booking(&st).await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &id, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["outcome"], "reconciled");
    assert_eq!(json["booking_id"], id.as_str());
    assert_eq!(json["stage"], "payment_confirmed_awaiting_counterpart");

    // The provider sends it again. Acknowledged, not re-applied.
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &id, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["outcome"], "duplicate_ignored");

    // The money landed once and is visible on the booking.
    let (_, body) = call(
        routes::build_router(Arc::clone(&st)),
        get(&format!("/v1/bookings/{id}")),
    )
    .await;
    let json = parse_json(body);
    assert_eq!(json["raw"]["payment_provider_reference"], "ch_live_777");
    assert_eq!(json["raw"]["paid_amount_cents"], TOTAL_CENTS);
    assert!(!json["raw"]["paid_at"].is_null());
}

#[tokio::test]
async fn malformed_webhook_is_400() {
    let st = make_state();
    let id = priced_booking(&st).await;

    for bad in [
        webhook("", &id, TOTAL_CENTS),
        webhook("ch_live_777", &id, 0),
        serde_json::json!({
            "event_type": "charge.succeeded",
            "provider_reference": "ch_live_777",
            "booking_id": id,
            "amount_cents": TOTAL_CENTS,
            "currency": "BTC",
        }),
    ] {
        let (status, body) = call(
            routes::build_router(Arc::clone(&st)),
            post_json("/v1/payments/webhook", bad),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json = parse_json(body);
        assert!(
            json["error"].as_str().unwrap_or("").contains("malformed"),
            "body = {json}"
        );
    }
}

#[tokio::test]
async fn webhook_for_an_unknown_booking_is_404() {
    let st = make_state();
    let ghost = uuid::Uuid::new_v4().to_string();
    let (status, _) = call(
        routes::build_router(st),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &ghost, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn undercharge_is_409_and_leaves_the_booking_unpaid() {
    let st = make_state();
    let id = priced_booking(&st).await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &id, 3_000)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let json = parse_json(body);
    assert!(
        json["error"].as_str().unwrap_or("").contains("3378"),
        "expected total should be named: {json}"
    );

    let (_, body) = call(
        routes::build_router(Arc::clone(&st)),
        get(&format!("/v1/bookings/{id}")),
    )
    .await;
    let json = parse_json(body);
    assert!(json["raw"]["paid_at"].is_null());
    assert_eq!(json["stage"], "offer_accepted");
}

#[tokio::test]
async fn reference_reuse_across_bookings_is_409() {
    let st = make_state();
    let paid = priced_booking(&st).await;
    let other = priced_booking(&st).await;

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &paid, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &other, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let json = parse_json(body);
    assert!(
        json["error"].as_str().unwrap_or("").contains(&paid),
        "conflict should name the holder: {json}"
    );
}

// ---------------------------------------------------------------------------
// GET /v1/payments/reconcile
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_reports_whether_a_reference_paid() {
    let st = make_state();
    let id = priced_booking(&st).await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/payments/reconcile?reference=ch_live_777"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["paid"], false);

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/payments/webhook", webhook("ch_live_777", &id, TOTAL_CENTS)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/payments/reconcile?reference=ch_live_777"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["paid"], true);
    assert_eq!(json["booking_id"], id.as_str());
}

#[tokio::test]
async fn poll_with_full_params_drives_the_same_reconciliation() {
    let st = make_state();
    let id = priced_booking(&st).await;

    let uri = format!(
        "/v1/payments/reconcile?reference=ch_poll_1&booking_id={id}&amount_cents={TOTAL_CENTS}&currency=EUR"
    );
    let (status, body) = call(routes::build_router(Arc::clone(&st)), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["paid"], true);
    assert_eq!(json["outcome"], "reconciled");

    // Polling again is a duplicate, still acknowledged as paid.
    let (status, body) = call(routes::build_router(Arc::clone(&st)), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["paid"], true);
    assert_eq!(json["outcome"], "duplicate_ignored");
}
