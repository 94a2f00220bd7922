//! Axum router and all HTTP handlers for lvd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use lvd_db::{Actor, BookingRecord, NewBooking, PaymentEvent, StoreError};
use lvd_lifecycle::{legal_next, ActorRole};
use lvd_pricing::{breakdown, Cents};
use lvd_reconcile::{FailureReason, ReconcileOutcome};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{
        BookingResponse, ChangesQuery, CreateBookingRequest, ErrorResponse, HealthResponse,
        MutateRequest, PaymentOutcomeResponse, PaymentWebhookRequest, PricingQuery,
        ReconcilePollQuery, ReconcilePollResponse, TransitionRefusedResponse,
    },
    state::{AppState, ChangeSignal},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/:id", get(get_booking))
        .route("/v1/lifecycle/mutate", post(lifecycle_mutate))
        .route("/v1/lifecycle/legacy-fields", post(lifecycle_legacy_fields))
        .route("/v1/lifecycle/:id/history", get(lifecycle_history))
        .route("/v1/lifecycle/:id/changes", get(lifecycle_changes))
        .route("/v1/payments/webhook", post(payments_webhook))
        .route("/v1/payments/reconcile", get(payments_reconcile))
        .route("/v1/pricing/breakdown", get(pricing_breakdown))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/bookings
// ---------------------------------------------------------------------------

pub(crate) async fn create_booking(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateBookingRequest>,
) -> Response {
    if req.rider_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "rider_id must not be empty");
    }

    match st
        .store
        .create(NewBooking {
            rider_id: req.rider_id,
            quoted_price_cents: req.quoted_price_cents,
        })
        .await
    {
        Ok(record) => {
            info!(booking_id = %record.booking_id, "booking created");
            st.publish_change(record.booking_id);
            (StatusCode::OK, Json(BookingResponse::from(record))).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/bookings/:id
// ---------------------------------------------------------------------------

pub(crate) async fn get_booking(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.store.get_current(id).await {
        Ok(record) => (StatusCode::OK, Json(BookingResponse::from(record))).into_response(),
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/lifecycle/mutate
// ---------------------------------------------------------------------------

pub(crate) async fn lifecycle_mutate(
    State(st): State<Arc<AppState>>,
    Json(req): Json<MutateRequest>,
) -> Response {
    let actor = request_actor(req.actor_role, req.actor_id);
    match st
        .store
        .mutate(req.booking_id, req.fields, actor, req.note)
        .await
    {
        Ok(record) => {
            st.publish_change(record.booking_id);
            (StatusCode::OK, Json(BookingResponse::from(record))).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/lifecycle/legacy-fields
// ---------------------------------------------------------------------------

/// Same write unit as `/v1/lifecycle/mutate` but without stage gating.
/// Kept for the migration window; the store WARN-logs every use.
pub(crate) async fn lifecycle_legacy_fields(
    State(st): State<Arc<AppState>>,
    Json(req): Json<MutateRequest>,
) -> Response {
    let actor = request_actor(req.actor_role, req.actor_id);
    match st
        .store
        .apply_raw_fields(req.booking_id, req.fields, actor, req.note)
        .await
    {
        Ok(record) => {
            st.publish_change(record.booking_id);
            (StatusCode::OK, Json(BookingResponse::from(record))).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/lifecycle/:id/history
// ---------------------------------------------------------------------------

pub(crate) async fn lifecycle_history(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.store.history(id).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/lifecycle/:id/changes  (SSE)
// ---------------------------------------------------------------------------

/// Subscribe to change signals for one booking.
///
/// Only a party to the booking may subscribe: its rider, its assigned
/// chauffeur, or an operator. The stream is edge-triggered; events say that
/// the booking changed, never what it changed to.
pub(crate) async fn lifecycle_changes(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<ChangesQuery>,
) -> Response {
    let record = match st.store.get_current(id).await {
        Ok(r) => r,
        Err(e) => return store_error_response(e),
    };
    if !is_party(&record, q.actor_role, q.actor_id.as_deref()) {
        return error_response(
            StatusCode::FORBIDDEN,
            "not a party to this booking; subscription refused",
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.feed.subscribe();
    let events = feed_to_sse(rx, id);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

/// True when the actor may watch this booking.
fn is_party(record: &BookingRecord, role: ActorRole, actor_id: Option<&str>) -> bool {
    match role {
        ActorRole::Operator | ActorRole::System => true,
        ActorRole::Rider => actor_id == Some(record.rider_id.as_str()),
        ActorRole::Chauffeur => match (&record.chauffeur_id, actor_id) {
            (Some(assigned), Some(caller)) => assigned == caller,
            _ => false,
        },
    }
}

fn feed_to_sse(
    rx: broadcast::Receiver<ChangeSignal>,
    booking_id: Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(move |msg| async move {
        let signal = match msg {
            Ok(s) => s,
            // Lagged past the ring capacity: whatever was missed, the
            // subscriber's next re-fetch covers it. Coalesce the gap into
            // one fresh signal rather than dropping it.
            Err(BroadcastStreamRecvError::Lagged(_)) => ChangeSignal { booking_id },
        };
        if signal.booking_id != booking_id {
            return None;
        }
        let data = serde_json::json!({
            "booking_id": signal.booking_id,
            "note": "booking changed; re-fetch it for current state",
        });
        Some(Ok(Event::default().event("changed").data(data.to_string())))
    })
}

// ---------------------------------------------------------------------------
// POST /v1/payments/webhook
// ---------------------------------------------------------------------------

pub(crate) async fn payments_webhook(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PaymentWebhookRequest>,
) -> Response {
    info!(
        event_type = %req.event_type,
        reference = %req.provider_reference,
        booking_id = %req.booking_id,
        "payment webhook received"
    );
    let event = PaymentEvent {
        provider_reference: req.provider_reference,
        booking_id: req.booking_id,
        amount_cents: req.amount_cents,
        currency: req.currency,
    };
    let outcome = st.reconciler.process(&event).await;
    reconcile_outcome_response(&st, outcome)
}

// ---------------------------------------------------------------------------
// GET /v1/payments/reconcile
// ---------------------------------------------------------------------------

/// Poll-path reconciliation. With only a reference it reports whether that
/// reference already paid a booking; with the full event parameters it runs
/// the same processing as the webhook.
pub(crate) async fn payments_reconcile(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ReconcilePollQuery>,
) -> Response {
    if let (Some(booking_id), Some(amount_cents), Some(currency)) =
        (q.booking_id, q.amount_cents, q.currency.clone())
    {
        let event = PaymentEvent {
            provider_reference: q.reference,
            booking_id,
            amount_cents,
            currency,
        };
        return match st.reconciler.process(&event).await {
            ReconcileOutcome::Reconciled { booking_id, .. } => {
                st.publish_change(booking_id);
                poll_paid_response(booking_id, "reconciled")
            }
            ReconcileOutcome::DuplicateIgnored { booking_id, .. } => {
                poll_paid_response(booking_id, "duplicate_ignored")
            }
            ReconcileOutcome::Failed(reason) => failure_response(reason),
        };
    }

    match st.reconciler.reference_paid(&q.reference).await {
        Ok(found) => (
            StatusCode::OK,
            Json(ReconcilePollResponse {
                paid: found.is_some(),
                booking_id: found,
                outcome: None,
            }),
        )
            .into_response(),
        Err(e) => store_error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/pricing/breakdown
// ---------------------------------------------------------------------------

pub(crate) async fn pricing_breakdown(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PricingQuery>,
) -> Response {
    match breakdown(&st.schedule, Cents::new(q.base_estimate_cents)) {
        Ok(priced) => (StatusCode::OK, Json(priced)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Shared response mapping
// ---------------------------------------------------------------------------

fn request_actor(role: ActorRole, id: Option<String>) -> Actor {
    Actor { role, id }
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound => error_response(StatusCode::NOT_FOUND, "booking not found"),
        StoreError::InvalidTransition(e) => (
            StatusCode::CONFLICT,
            Json(TransitionRefusedResponse {
                error: e.to_string(),
                from: e.from,
                to: e.to,
                legal: legal_next(e.from).to_vec(),
            }),
        )
            .into_response(),
        StoreError::ReferenceConflict {
            reference,
            existing_booking_id,
        } => error_response(
            StatusCode::CONFLICT,
            &format!("reference {reference} already belongs to booking {existing_booking_id}"),
        ),
        StoreError::Timeout => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store timed out; retry")
        }
        StoreError::Backend(e) => {
            tracing::error!(error = %e, "store backend failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "store failure; retry")
        }
    }
}

fn poll_paid_response(booking_id: Uuid, label: &str) -> Response {
    (
        StatusCode::OK,
        Json(ReconcilePollResponse {
            paid: true,
            booking_id: Some(booking_id),
            outcome: Some(label.to_string()),
        }),
    )
        .into_response()
}

fn reconcile_outcome_response(st: &AppState, outcome: ReconcileOutcome) -> Response {
    match outcome {
        ReconcileOutcome::Reconciled { booking_id, stage } => {
            st.publish_change(booking_id);
            (
                StatusCode::OK,
                Json(PaymentOutcomeResponse {
                    outcome: "reconciled".to_string(),
                    booking_id,
                    stage,
                }),
            )
                .into_response()
        }
        ReconcileOutcome::DuplicateIgnored { booking_id, stage } => (
            StatusCode::OK,
            Json(PaymentOutcomeResponse {
                outcome: "duplicate_ignored".to_string(),
                booking_id,
                stage,
            }),
        )
            .into_response(),
        ReconcileOutcome::Failed(reason) => failure_response(reason),
    }
}

fn failure_response(reason: FailureReason) -> Response {
    let status = match &reason {
        FailureReason::Malformed { .. } => StatusCode::BAD_REQUEST,
        FailureReason::BookingNotFound { .. } => StatusCode::NOT_FOUND,
        FailureReason::AmountMismatch { .. } | FailureReason::ReferenceConflict { .. } => {
            StatusCode::CONFLICT
        }
        FailureReason::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &reason.to_string())
}
