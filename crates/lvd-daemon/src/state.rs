//! Shared runtime state for lvd-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum; this module owns
//! nothing async itself beyond the broadcast sender.

use std::sync::Arc;

use lvd_db::{LifecycleStore, MemLifecycleStore};
use lvd_pricing::FeeSchedule;
use lvd_reconcile::PaymentReconciler;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ChangeSignal — the change feed payload
// ---------------------------------------------------------------------------

/// One "something changed" signal on the booking change feed.
///
/// Deliberately carries no booking state: delivery is at-least-once and
/// unordered, so any payload could arrive stale. Subscribers re-fetch the
/// booking; the signal only says that doing so is worthwhile.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub booking_id: Uuid,
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared (Arc) handle passed to all Axum handlers.
pub struct AppState {
    /// Booking persistence. Which backend is behind the trait is wiring's
    /// business, never a handler's.
    pub store: Arc<dyn LifecycleStore>,
    /// Payment event processing (webhook + poll paths).
    pub reconciler: PaymentReconciler,
    /// Broadcast feed of change signals. Handlers publish after every
    /// successful write; SSE subscriptions filter per booking.
    pub feed: broadcast::Sender<ChangeSignal>,
    /// Fee schedule served by the pricing endpoint.
    pub schedule: FeeSchedule,
    /// Static build metadata.
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        schedule: FeeSchedule,
        feed_capacity: usize,
    ) -> Self {
        let (feed, _rx) = broadcast::channel::<ChangeSignal>(feed_capacity);
        let reconciler = PaymentReconciler::new(Arc::clone(&store), schedule);
        Self {
            store,
            reconciler,
            feed,
            schedule,
            build: BuildInfo {
                service: "lvd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// In-process state over the memory backend. Scenario tests and local
    /// demos use this; production wires a Postgres store in `main`.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemLifecycleStore::new()),
            FeeSchedule::default(),
            256,
        )
    }

    /// Publish a change signal. Send errors mean nobody is subscribed,
    /// which is fine.
    pub fn publish_change(&self, booking_id: Uuid) {
        let _ = self.feed.send(ChangeSignal { booking_id });
    }
}
