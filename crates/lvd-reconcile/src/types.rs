use lvd_lifecycle::Stage;
use uuid::Uuid;

/// What became of one delivered payment event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The charge was recorded and the booking row updated by this call.
    Reconciled { booking_id: Uuid, stage: Stage },

    /// The charge was already on file. Nothing was written; the provider's
    /// redelivery is answered with success so it stops retrying.
    DuplicateIgnored { booking_id: Uuid, stage: Stage },

    /// The event was not applied. The reason says whether retrying can help.
    Failed(FailureReason),
}

impl ReconcileOutcome {
    /// Reconciled or DuplicateIgnored. Both are acknowledged to the provider.
    pub fn is_success(&self) -> bool {
        !matches!(self, ReconcileOutcome::Failed(_))
    }

    /// True only when this call wrote the payment.
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Reconciled { .. })
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileOutcome::Reconciled { booking_id, stage } => {
                write!(f, "reconciled: booking {booking_id} now {stage}")
            }
            ReconcileOutcome::DuplicateIgnored { booking_id, stage } => {
                write!(f, "duplicate ignored: booking {booking_id} already paid (stage {stage})")
            }
            ReconcileOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Evidence for a rejected payment event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The event itself is unusable. Not retryable.
    Malformed { detail: String },

    /// The referenced booking does not exist. Not retryable.
    BookingNotFound { booking_id: Uuid },

    /// The charged amount is below what the fee schedule says the ride
    /// costs. Not retryable without operator intervention.
    AmountMismatch {
        booking_id: Uuid,
        expected_cents: i64,
        got_cents: i64,
    },

    /// The provider reference is already attached to a different booking.
    /// Somebody is replaying a charge against the wrong ride.
    ReferenceConflict {
        reference: String,
        existing_booking_id: Uuid,
    },

    /// The store could not complete the write. Retryable.
    Store { detail: String },
}

impl FailureReason {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::Store { .. })
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Malformed { detail } => write!(f, "malformed event: {detail}"),
            FailureReason::BookingNotFound { booking_id } => {
                write!(f, "booking {booking_id} not found")
            }
            FailureReason::AmountMismatch {
                booking_id,
                expected_cents,
                got_cents,
            } => write!(
                f,
                "amount mismatch for booking {booking_id}: expected {expected_cents} got {got_cents}"
            ),
            FailureReason::ReferenceConflict {
                reference,
                existing_booking_id,
            } => write!(
                f,
                "reference {reference} already belongs to booking {existing_booking_id}"
            ),
            FailureReason::Store { detail } => write!(f, "store error: {detail}"),
        }
    }
}
