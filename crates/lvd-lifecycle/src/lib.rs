//! lvd-lifecycle
//!
//! Canonical booking stage derivation and transition gating.
//!
//! Pure logic. No IO. The store feeds in raw booking fields, we return the
//! canonical stage and say which stage moves are legal.

mod fields;
mod resolver;
mod stage;
mod validator;

pub use fields::{FieldPatch, RawBookingFields};
pub use resolver::{resolve, resolve_with_audit, Contradiction, Resolution};
pub use stage::{ActorRole, Stage};
pub use validator::{legal_next, validate, InvalidTransition};
