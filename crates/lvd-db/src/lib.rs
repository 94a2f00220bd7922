//! lvd-db
//!
//! Booking persistence behind the `LifecycleStore` trait.
//!
//! Two backends with identical semantics: `PgLifecycleStore` (sqlx/Postgres,
//! the production backend) and `MemLifecycleStore` (in-process, used by
//! tests and dev setups without a database). Callers hold an
//! `Arc<dyn LifecycleStore>` and never see which one they got.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod history;
mod mem;
mod pg;
mod store;

pub use history::{verify_chain, ChainStatus, HistoryEntry};
pub use mem::MemLifecycleStore;
pub use pg::PgLifecycleStore;
pub use store::{
    is_payment_entry, Actor, BookingRecord, LifecycleStore, NewBooking, PaidOutcome, PaymentEvent,
    StoreError,
};

pub const ENV_DB_URL: &str = "LVD_DATABASE_URL";

/// Connect to Postgres using LVD_DATABASE_URL.
pub async fn connect_from_env(max_connections: u32) -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}
