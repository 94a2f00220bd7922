//! Append-only booking history with a per-booking hash chain.
//!
//! Each entry records the canonical stage after a write, who caused it, and
//! a metadata object with the write's particulars. Entries are
//! tamper-evident: `hash_self` is sha256 over the canonical JSON of the
//! entry (keys sorted, `hash_self` cleared), and `hash_prev` links to the
//! previous entry of the same booking. `verify_chain` walks a booking's
//! entries and reports the first break.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use lvd_lifecycle::{ActorRole, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub booking_id: Uuid,
    /// Creation counter per booking, starting at 0.
    pub seq: i64,
    pub occurred_at: DateTime<Utc>,
    /// Canonical stage after the write this entry records.
    pub recorded_stage: Stage,
    pub actor_role: ActorRole,
    /// Write particulars: via, from_stage, fields_changed, note, payment
    /// details. Opaque to the store.
    pub metadata: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Build a chained entry: fills `hash_prev` and computes `hash_self`.
pub(crate) fn build_entry(
    booking_id: Uuid,
    seq: i64,
    occurred_at: DateTime<Utc>,
    recorded_stage: Stage,
    actor_role: ActorRole,
    metadata: Value,
    hash_prev: Option<String>,
) -> Result<HistoryEntry> {
    let mut entry = HistoryEntry {
        booking_id,
        seq,
        occurred_at,
        recorded_stage,
        actor_role,
        metadata,
        hash_prev,
        hash_self: None,
    };
    entry.hash_self = Some(compute_entry_hash(&entry)?);
    Ok(entry)
}

/// Hash is computed from canonical JSON of the entry WITHOUT hash_self
/// (to avoid self-reference).
pub fn compute_entry_hash(entry: &HistoryEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;

    let canonical = canonical_json(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize history entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// The entire chain is valid.
    Valid { entries: usize },
    /// The chain is broken at the entry with this seq.
    Broken { seq: i64, reason: String },
}

/// Verify the hash chain of one booking's history, in creation order.
pub fn verify_chain(entries: &[HistoryEntry]) -> Result<ChainStatus> {
    let mut prev_hash: Option<String> = None;

    for entry in entries {
        if entry.hash_prev != prev_hash {
            return Ok(ChainStatus::Broken {
                seq: entry.seq,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = entry.hash_self {
            let recomputed = compute_entry_hash(entry)?;
            if *claimed != recomputed {
                return Ok(ChainStatus::Broken {
                    seq: entry.seq,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = entry.hash_self.clone();
    }

    Ok(ChainStatus::Valid {
        entries: entries.len(),
    })
}
