//! Generates `action_<timestamp>` tokens: the key space for
//! `RuntimeState::full_action_data` and the target of `${action_id}`
//! substitutions (see [`crate::data_ref`]).
//!
//! Time-ordered and monotonic within the same microsecond, the same
//! discipline a UUIDv6/v7-style generator uses for sortable ids, adapted to
//! this format's fixed `action_YYYYMMDD_HHMMSS_NNNNNN` shape instead of raw
//! UUID bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static LAST_MICROS: AtomicU64 = AtomicU64::new(0);

/// Returns a new, strictly-increasing `action_<timestamp>` token.
pub fn new_action_id() -> String {
    let now = Utc::now();
    let micros = now.timestamp_micros().max(0) as u64;

    let ordered = loop {
        let last = LAST_MICROS.load(Ordering::SeqCst);
        let candidate = if micros > last { micros } else { last + 1 };
        if LAST_MICROS
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            break candidate;
        }
    };

    let dt = chrono::DateTime::<Utc>::from_timestamp_micros(ordered as i64).unwrap_or(now);
    format!(
        "action_{}_{:06}",
        dt.format("%Y%m%d_%H%M%S"),
        dt.timestamp_subsec_micros()
    )
}

/// True when `token` has the `action_<timestamp>` shape (vs. a dotted path).
pub fn is_action_id(token: &str) -> bool {
    token.starts_with("action_")
}
