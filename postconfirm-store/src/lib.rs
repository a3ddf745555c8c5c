//! Durable key/value surface for sender state, pattern fallback tables,
//! the message stash, and recipient challenge rules (component B).
//!
//! [`Store`] is implemented twice: [`PgStore`] against the tables in
//! `postconfirm`'s external schema, and [`MemoryStore`] as a test
//! double so the Decision Engine, Sender, and Challenge crates can be
//! exercised without a database.

use std::collections::BTreeSet;

use async_trait::async_trait;
use regex::Regex;

use postconfirm_types::{Action, Address, ChallengePolicy, PatternRecord, RecordSource, SenderState, StashEntry};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed pattern in store: {0}")]
    BadPattern(#[from] regex::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Union across runtime+static; if both present, runtime action
    /// wins; references are merged (set union).
    async fn get_sender(&self, addr: &Address) -> Result<Option<SenderState>, StoreError>;

    /// Union across runtime+static, in arbitrary order.
    async fn list_patterns(&self) -> Result<Vec<PatternRecord>, StoreError>;

    /// Atomic insert-or-update on runtime, keyed by `addr`.
    async fn upsert_sender(
        &self,
        addr: &Address,
        action: Action,
        refs: &BTreeSet<String>,
    ) -> Result<(), StoreError>;

    /// Atomic append to the runtime stash; returns the new entry's id.
    async fn stash(
        &self,
        addr: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<i64, StoreError>;

    /// All stash entries (runtime then static) for `addr`, each deleted
    /// durably before the next is produced: by the time this returns,
    /// every entry in the result has already been removed from the
    /// backing table, so a crash right after can lose at most the
    /// caller's in-flight use of the last entry, never the deletion
    /// itself.
    async fn drain_stash(&self, addr: &Address) -> Result<Vec<StashEntry>, StoreError>;

    async fn get_challenge_rule(&self, addr: &Address) -> Result<Option<ChallengePolicy>, StoreError>;

    async fn list_challenge_patterns(&self) -> Result<Vec<(Regex, ChallengePolicy)>, StoreError>;
}

mod pg;
pub use pg::PgStore;

mod memory;
pub use memory::MemoryStore;

pub(crate) fn merge_refs(a: BTreeSet<String>, b: BTreeSet<String>) -> BTreeSet<String> {
    a.into_iter().chain(b).collect()
}

pub(crate) fn parse_refs(raw: Option<&str>) -> BTreeSet<String> {
    match raw {
        None => BTreeSet::new(),
        Some(s) if s.trim().is_empty() => BTreeSet::new(),
        Some(s) => match serde_json::from_str::<Vec<String>>(s) {
            Ok(v) => v.into_iter().collect(),
            Err(_) => {
                // Legacy rows sometimes store a bare string rather than
                // a JSON array.
                let mut set = BTreeSet::new();
                set.insert(s.to_owned());
                set
            }
        },
    }
}

pub(crate) fn encode_refs(refs: &BTreeSet<String>) -> Option<String> {
    if refs.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&refs.iter().collect::<Vec<_>>()).expect("BTreeSet<String> always serialises"))
    }
}

pub(crate) fn policy_from_str(s: &str) -> ChallengePolicy {
    match s {
        "ignore" => ChallengePolicy::Ignore,
        "challenge" => ChallengePolicy::Challenge,
        _ => ChallengePolicy::Unknown,
    }
}

pub(crate) fn record_source_of(is_static: bool) -> RecordSource {
    if is_static {
        RecordSource::Static
    } else {
        RecordSource::Runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_round_trip_through_json_array() {
        let mut refs = BTreeSet::new();
        refs.insert("abc123".to_owned());
        let encoded = encode_refs(&refs).unwrap();
        assert_eq!(parse_refs(Some(&encoded)), refs);
    }

    #[test]
    fn empty_refs_encode_to_none() {
        assert_eq!(encode_refs(&BTreeSet::new()), None);
    }

    #[test]
    fn bare_string_ref_is_a_singleton_set() {
        let mut expected = BTreeSet::new();
        expected.insert("legacyref".to_owned());
        assert_eq!(parse_refs(Some("legacyref")), expected);
    }
}
