use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use postconfirm_types::{
    Action, Address, ChallengePolicy, PatternRecord, RecordSource, SenderState, StashEntry,
};

use crate::{Store, StoreError};

#[derive(Default)]
struct Inner {
    senders: HashMap<Address, (Action, BTreeSet<String>)>,
    patterns: Vec<(Regex, Action)>,
    stash: HashMap<Address, Vec<(Vec<Address>, Vec<u8>)>>,
    challenge_rules: HashMap<Address, ChallengePolicy>,
    challenge_patterns: Vec<(Regex, ChallengePolicy)>,
    next_stash_id: i64,
}

/// An in-memory [`Store`] behind the same trait `PgStore` implements;
/// backs the Decision Engine, Sender, and Challenge test suites so they
/// need no real database.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn seed_pattern(&self, pattern: &str, action: Action) {
        let re = Regex::new(&format!("(?i)^{}$", pattern)).expect("valid test pattern");
        self.inner.lock().await.patterns.push((re, action));
    }

    pub async fn seed_challenge_rule(&self, addr: &Address, policy: ChallengePolicy) {
        self.inner
            .lock()
            .await
            .challenge_rules
            .insert(addr.clone(), policy);
    }

    pub async fn seed_challenge_pattern(&self, pattern: &str, policy: ChallengePolicy) {
        let re = Regex::new(&format!("(?i)^{}$", pattern)).expect("valid test pattern");
        self.inner.lock().await.challenge_patterns.push((re, policy));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_sender(&self, addr: &Address) -> Result<Option<SenderState>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .senders
            .get(addr)
            .map(|(action, refs)| SenderState {
                action: *action,
                references: refs.clone(),
            }))
    }

    async fn list_patterns(&self) -> Result<Vec<PatternRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .patterns
            .iter()
            .map(|(pattern, action)| PatternRecord {
                pattern: pattern.clone(),
                action: *action,
                source: RecordSource::Runtime,
            })
            .collect())
    }

    async fn upsert_sender(
        &self,
        addr: &Address,
        action: Action,
        refs: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .senders
            .insert(addr.clone(), (action, refs.clone()));
        Ok(())
    }

    async fn stash(
        &self,
        addr: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_stash_id += 1;
        let id = inner.next_stash_id;
        inner
            .stash
            .entry(addr.clone())
            .or_default()
            .push((recipients.to_vec(), message.to_vec()));
        Ok(id)
    }

    async fn drain_stash(&self, addr: &Address) -> Result<Vec<StashEntry>, StoreError> {
        let mut inner = self.inner.lock().await;
        let entries = inner.stash.remove(addr).unwrap_or_default();
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, (recipients, message))| StashEntry {
                id: i as i64,
                sender: addr.clone(),
                recipients,
                message,
                created: chrono::Utc::now(),
            })
            .collect())
    }

    async fn get_challenge_rule(&self, addr: &Address) -> Result<Option<ChallengePolicy>, StoreError> {
        Ok(self.inner.lock().await.challenge_rules.get(addr).copied())
    }

    async fn list_challenge_patterns(&self) -> Result<Vec<(Regex, ChallengePolicy)>, StoreError> {
        Ok(self.inner.lock().await.challenge_patterns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drained_entries_are_not_returned_twice() {
        let store = MemoryStore::new();
        let addr = Address::new("alice@example.net");
        let recipient = Address::new("list@example.org");
        store.stash(&addr, &[recipient.clone()], b"hello").await.unwrap();

        let first = store.drain_stash(&addr).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = store.drain_stash(&addr).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = MemoryStore::new();
        let addr = Address::new("alice@example.net");
        let mut refs = BTreeSet::new();
        refs.insert("r1".to_owned());
        store.upsert_sender(&addr, Action::Confirm, &refs).await.unwrap();

        let state = store.get_sender(&addr).await.unwrap().unwrap();
        assert_eq!(state.action, Action::Confirm);
        assert_eq!(state.references, refs);
    }
}
