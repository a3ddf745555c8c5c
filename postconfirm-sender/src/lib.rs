//! Per-address sender state object (component C): holds a lazily
//! resolved action and reference set in memory for the duration of one
//! session, reading through the [`Store`] on first use and writing
//! through on every mutation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use postconfirm_store::{Store, StoreError};
use postconfirm_types::Address;
pub use postconfirm_types::Action;

pub struct Sender {
    store: Arc<dyn Store>,
    email: Address,
    resolved: Option<(Action, BTreeSet<String>)>,
}

impl Sender {
    pub fn new(store: Arc<dyn Store>, email: Address) -> Sender {
        Sender {
            store,
            email,
            resolved: None,
        }
    }

    pub fn email(&self) -> &Address {
        &self.email
    }

    /// Idempotent after the first call: checks the exact-match record,
    /// then falls back to the first fully matching pattern, then
    /// `Unknown`. References from an exact record and a matching
    /// pattern are merged rather than one replacing the other, mirroring
    /// the original's set-union of a freshly loaded reference list onto
    /// whatever was already cached in memory.
    pub async fn get_action(&mut self) -> Result<Action, StoreError> {
        if let Some((action, _)) = &self.resolved {
            debug!(sender = %self.email, %action, "action already resolved");
            return Ok(*action);
        }

        let found = match self.store.get_sender(&self.email).await? {
            Some(state) => Some((state.action, state.references)),
            None => {
                let mut matched = None;
                for pattern in self.store.list_patterns().await? {
                    if pattern.pattern.is_match(self.email.as_str()) {
                        matched = Some((pattern.action, BTreeSet::new()));
                        break;
                    }
                }
                matched
            }
        };

        let (action, refs) = match found {
            Some((action, new_refs)) => {
                let merged = match self.resolved.take() {
                    Some((_, existing)) => existing.into_iter().chain(new_refs).collect(),
                    None => new_refs,
                };
                (action, merged)
            }
            None => (Action::Unknown, BTreeSet::new()),
        };

        debug!(sender = %self.email, %action, "action resolved");
        self.resolved = Some((action, refs.clone()));
        Ok(action)
    }

    /// Writes through to the Store with the current reference set.
    pub async fn set_action(&mut self, action: Action) -> Result<BTreeSet<String>, StoreError> {
        let refs = self.get_refs().await?;
        self.store.upsert_sender(&self.email, action, &refs).await?;
        self.resolved = Some((action, refs.clone()));
        Ok(refs)
    }

    /// The current in-memory reference set, resolving the action first
    /// if it has not been loaded yet.
    pub async fn get_refs(&mut self) -> Result<BTreeSet<String>, StoreError> {
        if self.resolved.is_none() {
            self.get_action().await?;
        }
        Ok(self.resolved.as_ref().map(|(_, r)| r.clone()).unwrap_or_default())
    }

    /// Adds `r` to the in-memory reference set if not already present;
    /// does not by itself write through (the caller is always about to
    /// call [`Sender::stash`] or [`Sender::set_action`] right after,
    /// which persists it).
    pub async fn add_reference(&mut self, r: &str) -> Result<(), StoreError> {
        if self.resolved.is_none() {
            self.get_action().await?;
        }
        if let Some((_, refs)) = &mut self.resolved {
            refs.insert(r.to_owned());
        }
        Ok(())
    }

    /// Empties the reference set in memory; the caller is expected to
    /// follow with `set_action(Action::Accept)` to persist the clear.
    pub fn clear_references(&mut self) {
        if let Some((_, refs)) = &mut self.resolved {
            refs.clear();
        }
    }

    /// Appends a stash entry via the Store; if `reference` is given,
    /// records it; if the sender isn't already `Confirm`, promotes it
    /// and writes through.
    pub async fn stash(
        &mut self,
        message: &[u8],
        recipients: &[Address],
        reference: Option<&str>,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.store.stash(&self.email, recipients, message).await?;

        if let Some(r) = reference {
            self.add_reference(r).await?;
        }

        let current = self.get_action().await?;
        if current != Action::Confirm {
            self.set_action(Action::Confirm).await
        } else {
            self.get_refs().await
        }
    }

    /// Delegates to `Store::drain_stash`: finite, not restartable.
    pub async fn unstash(&self) -> Result<Vec<postconfirm_types::StashEntry>, StoreError> {
        self.store.drain_stash(&self.email).await
    }

    pub async fn validate_ref(&mut self, r: &str) -> Result<bool, StoreError> {
        Ok(self.get_refs().await?.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postconfirm_store::MemoryStore;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[tokio::test]
    async fn unknown_sender_defaults_to_unknown() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut sender = Sender::new(store, addr("alice@example.net"));
        assert_eq!(sender.get_action().await.unwrap(), Action::Unknown);
    }

    #[tokio::test]
    async fn pattern_fallback_applies_when_no_exact_record() {
        let memory = MemoryStore::new();
        memory.seed_pattern(r".*@example\.net", Action::Accept).await;
        let store: Arc<dyn Store> = Arc::new(memory);
        let mut sender = Sender::new(store, addr("alice@example.net"));
        assert_eq!(sender.get_action().await.unwrap(), Action::Accept);
    }

    #[tokio::test]
    async fn stash_promotes_unknown_sender_to_confirm() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut sender = Sender::new(store.clone(), addr("alice@example.net"));
        let recipient = addr("list@example.org");
        sender
            .stash(b"hello", &[recipient], Some("ref1"))
            .await
            .unwrap();

        assert_eq!(sender.get_action().await.unwrap(), Action::Confirm);
        assert!(sender.validate_ref("ref1").await.unwrap());
    }

    #[tokio::test]
    async fn clear_references_then_accept_persists_empty_set() {
        let memory = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(memory);
        let mut sender = Sender::new(store.clone(), addr("alice@example.net"));
        sender.add_reference("r1").await.unwrap();
        sender.set_action(Action::Confirm).await.unwrap();

        sender.clear_references();
        sender.set_action(Action::Accept).await.unwrap();

        let state = store.get_sender(&addr("alice@example.net")).await.unwrap().unwrap();
        assert_eq!(state.action, Action::Accept);
        assert!(state.references.is_empty());
    }
}
