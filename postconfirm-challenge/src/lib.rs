//! Recipient challenge policy resolution (component D): decides
//! whether any message to a recipient should trigger the stash-and-
//! challenge pipeline at all.

use std::sync::Arc;

use async_trait::async_trait;

use postconfirm_store::{Store, StoreError};
use postconfirm_types::{Address, ChallengePolicy};

#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    /// Exact record first, otherwise the first fully matching pattern;
    /// `Unknown` if neither is present.
    async fn lookup(&self, addr: &Address) -> Result<ChallengePolicy, StoreError>;
}

/// The one handler this workspace ships: a [`Store`]-backed lookup. The
/// trait exists so more handlers could be chained in the same
/// precedence loop, matching the original's list-of-handlers shape,
/// even though only one is wired up here.
pub struct StoreChallengeHandler {
    store: Arc<dyn Store>,
}

impl StoreChallengeHandler {
    pub fn new(store: Arc<dyn Store>) -> StoreChallengeHandler {
        StoreChallengeHandler { store }
    }
}

#[async_trait]
impl ChallengeHandler for StoreChallengeHandler {
    async fn lookup(&self, addr: &Address) -> Result<ChallengePolicy, StoreError> {
        if let Some(policy) = self.store.get_challenge_rule(addr).await? {
            return Ok(policy);
        }
        for (pattern, policy) in self.store.list_challenge_patterns().await? {
            if pattern.is_match(addr.as_str()) {
                return Ok(policy);
            }
        }
        Ok(ChallengePolicy::Unknown)
    }
}

/// `ignore` overrides anything; `challenge` overrides only `Unknown`;
/// an identical new value is always a no-op.
pub fn update_policy(current: ChallengePolicy, new_policy: ChallengePolicy) -> ChallengePolicy {
    if current == new_policy {
        return current;
    }
    let replace = current == ChallengePolicy::Unknown || new_policy == ChallengePolicy::Ignore;
    if replace {
        new_policy
    } else {
        current
    }
}

/// Resolves one recipient's policy across every configured handler, in
/// order.
pub async fn resolve(addr: &Address, handlers: &[Box<dyn ChallengeHandler>]) -> Result<ChallengePolicy, StoreError> {
    let mut policy = ChallengePolicy::Unknown;
    for handler in handlers {
        let next = handler.lookup(addr).await?;
        policy = update_policy(policy, next);
    }
    Ok(policy)
}

/// The subset of `recipients` whose resolved policy is `Challenge`. An
/// empty result means the message is out of scope for the whole
/// pipeline.
pub async fn challenge_recipients(
    recipients: &[Address],
    handlers: &[Box<dyn ChallengeHandler>],
) -> Result<Vec<Address>, StoreError> {
    let mut out = Vec::new();
    for addr in recipients {
        if resolve(addr, handlers).await? == ChallengePolicy::Challenge {
            out.push(addr.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_overrides_challenge() {
        assert_eq!(
            update_policy(ChallengePolicy::Challenge, ChallengePolicy::Ignore),
            ChallengePolicy::Ignore
        );
    }

    #[test]
    fn challenge_does_not_override_ignore() {
        assert_eq!(
            update_policy(ChallengePolicy::Ignore, ChallengePolicy::Challenge),
            ChallengePolicy::Ignore
        );
    }

    #[test]
    fn challenge_overrides_unknown_only() {
        assert_eq!(
            update_policy(ChallengePolicy::Unknown, ChallengePolicy::Challenge),
            ChallengePolicy::Challenge
        );
    }

    #[test]
    fn identical_value_is_a_no_op() {
        assert_eq!(
            update_policy(ChallengePolicy::Challenge, ChallengePolicy::Challenge),
            ChallengePolicy::Challenge
        );
    }

    #[tokio::test]
    async fn resolves_via_store_backed_handler() {
        use postconfirm_store::MemoryStore;

        let memory = MemoryStore::new();
        let protected = Address::new("list@example.org");
        memory
            .seed_challenge_rule(&protected, ChallengePolicy::Challenge)
            .await;
        let store: Arc<dyn Store> = Arc::new(memory);
        let handlers: Vec<Box<dyn ChallengeHandler>> = vec![Box::new(StoreChallengeHandler::new(store))];

        let friend = Address::new("friend@example.net");
        let recipients = vec![protected.clone(), friend];
        let result = challenge_recipients(&recipients, &handlers).await.unwrap();
        assert_eq!(result, vec![protected]);
    }
}
