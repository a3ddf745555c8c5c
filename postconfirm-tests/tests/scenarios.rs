//! End-to-end scenario tests wiring Validator, Sender, Challenge, and
//! the Decision Engine against an in-memory Store — the milter wire
//! protocol itself lives in `postconfirm-milter` and is exercised
//! there at the callback level; this crate covers the cross-component
//! behaviour the wire layer can't easily assert on.

use std::sync::Arc;

use postconfirm_challenge::{challenge_recipients, ChallengeHandler, StoreChallengeHandler};
use postconfirm_engine::{decide, Effect};
use postconfirm_sender::Sender;
use postconfirm_store::{MemoryStore, Store};
use postconfirm_types::{Action, Address, ChallengePolicy, Verdict};
use postconfirm_validator::Validator;

fn addr(s: &str) -> Address {
    Address::new(s)
}

struct Fixture {
    store: Arc<dyn Store>,
    validator: Validator,
    handlers: Vec<Box<dyn ChallengeHandler>>,
}

impl Fixture {
    async fn new() -> Fixture {
        let memory = MemoryStore::new();
        let list = addr("list@example.org");
        memory.seed_challenge_rule(&list, ChallengePolicy::Challenge).await;
        let store: Arc<dyn Store> = Arc::new(memory);
        let handlers: Vec<Box<dyn ChallengeHandler>> =
            vec![Box::new(StoreChallengeHandler::new(store.clone()))];
        Fixture {
            store,
            validator: Validator::new(b"test-key".to_vec()),
            handlers,
        }
    }
}

#[tokio::test]
async fn unknown_sender_protected_recipient_plain_mail() {
    let fx = Fixture::new().await;
    let sender_addr = addr("alice@example.net");
    let list = addr("list@example.org");

    let recipients = vec![list.clone()];
    let targets = challenge_recipients(&recipients, &fx.handlers).await.unwrap();
    assert_eq!(targets, vec![list.clone()]);

    let mut sender = Sender::new(fx.store.clone(), sender_addr.clone());
    let action = sender.get_action().await.unwrap();
    assert_eq!(action, Action::Unknown);

    let decision = decide(action, true, false, false, false, true);
    assert_eq!(decision.verdict, Verdict::Discard);
    assert_eq!(decision.effect, Effect::Stash { send_challenge: true });

    let reference = "ref1";
    sender.stash(b"Subject: Hello\n\nhi", &recipients, Some(reference)).await.unwrap();

    assert_eq!(sender.get_action().await.unwrap(), Action::Confirm);
    assert!(sender.validate_ref(reference).await.unwrap());

    let token = fx.validator.make_token(&sender_addr, &list, reference);
    assert!(token.starts_with("list@example.org:ref1:"));
}

#[tokio::test]
async fn correct_confirmation_reply_releases_stash() {
    let fx = Fixture::new().await;
    let sender_addr = addr("alice@example.net");
    let list = addr("list@example.org");
    let reference = "ref1";

    let mut sender = Sender::new(fx.store.clone(), sender_addr.clone());
    sender.stash(b"Subject: Hello\n\nhi", &[list.clone()], Some(reference)).await.unwrap();

    let token = fx.validator.make_token(&sender_addr, &list, reference);
    let refs = sender.get_refs().await.unwrap();
    let check = fx.validator.validate_token(&sender_addr, &token, &refs);
    assert!(check.is_valid());

    let action = sender.get_action().await.unwrap();
    let decision = decide(action, true, false, true, true, true);
    assert_eq!(decision.verdict, Verdict::Discard);
    assert_eq!(decision.effect, Effect::ReleaseStash);

    sender.clear_references();
    sender.set_action(Action::Accept).await.unwrap();
    let entries = sender.unstash().await.unwrap();
    assert_eq!(entries.len(), 1);

    assert_eq!(sender.get_refs().await.unwrap().len(), 0);
    let again = sender.unstash().await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn bad_mac_on_reply_is_rejected_and_state_unchanged() {
    let fx = Fixture::new().await;
    let sender_addr = addr("alice@example.net");
    let list = addr("list@example.org");
    let reference = "ref1";

    let mut sender = Sender::new(fx.store.clone(), sender_addr.clone());
    sender.stash(b"Subject: Hello\n\nhi", &[list.clone()], Some(reference)).await.unwrap();

    let mut token = fx.validator.make_token(&sender_addr, &list, reference);
    let last4: String = token.chars().rev().take(4).collect();
    let flipped: String = last4.chars().rev().map(|c| if c == 'A' { 'B' } else { 'A' }).collect();
    token.truncate(token.len() - 4);
    token.push_str(&flipped);

    let refs = sender.get_refs().await.unwrap();
    let check = fx.validator.validate_token(&sender_addr, &token, &refs);
    assert!(!check.is_valid());

    let action = sender.get_action().await.unwrap();
    let decision = decide(action, true, false, true, false, true);
    assert_eq!(decision.verdict, Verdict::Reject);
    assert_eq!(decision.effect, Effect::None);
    assert_eq!(sender.get_action().await.unwrap(), Action::Confirm);
}

#[tokio::test]
async fn bulk_header_suppresses_without_state_change() {
    let fx = Fixture::new().await;
    let sender_addr = addr("newsletter@example.net");
    let list = addr("list@example.org");

    let recipients = vec![list];
    let targets = challenge_recipients(&recipients, &fx.handlers).await.unwrap();
    assert_eq!(targets.len(), 1);

    let mut sender = Sender::new(fx.store.clone(), sender_addr.clone());
    let action = sender.get_action().await.unwrap();

    let decision = decide(action, true, true, false, false, true);
    assert_eq!(decision.verdict, Verdict::Discard);
    assert_eq!(decision.effect, Effect::None);
    assert_eq!(sender.get_action().await.unwrap(), Action::Unknown);
}

#[tokio::test]
async fn pre_confirmed_sender_is_accepted_without_state_change() {
    let fx = Fixture::new().await;
    let sender_addr = addr("alice@example.net");
    let list = addr("list@example.org");

    let mut sender = Sender::new(fx.store.clone(), sender_addr.clone());
    sender.set_action(Action::Accept).await.unwrap();

    let recipients = vec![list];
    let targets = challenge_recipients(&recipients, &fx.handlers).await.unwrap();

    let action = sender.get_action().await.unwrap();
    let decision = decide(action, !targets.is_empty(), false, false, false, true);
    assert_eq!(decision.verdict, Verdict::Accept);
    assert_eq!(decision.effect, Effect::None);
    assert_eq!(sender.get_action().await.unwrap(), Action::Accept);
}

#[tokio::test]
async fn irrelevant_recipient_is_accepted() {
    let fx = Fixture::new().await;
    let friend = addr("friend@example.net");

    let recipients = vec![friend];
    let targets = challenge_recipients(&recipients, &fx.handlers).await.unwrap();
    assert!(targets.is_empty());

    let sender_addr = addr("whoever@example.net");
    let mut sender = Sender::new(fx.store.clone(), sender_addr);
    let action = sender.get_action().await.unwrap();

    let decision = decide(action, false, false, false, false, true);
    assert_eq!(decision.verdict, Verdict::Accept);
    assert_eq!(decision.effect, Effect::None);
}
