//! Plain data types shared by every postconfirm crate: the canonical
//! address newtype, the closed sender-action enum, and the stash/
//! challenge record shapes. Kept free of any I/O so that `postconfirm-
//! store`, `postconfirm-sender`, `postconfirm-challenge` and
//! `postconfirm-engine` can all depend on it without pulling in a
//! runtime.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A case-insensitive email address, canonical once constructed: the
/// whole string is lowercased and a BATV prefix of the shape
/// `token=token=...@...` is stripped from the local part. Every other
/// component receives only `Address` values, never a raw `String`, so
/// canonicalisation happens in exactly one place.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: &str) -> Address {
        Address(strip_batv(&raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

// `^[A-Za-z0-9-]+=[A-Za-z0-9-]+=[^=]+@` — matches the original's BATV
// detection; the matched prefix up to and including the second `=` is
// dropped, leaving the local part that follows.
fn strip_batv(lowered: &str) -> String {
    thread_local! {
        static BATV: Regex =
            Regex::new(r"^[a-z0-9-]+=[a-z0-9-]+=").expect("static BATV regex is valid");
    }
    BATV.with(|re| re.replace(lowered, "").into_owned())
}

/// Per-sender (or per-recipient, for `ChallengeRule`) state. Closed set:
/// the Store's `action` / `action_to_take` columns only ever hold one of
/// these six lowercase strings, so the `sqlx::Type` impl in
/// `postconfirm-store` rejects anything else at decode time rather than
/// letting an unknown string reach the Decision Engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Unknown,
    Confirm,
    Accept,
    Reject,
    Discard,
    Expired,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Unknown => "unknown",
            Action::Confirm => "confirm",
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Discard => "discard",
            Action::Expired => "expired",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which logical table a record came from. Lookups are the union of
/// both; writes always target `Runtime`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordSource {
    Runtime,
    Static,
}

/// `senders.type` / `senders_static.type` / `challenges.challenge_type`:
/// a single char on the wire, `E` or `P`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RecordType {
    Exact,
    Pattern,
}

impl RecordType {
    pub fn as_char(&self) -> char {
        match self {
            RecordType::Exact => 'E',
            RecordType::Pattern => 'P',
        }
    }
}

/// A resolved sender row: action plus the accumulated reference set.
/// References are a `BTreeSet` (not a `Vec`) because the Store
/// canonicalises the `ref` column's three on-wire shapes (null, bare
/// string, JSON array) into a set on every read.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct SenderState {
    pub action: Action,
    pub references: std::collections::BTreeSet<String>,
}

impl Default for Action {
    fn default() -> Self {
        Action::Unknown
    }
}

/// A pattern-table fallback row: `sender` is a regex, matched
/// full-string and case-insensitively; references are ignored for
/// patterns (the spec's `PatternRecord` entity).
#[derive(Clone, Debug)]
pub struct PatternRecord {
    pub pattern: Regex,
    pub action: Action,
    pub source: RecordSource,
}

/// One queued message awaiting release, as returned by
/// `Store::drain_stash`. `id` mirrors the `SERIAL` primary key.
#[derive(Clone, Debug)]
pub struct StashEntry {
    pub id: i64,
    pub sender: Address,
    pub recipients: Vec<Address>,
    pub message: Vec<u8>,
    pub created: chrono::DateTime<chrono::Utc>,
}

/// A recipient-side challenge policy row: `ignore`/`challenge`/
/// `unknown`, reusing `Action`'s three relevant variants is tempting but
/// would let `Confirm`/`Reject`/`Discard`/`Expired`/`Accept` leak into a
/// place that must never hold them, so this is its own closed type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChallengePolicy {
    Unknown,
    Ignore,
    Challenge,
}

/// Outcome of validating a confirmation token, kept as an explicit
/// tagged result (per the design notes' "normalise mixed exceptions and
/// booleans to explicit tagged results") rather than a bare `bool`, so
/// callers can log the distinction between a malformed token and one
/// that parsed but failed the MAC check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenCheck {
    Valid,
    Malformed,
    MacMismatch,
}

impl TokenCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenCheck::Valid)
    }
}

/// The milter-level verdict a session may emit; exactly one per
/// message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Accept,
    Reject,
    Discard,
}

#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("invalid action string from store: {0:?}")]
    InvalidAction(String),
}

impl std::str::FromStr for Action {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Action::Unknown),
            "confirm" => Ok(Action::Confirm),
            "accept" => Ok(Action::Accept),
            "reject" => Ok(Action::Reject),
            "discard" => Ok(Action::Discard),
            "expired" => Ok(Action::Expired),
            other => Err(TypesError::InvalidAction(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_batv() {
        let a = Address::new("Owner=abcd=alice@Example.NET");
        assert_eq!(a.as_str(), "alice@example.net");
    }

    #[test]
    fn leaves_plain_address_untouched() {
        let a = Address::new("Alice@Example.Net");
        assert_eq!(a.as_str(), "alice@example.net");
    }

    #[test]
    fn action_round_trips_through_str() {
        for a in [
            Action::Unknown,
            Action::Confirm,
            Action::Accept,
            Action::Reject,
            Action::Discard,
            Action::Expired,
        ] {
            let s = a.as_str();
            assert_eq!(s.parse::<Action>().unwrap(), a);
        }
    }

    #[test]
    fn rejects_unknown_action_string() {
        assert!("bogus".parse::<Action>().is_err());
    }
}
