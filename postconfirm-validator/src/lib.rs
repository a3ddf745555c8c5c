//! Confirmation token derivation and verification (component A).
//!
//! A token is `<recipient>:<reference>:<mac>` where `mac` is the
//! URL-safe, padding-stripped base64 encoding of
//! `HMAC-SHA224(key, "<sender>-<recipient>-<reference>")`. Purely
//! functional given the key: no I/O, no shared state beyond the key
//! bytes themselves.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha224;

use postconfirm_types::{Address, TokenCheck};

type HmacSha224 = Hmac<Sha224>;

pub struct Validator {
    key: Vec<u8>,
}

impl Validator {
    pub fn new(key: Vec<u8>) -> Validator {
        Validator { key }
    }

    fn mac_bytes(&self, sender: &Address, recipient: &Address, reference: &str) -> Vec<u8> {
        let mut mac =
            HmacSha224::new_from_slice(&self.key).expect("HMAC accepts a key of any length");
        mac.update(format!("{}-{}-{}", sender, recipient, reference).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// `mac = urlsafe_base64(HMAC_SHA224(key, "sender-recipient-reference"))`,
    /// padding stripped.
    pub fn mac(&self, sender: &Address, recipient: &Address, reference: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac_bytes(sender, recipient, reference))
    }

    /// `<recipient>:<reference>:<mac>`.
    pub fn make_token(&self, sender: &Address, recipient: &Address, reference: &str) -> String {
        format!(
            "{}:{}:{}",
            recipient,
            reference,
            self.mac(sender, recipient, reference)
        )
    }

    /// Parses the three colon-separated fields (fails if not exactly
    /// three); succeeds iff `reference` is one of `allowed_references`
    /// and the MAC matches under constant-time comparison. No partial
    /// information beyond the three-way [`TokenCheck`] is ever exposed.
    pub fn validate_token(
        &self,
        sender: &Address,
        candidate_token: &str,
        allowed_references: &std::collections::BTreeSet<String>,
    ) -> TokenCheck {
        let parts: Vec<&str> = candidate_token.trim().split(':').collect();
        let (recipient, reference, mac_field) = match parts.as_slice() {
            [r, reference, mac] => (*r, *reference, *mac),
            _ => return TokenCheck::Malformed,
        };

        if !allowed_references.contains(reference) {
            return TokenCheck::Malformed;
        }

        let recipient = Address::new(recipient);
        let candidate_mac = match URL_SAFE_NO_PAD.decode(mac_field) {
            Ok(bytes) => bytes,
            Err(_) => return TokenCheck::Malformed,
        };

        let mut mac = HmacSha224::new_from_slice(&self.key)
            .expect("HMAC accepts a key of any length");
        mac.update(format!("{}-{}-{}", sender, recipient, reference).as_bytes());
        match mac.verify_slice(&candidate_mac) {
            Ok(()) => TokenCheck::Valid,
            Err(_) => TokenCheck::MacMismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn refs(r: &str) -> BTreeSet<String> {
        let mut s = BTreeSet::new();
        s.insert(r.to_owned());
        s
    }

    #[test]
    fn round_trips() {
        let v = Validator::new(b"sekrit".to_vec());
        let sender = Address::new("alice@example.net");
        let recipient = Address::new("list@example.org");
        let token = v.make_token(&sender, &recipient, "abc123");
        assert_eq!(
            v.validate_token(&sender, &token, &refs("abc123")),
            TokenCheck::Valid
        );
    }

    #[test]
    fn single_byte_change_falsifies() {
        let v = Validator::new(b"sekrit".to_vec());
        let sender = Address::new("alice@example.net");
        let recipient = Address::new("list@example.org");
        let mut token = v.make_token(&sender, &recipient, "abc123");
        let last = token.pop().unwrap();
        let replacement = if last == 'A' { 'B' } else { 'A' };
        token.push(replacement);
        assert_ne!(
            v.validate_token(&sender, &token, &refs("abc123")),
            TokenCheck::Valid
        );
    }

    #[test]
    fn rejects_malformed_token() {
        let v = Validator::new(b"sekrit".to_vec());
        let sender = Address::new("alice@example.net");
        assert_eq!(
            v.validate_token(&sender, "not-a-token", &refs("abc123")),
            TokenCheck::Malformed
        );
    }

    #[test]
    fn rejects_unknown_reference_before_checking_mac() {
        let v = Validator::new(b"sekrit".to_vec());
        let sender = Address::new("alice@example.net");
        let recipient = Address::new("list@example.org");
        let token = v.make_token(&sender, &recipient, "abc123");
        assert_eq!(
            v.validate_token(&sender, &token, &refs("other-ref")),
            TokenCheck::Malformed
        );
    }
}
