use rand::Rng;
use regex::Regex;

use crate::context::MessageContext;

/// `Precedence: bulk` / `Auto-Submitted: auto-replied`-style
/// suppression, matched against the configured regexes after
/// left-trimming the header value.
pub fn should_drop(ctx: &MessageContext, bulk_regex: &Regex, auto_submitted_regex: &Regex) -> bool {
    ctx.headers.iter().any(|(name, value)| {
        let trimmed = value.trim_start();
        (name.eq_ignore_ascii_case("Precedence") && bulk_regex.is_match(trimmed))
            || (name.eq_ignore_ascii_case("Auto-Submitted") && auto_submitted_regex.is_match(trimmed))
    })
}

thread_local! {
    static CONFIRM_SUBJECT: Regex =
        Regex::new(r"Confirm:[ \t]+(\S+)").expect("static confirm-subject regex is valid");
}

/// Subject contains the token pattern `Confirm: <recipient>:<ref>:<mac>`
/// (case-sensitive, anywhere in the subject — a reply subject typically
/// carries a `Re: ` prefix).
pub fn challenge_token(subject: &str) -> Option<&str> {
    CONFIRM_SUBJECT.with(|re| re.captures(subject).map(|c| {
        let m = c.get(1).expect("capture group 1 always present on a match");
        &subject[m.start()..m.end()]
    }))
}

pub fn is_challenge_response(subject: Option<&str>) -> bool {
    subject.and_then(challenge_token).is_some()
}

thread_local! {
    static MESSAGE_ID_BRACKETS: Regex =
        Regex::new(r"<([^>]*)>").expect("static Message-Id regex is valid");
}

const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-";

/// If any `Message-Id` header exists, the portion before the first `@`
/// of its first `<...>`-bracketed group, with colons stripped;
/// otherwise a fresh random 10-character identifier.
pub fn extract_reference(ctx: &MessageContext) -> String {
    let message_id = ctx
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Message-Id"))
        .map(|(_, value)| value.as_str());

    if let Some(value) = message_id {
        if let Some(slug) = MESSAGE_ID_BRACKETS.with(|re| {
            re.captures(value).map(|c| {
                let inner = c.get(1).map(|m| m.as_str()).unwrap_or("");
                inner.split('@').next().unwrap_or("").replace(':', "")
            })
        }) {
            if !slug.is_empty() {
                return slug;
            }
        }
    }

    let mut rng = rand::thread_rng();
    (0..10)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect()
}
