//! The decision table (component G): a pure function of sender action,
//! whether any recipient requires a challenge, the bulk/auto-submitted
//! classification, whether the message is itself a confirmation reply,
//! and (when relevant) whether that reply's token validated. No I/O,
//! no Store, no Re-mailer — the caller performs whatever the returned
//! [`Effect`] names.

use postconfirm_types::{Action, Verdict};

/// What the Milter Session must do in addition to emitting the
/// verdict. `Effect::None` means no side effect at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Effect {
    None,
    /// Stash the message under the sender; send a challenge email if
    /// `send_challenge` is true.
    Stash { send_challenge: bool },
    /// The confirmation reply's token validated: clear references,
    /// promote to `Accept`, and release (drain and resend) the stash.
    ReleaseStash,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    pub effect: Effect,
}

/// First match wins, exhaustive over the Cartesian product named by
/// the table this mirrors.
#[allow(clippy::too_many_arguments)]
pub fn decide(
    action: Action,
    challenge_recipients_present: bool,
    should_drop: bool,
    is_challenge_response: bool,
    token_valid: bool,
    resend_confirmation: bool,
) -> Decision {
    if challenge_recipients_present && should_drop {
        return Decision { verdict: Verdict::Discard, effect: Effect::None };
    }

    if challenge_recipients_present && !is_challenge_response {
        return match action {
            Action::Accept => Decision { verdict: Verdict::Accept, effect: Effect::None },
            Action::Reject => Decision { verdict: Verdict::Reject, effect: Effect::None },
            Action::Discard => Decision { verdict: Verdict::Discard, effect: Effect::None },
            Action::Unknown | Action::Expired | Action::Confirm => {
                let send_challenge = match action {
                    Action::Unknown | Action::Expired => true,
                    Action::Confirm => resend_confirmation,
                    _ => unreachable!(),
                };
                Decision {
                    verdict: Verdict::Discard,
                    effect: Effect::Stash { send_challenge },
                }
            }
        };
    }

    if is_challenge_response && action == Action::Confirm {
        return if token_valid {
            Decision { verdict: Verdict::Discard, effect: Effect::ReleaseStash }
        } else {
            Decision { verdict: Verdict::Reject, effect: Effect::None }
        };
    }

    if is_challenge_response {
        return Decision { verdict: Verdict::Discard, effect: Effect::None };
    }

    Decision { verdict: Verdict::Accept, effect: Effect::None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_header_suppresses_regardless_of_action() {
        let d = decide(Action::Unknown, true, true, false, false, true);
        assert_eq!(d, Decision { verdict: Verdict::Discard, effect: Effect::None });
    }

    #[test]
    fn accepted_sender_passes_through() {
        let d = decide(Action::Accept, true, false, false, false, true);
        assert_eq!(d, Decision { verdict: Verdict::Accept, effect: Effect::None });
    }

    #[test]
    fn unknown_sender_is_stashed_and_challenged() {
        let d = decide(Action::Unknown, true, false, false, false, true);
        assert_eq!(
            d,
            Decision { verdict: Verdict::Discard, effect: Effect::Stash { send_challenge: true } }
        );
    }

    #[test]
    fn confirm_sender_without_resend_is_stashed_silently() {
        let d = decide(Action::Confirm, true, false, false, false, false);
        assert_eq!(
            d,
            Decision { verdict: Verdict::Discard, effect: Effect::Stash { send_challenge: false } }
        );
    }

    #[test]
    fn valid_confirmation_reply_releases_the_stash() {
        let d = decide(Action::Confirm, true, false, true, true, true);
        assert_eq!(d, Decision { verdict: Verdict::Discard, effect: Effect::ReleaseStash });
    }

    #[test]
    fn invalid_confirmation_reply_is_rejected() {
        let d = decide(Action::Confirm, true, false, true, false, true);
        assert_eq!(d, Decision { verdict: Verdict::Reject, effect: Effect::None });
    }

    #[test]
    fn confirmation_reply_from_non_confirm_sender_is_discarded() {
        let d = decide(Action::Accept, true, false, true, false, true);
        assert_eq!(d, Decision { verdict: Verdict::Discard, effect: Effect::None });
    }

    #[test]
    fn irrelevant_recipient_is_accepted() {
        let d = decide(Action::Unknown, false, false, false, false, true);
        assert_eq!(d, Decision { verdict: Verdict::Accept, effect: Effect::None });
    }
}
