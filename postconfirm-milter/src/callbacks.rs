use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use bytes::Bytes;
use indymilter::{Callbacks, Context, NegotiateContext, Status};
use tracing::{debug, error, instrument, warn};

use postconfirm_engine::{decide, Effect};
use postconfirm_sender::Sender;
use postconfirm_types::{Address, Verdict};

use crate::classify::{challenge_token, extract_reference, is_challenge_response, should_drop};
use crate::context::{AppContext, MessageContext};

fn verdict_to_status(verdict: Verdict) -> Status {
    match verdict {
        Verdict::Accept => Status::Accept,
        Verdict::Reject => Status::Reject,
        Verdict::Discard => Status::Discard,
    }
}

async fn on_negotiate(context: &mut NegotiateContext<MessageContext>) -> Status {
    // Postconfirm never rewrites headers or the body; no extended
    // actions are requested beyond the protocol defaults.
    context.data = Some(MessageContext::default());
    Status::Continue
}

async fn on_mail(context: &mut Context<MessageContext>, args: Vec<CString>) -> Status {
    let Some(from) = args.into_iter().next() else {
        return Status::Reject;
    };
    context.data = Some(MessageContext {
        sender: Some(Address::new(&from.to_string_lossy())),
        ..Default::default()
    });
    Status::Continue
}

async fn on_rcpt(context: &mut Context<MessageContext>, args: Vec<CString>) -> Status {
    let Some(to) = args.into_iter().next() else {
        return Status::Reject;
    };
    let Some(ctx) = context.data.as_mut() else {
        return Status::Reject;
    };
    ctx.recipients.push(Address::new(&to.to_string_lossy()));
    Status::Continue
}

async fn on_header(context: &mut Context<MessageContext>, name: CString, value: CString) -> Status {
    let Some(ctx) = context.data.as_mut() else {
        return Status::Reject;
    };
    let name = name.to_string_lossy().into_owned();
    let value = value.to_string_lossy().into_owned();
    if name.eq_ignore_ascii_case("Subject") {
        ctx.raw_subject = Some(value.clone());
    }
    ctx.headers.push((name, value));
    Status::Continue
}

async fn on_eoh(context: &mut Context<MessageContext>) -> Status {
    let Some(ctx) = context.data.as_mut() else {
        return Status::Reject;
    };
    // Best-effort MIME decoding of the Subject: reconstruct a
    // header-only message and let mail-parser decode encoded words; on
    // parse failure `MessageContext::subject` falls back to the raw
    // value captured in `on_header`.
    let header_block: String = ctx
        .headers
        .iter()
        .map(|(k, v)| format!("{}: {}\r\n", k, v))
        .collect();
    let blob = format!("{}\r\n", header_block);
    if let Some(message) = mail_parser::MessageParser::default().parse(blob.as_bytes()) {
        ctx.decoded_subject = message.subject().map(|s| s.to_string());
    }
    Status::Continue
}

async fn on_body(context: &mut Context<MessageContext>, data: Bytes) -> Status {
    let Some(ctx) = context.data.as_mut() else {
        return Status::Reject;
    };
    ctx.body.extend_from_slice(&data);
    Status::Continue
}

fn reform_email_text(ctx: &MessageContext) -> Vec<u8> {
    let mut out = String::new();
    for (name, value) in &ctx.headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&ctx.body);
    bytes
}

/// Composes and sends the challenge email for `reference`, per §4.G's
/// challenge-email shape.
async fn issue_challenge(
    app: &AppContext,
    sender: &Address,
    challenge_recipient: &Address,
    reference: &str,
    subject: Option<&str>,
) {
    let token = app.validator.make_token(sender, challenge_recipient, reference);

    let mut variables = HashMap::new();
    variables.insert("subject".to_owned(), subject.unwrap_or("").to_owned());
    variables.insert("sender_address".to_owned(), sender.to_string());
    variables.insert("recipient_address".to_owned(), challenge_recipient.to_string());
    variables.insert("challenge_address".to_owned(), challenge_recipient.to_string());
    variables.insert("admin_address".to_owned(), app.config.admin_address.clone());
    variables.insert("id".to_owned(), reference.to_owned());
    variables.insert("full_ref".to_owned(), reference.to_owned());

    let body = app.renderer.render(&app.mail_template_source, &variables);

    let message = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: Confirm: {token}\r\nAuto-Submitted: auto-replied\r\n\r\n{body}",
        from = challenge_recipient,
        to = sender,
        token = token,
        body = body,
    );

    app.remailer
        .send(&[sender.clone()], message.as_bytes(), Some(challenge_recipient))
        .await;
}

#[instrument(skip(app, ctx), fields(sender))]
async fn process_message(app: &AppContext, ctx: &MessageContext) -> Status {
    let Some(sender_addr) = ctx.sender.clone() else {
        return Status::Reject;
    };
    tracing::Span::current().record("sender", sender_addr.as_str());

    let challenge_recipients =
        match postconfirm_challenge::challenge_recipients(&ctx.recipients, &app.challenge_handlers).await {
            Ok(v) => v,
            Err(err) => {
                error!(%err, "challenge lookup failed");
                Vec::new()
            }
        };

    let subject = ctx.subject();
    let drop = should_drop(ctx, &app.bulk_regex, &app.auto_submitted_regex);
    let response = is_challenge_response(subject);

    let mut sender = Sender::new(app.store.clone(), sender_addr.clone());
    let action = match sender.get_action().await {
        Ok(a) => a,
        Err(err) => {
            error!(%err, "store lookup failed, folding to Unknown");
            postconfirm_types::Action::Unknown
        }
    };

    let token_valid = if response && action == postconfirm_types::Action::Confirm {
        match subject.and_then(challenge_token) {
            Some(token) => match sender.get_refs().await {
                Ok(refs) => app.validator.validate_token(&sender_addr, token, &refs).is_valid(),
                Err(err) => {
                    error!(%err, "store lookup failed while validating token");
                    false
                }
            },
            None => false,
        }
    } else {
        false
    };

    let decision = decide(
        action,
        !challenge_recipients.is_empty(),
        drop,
        response,
        token_valid,
        app.config.resend_confirmation,
    );

    debug!(verdict = ?decision.verdict, effect = ?decision.effect, "verdict computed");

    match decision.effect {
        Effect::None => {}
        Effect::Stash { send_challenge } => {
            let reference = extract_reference(ctx);
            let message = reform_email_text(ctx);
            if let Err(err) = sender
                .stash(&message, &ctx.recipients, Some(reference.as_str()))
                .await
            {
                warn!(%err, "failed to stash message");
            } else if send_challenge {
                if let Some(first) = challenge_recipients.first() {
                    issue_challenge(app, &sender_addr, first, &reference, subject).await;
                }
            }
        }
        Effect::ReleaseStash => {
            sender.clear_references();
            if let Err(err) = sender.set_action(postconfirm_types::Action::Accept).await {
                warn!(%err, "failed to persist Accept after confirmation");
            }
            match sender.unstash().await {
                Ok(entries) => {
                    for entry in entries {
                        app.remailer.send(&entry.recipients, &entry.message, Some(&sender_addr)).await;
                    }
                }
                Err(err) => warn!(%err, "failed to drain stash"),
            }
        }
    }

    verdict_to_status(decision.verdict)
}

async fn on_eom(
    context: &mut indymilter::EomContext<MessageContext>,
    app: Arc<AppContext>,
) -> Status {
    let Some(ctx) = context.data.as_ref() else {
        return Status::Reject;
    };
    process_message(&app, ctx).await
}

pub fn build_callbacks(app: Arc<AppContext>) -> Callbacks<MessageContext> {
    Callbacks::new()
        .on_negotiate(|context, _, _| Box::pin(on_negotiate(context)))
        .on_mail(|context, args| Box::pin(on_mail(context, args)))
        .on_rcpt(|context, args| Box::pin(on_rcpt(context, args)))
        .on_header(|context, name, value| Box::pin(on_header(context, name, value)))
        .on_eoh(|context| Box::pin(on_eoh(context)))
        .on_body(|context, data| Box::pin(on_body(context, data)))
        .on_eom(move |context| Box::pin(on_eom(context, Arc::clone(&app))))
}
