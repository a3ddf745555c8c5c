use std::sync::Arc;

use regex::Regex;

use postconfirm_challenge::ChallengeHandler;
use postconfirm_remailer::Remailer;
use postconfirm_settings::AppConfig;
use postconfirm_store::Store;
use postconfirm_types::Address;
use postconfirm_validator::Validator;

use crate::TemplateRenderer;

/// Everything a session needs, built once at startup and handed to
/// every connection: replaces a process-wide mutable service locator,
/// see DESIGN.md.
pub struct AppContext {
    pub config: AppConfig,
    pub validator: Validator,
    pub store: Arc<dyn Store>,
    pub challenge_handlers: Vec<Box<dyn ChallengeHandler>>,
    pub remailer: Remailer,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub mail_template_source: String,
    pub bulk_regex: Regex,
    pub auto_submitted_regex: Regex,
}

/// Per-message state accumulated across the milter callback sequence.
/// Reset between messages on the same connection by `on_mail`.
#[derive(Default)]
pub struct MessageContext {
    pub sender: Option<Address>,
    pub recipients: Vec<Address>,
    pub headers: Vec<(String, String)>,
    pub raw_subject: Option<String>,
    pub decoded_subject: Option<String>,
    pub body: Vec<u8>,
}

impl MessageContext {
    pub fn subject(&self) -> Option<&str> {
        self.decoded_subject
            .as_deref()
            .or(self.raw_subject.as_deref())
    }
}
