//! Pooled SMTP submission to a single configured relay (component E).
//!
//! A single connection is kept across successive calls: before reuse,
//! a NOOP probes it, and on any sign of disconnection the client
//! reconnects once and retries the probe. Send failures are logged and
//! swallowed — delivery problems must never hold up a milter verdict.

use std::time::Duration;

use mail_send::{smtp::message::Message as SmtpMessage, SmtpClient, SmtpClientBuilder};
use tokio::{net::TcpStream, sync::Mutex};
use tracing::warn;

use postconfirm_types::Address;

pub struct Remailer {
    host: String,
    port: u16,
    default_sender: Address,
    client: Mutex<Option<SmtpClient<TcpStream>>>,
}

impl Remailer {
    pub fn new(host: String, port: u16, default_sender: Address) -> Remailer {
        Remailer {
            host,
            port,
            default_sender,
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> mail_send::Result<SmtpClient<TcpStream>> {
        SmtpClientBuilder::new(self.host.as_str(), self.port)
            .implicit_tls(false)
            .timeout(Duration::from_secs(60))
            .connect_plain()
            .await
    }

    /// Probes the cached connection with NOOP; reconnects once on any
    /// failure so the following send proceeds on a fresh connection.
    async fn ensure_connected(&self, guard: &mut Option<SmtpClient<TcpStream>>) -> bool {
        if let Some(client) = guard.as_mut() {
            if client.noop().await.is_ok() {
                return true;
            }
        }
        match self.connect().await {
            Ok(client) => {
                *guard = Some(client);
                true
            }
            Err(err) => {
                warn!(host = %self.host, port = self.port, %err, "could not connect to relay");
                *guard = None;
                false
            }
        }
    }

    /// Submits `message` to `recipients`, from `sender` if given or the
    /// configured default otherwise. Best-effort: failures are logged,
    /// never propagated — the caller's verdict has already been decided.
    pub async fn send(&self, recipients: &[Address], message: &[u8], sender: Option<&Address>) {
        let mut guard = self.client.lock().await;
        if !self.ensure_connected(&mut guard).await {
            return;
        }

        let from = sender.unwrap_or(&self.default_sender);
        let msg = SmtpMessage {
            mail_from: from.as_str().into(),
            rcpt_to: recipients.iter().map(|a| a.as_str().into()).collect(),
            body: message.into(),
        };

        if let Some(client) = guard.as_mut() {
            if let Err(err) = client.send(msg).await {
                warn!(%err, "smtp submission failed");
                // Drop the broken connection; the next send reconnects.
                *guard = None;
            }
        }
    }

    /// Graceful QUIT on scope exit; an already-disconnected peer is not
    /// an error.
    pub async fn close(&self) {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            let _ = client.quit().await;
        }
    }
}
