//! Outbound notification seam.
//!
//! Invitation emails go through this trait; the actual transport (SMTP or
//! otherwise) lives outside the crate. `LogMailer` records sends via tracing
//! and is the default for embedding and tests.

use crate::error::Result;

pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Mailer that only logs the outgoing message.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::info!(to, subject, bytes = body.len(), "outgoing mail");
        Ok(())
    }
}
