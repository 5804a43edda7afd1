//! Run notifications.
//!
//! A [`Notifier`] owns the sender, the recipients and the attempt counter;
//! the wire protocol lives behind [`Transport`]. Delivery problems never
//! leave this module: [`Notifier::send`] logs them and reports `false`.

#[cfg(feature = "aws")]
pub mod ses;
pub mod smtp;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, warn};

use crate::error::Result;

#[cfg(feature = "aws")]
pub use ses::SesTransport;
pub use smtp::SmtpRelay;

/// Attachments larger than this are left out of the message.
pub const MAX_ATTACHMENT_BYTES: u64 = 20_000_000;

pub const DEFAULT_SUBJECT_PREFIX: &str = "<automated> ";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// A fully assembled message, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl Attachment {
    /// Reads `path` into memory, refusing files over [`MAX_ATTACHMENT_BYTES`].
    pub fn load(path: &Path) -> std::result::Result<Self, String> {
        let size = fs::metadata(path).map_err(|e| e.to_string())?.len();
        if size > MAX_ATTACHMENT_BYTES {
            return Err(format!(
                "{size} bytes exceeds the {MAX_ATTACHMENT_BYTES} byte limit"
            ));
        }
        let content = fs::read(path).map_err(|e| e.to_string())?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self { file_name, content })
    }
}

/// Delivers an [`Email`] over some protocol.
pub trait Transport: Send + Sync {
    /// Short name for log messages.
    fn name(&self) -> &str;

    fn deliver(&self, email: &Email) -> Result<()>;
}

/// Sends run notifications through one [`Transport`], at most
/// `max_attempts` times over its lifetime.
pub struct Notifier {
    sender: String,
    recipients: Vec<String>,
    subject_prefix: String,
    max_attempts: u32,
    attempts: AtomicU32,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("transport", &self.transport.name())
            .field("attempts", &self.attempts())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Notifier {
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempts: AtomicU32::new(0),
            transport,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Delivery attempts made so far, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sends one message. Returns `true` if the transport accepted it.
    ///
    /// Once the attempt ceiling is reached the transport is not contacted
    /// again. Attachments that are too large or unreadable are dropped
    /// individually.
    pub fn send(&self, subject: &str, body: &str, attachments: &[PathBuf]) -> bool {
        if self.recipients.is_empty() {
            warn!(subject, "no notification recipients configured, not sending");
            return false;
        }

        let reserved = self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_attempts).then_some(n + 1)
            });
        let attempt = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => {
                warn!(
                    max_attempts = self.max_attempts,
                    subject, "notification attempt limit reached, dropping message"
                );
                return false;
            }
        };

        let email = Email {
            from: self.sender.clone(),
            to: self.recipients.clone(),
            subject: format!("{}{}", self.subject_prefix, subject),
            body: body.to_string(),
            attachments: load_attachments(attachments),
        };

        match self.transport.deliver(&email) {
            Ok(()) => {
                info!(
                    transport = self.transport.name(),
                    attempt,
                    subject = %email.subject,
                    "notification sent"
                );
                true
            }
            Err(e) => {
                warn!(
                    transport = self.transport.name(),
                    attempt,
                    error = %e,
                    "notification failed"
                );
                false
            }
        }
    }
}

fn load_attachments(paths: &[PathBuf]) -> Vec<Attachment> {
    paths
        .iter()
        .filter_map(|path| match Attachment::load(path) {
            Ok(attachment) => {
                debug!(path = %path.display(), "attaching file");
                Some(attachment)
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "skipping attachment");
                None
            }
        })
        .collect()
}
