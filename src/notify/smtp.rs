use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};

use super::{Email, Transport};
use crate::error::{Result, TaskwardenError};

/// SMTP delivery, either through an unauthenticated relay on this host or
/// through a remote relay with STARTTLS and credentials.
pub struct SmtpRelay {
    transport: SmtpTransport,
    name: String,
}

impl SmtpRelay {
    /// Plain SMTP to a relay on `localhost:25`, as a local MTA provides.
    pub fn local() -> Self {
        Self {
            transport: SmtpTransport::builder_dangerous("localhost").build(),
            name: "smtp localhost".to_string(),
        }
    }

    /// STARTTLS to `host:port` with username/password authentication.
    pub fn authenticated(host: &str, port: u16, username: &str, password: &str) -> Result<Self> {
        let transport = SmtpTransport::starttls_relay(host)
            .map_err(|e| TaskwardenError::Notify(format!("invalid SMTP relay '{host}': {e}")))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(Self {
            transport,
            name: format!("smtp {host}:{port}"),
        })
    }
}

impl Transport for SmtpRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, email: &Email) -> Result<()> {
        let message = to_mime(email)?;
        self.transport
            .send(&message)
            .map_err(|e| TaskwardenError::Notify(e.to_string()))?;
        Ok(())
    }
}

/// Builds a `multipart/mixed` message: the plain-text body followed by one
/// part per attachment.
pub(crate) fn to_mime(email: &Email) -> Result<Message> {
    let parse_mailbox = |address: &str| -> Result<Mailbox> {
        address
            .parse()
            .map_err(|e| TaskwardenError::Notify(format!("invalid address '{address}': {e}")))
    };

    let mut builder = Message::builder()
        .from(parse_mailbox(&email.from)?)
        .subject(email.subject.clone());
    for recipient in &email.to {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    let octet_stream = ContentType::parse("application/octet-stream")
        .map_err(|e| TaskwardenError::Notify(e.to_string()))?;
    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
    for attachment in &email.attachments {
        body = body.singlepart(
            MimeAttachment::new(attachment.file_name.clone())
                .body(attachment.content.clone(), octet_stream.clone()),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| TaskwardenError::Notify(e.to_string()))
}
