use aws_sdk_ses::config::Region;
use aws_sdk_ses::error::DisplayErrorContext;
use aws_sdk_ses::primitives::Blob;
use aws_sdk_ses::types::RawMessage;
use aws_sdk_ses::Client;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::smtp::to_mime;
use super::{Email, Transport};
use crate::error::{Result, TaskwardenError};

pub const DEFAULT_SES_REGION: &str = "us-west-2";

/// Amazon SES delivery through `SendRawEmail`, which keeps attachments.
///
/// The sender address must be verified with SES (and, while the account is
/// in the sandbox, every recipient too).
pub struct SesTransport {
    runtime: Runtime,
    client: Client,
}

impl SesTransport {
    pub fn new(region: Option<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let region = region.unwrap_or_else(|| DEFAULT_SES_REGION.to_string());
        let config = runtime.block_on(
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(Region::new(region))
                .load(),
        );
        Ok(Self {
            runtime,
            client: Client::new(&config),
        })
    }
}

impl Transport for SesTransport {
    fn name(&self) -> &str {
        "ses"
    }

    fn deliver(&self, email: &Email) -> Result<()> {
        let raw = RawMessage::builder()
            .data(Blob::new(to_mime(email)?.formatted()))
            .build()
            .map_err(|e| TaskwardenError::Notify(e.to_string()))?;

        let output = self
            .runtime
            .block_on(
                self.client
                    .send_raw_email()
                    .source(email.from.clone())
                    .set_destinations(Some(email.to.clone()))
                    .raw_message(raw)
                    .send(),
            )
            .map_err(|e| TaskwardenError::Notify(DisplayErrorContext(e).to_string()))?;

        debug!(message_id = ?output.message_id(), "SES accepted message");
        Ok(())
    }
}
