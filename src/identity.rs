//! Machine identity for log file names, upload keys and notification text.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, TaskwardenError};

const EC2_METADATA_URL: &str = "http://169.254.169.254";
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN_TTL_SECS: &str = "21600";

/// Which machine a run happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineIdentity {
    /// A cloud instance, by instance id.
    Instance(String),
    /// Any other machine, by host name.
    Host(String),
}

impl MachineIdentity {
    /// The bare identifier, suitable for file names and object keys.
    pub fn id(&self) -> &str {
        match self {
            MachineIdentity::Instance(id) | MachineIdentity::Host(id) => id,
        }
    }

    /// `Some(id)` for cloud instances.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            MachineIdentity::Instance(id) => Some(id),
            MachineIdentity::Host(_) => None,
        }
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineIdentity::Instance(id) => write!(f, "instance {id}"),
            MachineIdentity::Host(name) => write!(f, "local machine {name}"),
        }
    }
}

pub trait IdentityProvider {
    fn resolve(&self) -> Result<MachineIdentity>;
}

/// Reads the instance id from the EC2 instance metadata service.
///
/// Uses an IMDSv2 session token when the service hands one out and falls
/// back to an unauthenticated IMDSv1 request otherwise.
pub struct Ec2Metadata {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceIdentityDocument {
    instance_id: String,
}

impl Ec2Metadata {
    pub fn new() -> Result<Self> {
        Self::with_base_url(EC2_METADATA_URL)
    }

    /// Talks to a metadata service at `base_url` instead of the link-local
    /// default.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| TaskwardenError::Identity(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn session_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}/latest/api/token", self.base_url))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECS)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text());
        match response {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(error = %e, "no IMDSv2 token, falling back to IMDSv1");
                None
            }
        }
    }
}

impl IdentityProvider for Ec2Metadata {
    fn resolve(&self) -> Result<MachineIdentity> {
        let url = format!(
            "{}/latest/dynamic/instance-identity/document",
            self.base_url
        );
        let mut request = self.client.get(&url);
        if let Some(token) = self.session_token() {
            request = request.header("X-aws-ec2-metadata-token", token);
        }

        let body = request
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| {
                TaskwardenError::Identity(format!(
                    "{e}. Check that this is an EC2 instance, or run without cloud mode"
                ))
            })?;
        let document: InstanceIdentityDocument = serde_json::from_str(&body).map_err(|e| {
            TaskwardenError::Identity(format!("malformed instance identity document: {e}"))
        })?;
        Ok(MachineIdentity::Instance(document.instance_id))
    }
}

/// Identifies the machine by its host name.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHostname;

impl IdentityProvider for LocalHostname {
    fn resolve(&self) -> Result<MachineIdentity> {
        let name = sysinfo::System::host_name()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                warn!("host name unavailable, using 'localhost'");
                "localhost".to_string()
            });
        Ok(MachineIdentity::Host(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_machine() {
        assert_eq!(
            MachineIdentity::Instance("i-0abc".to_string()).to_string(),
            "instance i-0abc"
        );
        assert_eq!(
            MachineIdentity::Host("build01".to_string()).to_string(),
            "local machine build01"
        );
    }

    #[test]
    fn test_instance_id_only_for_instances() {
        let instance = MachineIdentity::Instance("i-0abc".to_string());
        let host = MachineIdentity::Host("build01".to_string());
        assert_eq!(instance.instance_id(), Some("i-0abc"));
        assert_eq!(host.instance_id(), None);
        assert_eq!(host.id(), "build01");
    }

    #[test]
    fn test_identity_document_parses_instance_id() {
        let json = r#"{"accountId":"123","instanceId":"i-0abc","region":"us-west-2"}"#;
        let document: InstanceIdentityDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.instance_id, "i-0abc");
    }

    #[test]
    fn test_unreachable_metadata_service_is_an_identity_error() {
        let provider = Ec2Metadata::with_base_url("http://127.0.0.1:9/").unwrap();
        let err = provider.resolve().unwrap_err();
        assert!(matches!(err, TaskwardenError::Identity(_)));
    }

    #[test]
    fn test_local_hostname_is_never_empty() {
        let identity = LocalHostname.resolve().unwrap();
        assert!(matches!(identity, MachineIdentity::Host(_)));
        assert!(!identity.id().is_empty());
    }
}
