use std::path::Path;

use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tokio::runtime::{Builder, Runtime};

use super::ObjectStore;
use crate::error::{Result, TaskwardenError};

/// Amazon S3 object store.
///
/// The SDK is async; a private current-thread runtime drives each call to
/// completion on the uploader thread.
pub struct S3Store {
    runtime: Runtime,
    client: Client,
}

impl S3Store {
    /// Builds a client from the default credential chain. `region` overrides
    /// the environment's region when given.
    pub fn new(region: Option<String>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            loader.load().await
        });
        Ok(Self {
            runtime,
            client: Client::new(&config),
        })
    }
}

impl ObjectStore for S3Store {
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<()> {
        let upload_error = |message: String| TaskwardenError::Upload {
            path: local_path.to_path_buf(),
            message,
        };

        self.runtime.block_on(async {
            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|e| upload_error(e.to_string()))?;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .acl(ObjectCannedAcl::BucketOwnerFullControl)
                .body(body)
                .send()
                .await
                .map_err(|e| upload_error(DisplayErrorContext(e).to_string()))?;
            Ok(())
        })
    }

    fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let download_error = |message: String| TaskwardenError::Download {
            location: format!("s3://{bucket}/{key}"),
            message,
        };

        self.runtime.block_on(async {
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| download_error(DisplayErrorContext(e).to_string()))?;
            let bytes = object
                .body
                .collect()
                .await
                .map_err(|e| download_error(e.to_string()))?
                .into_bytes();
            std::fs::write(local_path, &bytes).map_err(|e| download_error(e.to_string()))
        })
    }

    fn describe(&self) -> String {
        "s3".to_string()
    }
}
