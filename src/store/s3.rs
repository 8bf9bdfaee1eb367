use super::RawStore;
use crate::addressing::raw_uri;
use crate::config::S3Settings;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::BucketConfiguration;
use std::path::Path;
use tracing::{debug, info};

/// S3-compatible raw store (MinIO in local setups), path-style addressing.
pub struct S3RawStore {
    region: Region,
    credentials: Credentials,
}

impl S3RawStore {
    pub fn new(settings: &S3Settings) -> Result<Self> {
        let credentials = Credentials::new(
            Some(settings.access_key.as_str()),
            Some(settings.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| IngestError::Config(format!("object store credentials: {}", e)))?;
        let region = Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
        };
        Ok(Self { region, credentials })
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| IngestError::storage(format!("bucket handle '{}': {}", name, e)))?;
        Ok(bucket.with_path_style())
    }
}

// Codes S3/MinIO return when another creator got there first.
fn is_already_exists(err: &S3Error) -> bool {
    match err {
        S3Error::HttpFailWithBody(409, body) => {
            body.contains("BucketAlreadyOwnedByYou") || body.contains("BucketAlreadyExists")
        }
        _ => false,
    }
}

fn check_status(status: u16, bucket: &str, key: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(IngestError::storage(format!("PUT s3://{}/{} returned HTTP {}", bucket, key, status)))
    }
}

#[async_trait]
impl RawStore for S3RawStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let handle = self.bucket(bucket)?;
        let exists = handle
            .exists()
            .await
            .map_err(|e| IngestError::storage(format!("check bucket '{}': {}", bucket, e)))?;
        if exists {
            return Ok(());
        }

        info!(bucket, "Bucket not found, creating it");
        match Bucket::create_with_path_style(
            bucket,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        {
            Ok(response) if response.success() => Ok(()),
            Ok(response) => Err(IngestError::storage(format!(
                "create bucket '{}' returned HTTP {}: {}",
                bucket, response.response_code, response.response_text
            ))),
            Err(e) if is_already_exists(&e) => {
                debug!(bucket, "Bucket created concurrently");
                Ok(())
            }
            Err(e) => Err(IngestError::storage(format!("create bucket '{}': {}", bucket, e))),
        }
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let handle = self.bucket(bucket)?;
        let response = handle
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .map_err(|e| IngestError::storage(format!("PUT s3://{}/{}: {}", bucket, key, e)))?;
        check_status(response.status_code(), bucket, key)?;
        debug!(bucket, key, bytes = bytes.len(), "Raw object uploaded");
        Ok(raw_uri(bucket, key))
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path, content_type: &str) -> Result<String> {
        let handle = self.bucket(bucket)?;
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestError::storage(format!("open {}: {}", path.display(), e)))?;
        // Multipart uploads only become visible once completed; non-2xx
        // responses surface as errors from the client.
        handle
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await
            .map_err(|e| IngestError::storage(format!("PUT s3://{}/{}: {}", bucket, key, e)))?;
        debug!(bucket, key, source = %path.display(), "Raw object uploaded from file");
        Ok(raw_uri(bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_races_are_tolerated() {
        let owned = S3Error::HttpFailWithBody(409, "<Code>BucketAlreadyOwnedByYou</Code>".into());
        let taken = S3Error::HttpFailWithBody(409, "<Code>BucketAlreadyExists</Code>".into());
        let denied = S3Error::HttpFailWithBody(403, "<Code>AccessDenied</Code>".into());
        assert!(is_already_exists(&owned));
        assert!(is_already_exists(&taken));
        assert!(!is_already_exists(&denied));
    }

    #[test]
    fn non_success_status_is_a_storage_error() {
        assert!(check_status(200, "raw", "k").is_ok());
        assert!(matches!(check_status(503, "raw", "k"), Err(IngestError::Storage { .. })));
    }
}
