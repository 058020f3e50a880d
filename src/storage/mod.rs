//! Object storage for extraction artifacts (spec §6 "Stored artifacts").
//!
//! The teacher's own `storage.rs` is local-filesystem-only and has no
//! bucket concept; this is grounded instead on
//! `yonasBSD-readur/src/services/s3_service.rs`'s `aws-sdk-s3` client setup
//! (custom credentials, region, optional custom endpoint for S3-compatible
//! backends like MinIO).

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use thiserror::Error;

use crate::config::EnvironmentConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload to {bucket}/{key} failed: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("download of {bucket}/{key} failed: {source}")]
    Download {
        bucket: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Object storage for one environment (spec §4.1: every environment owns
/// its own storage client, never shared).
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

pub struct S3StorageClient {
    client: Client,
}

impl S3StorageClient {
    pub async fn new(config: &EnvironmentConfig) -> anyhow::Result<Self> {
        let credentials = Credentials::new(
            &config.s3_access_key_id,
            &config.s3_secret_access_key,
            None,
            None,
            "greffier-storage",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .region(Region::new(config.s3_region.clone()))
            .credentials_provider(credentials)
            .behavior_version_latest();

        if !config.s3_endpoint.is_empty() {
            builder = builder.endpoint_url(&config.s3_endpoint);
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self { client })
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(bytes.into())
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.into(),
            })?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.into(),
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: e.into(),
            })?;

        Ok(body.into_bytes().to_vec())
    }
}

/// Builds the object key for an extraction artifact: `{id}/{sanitized-document-id}-{timestamp}.pdf`
/// (spec §6).
pub fn extraction_object_key(session_or_job_id: &str, document_id: &str, timestamp_unix: i64) -> String {
    format!(
        "{session_or_job_id}/{}-{timestamp_unix}.pdf",
        sanitize_key_component(document_id)
    )
}

/// Builds the object key for a personal-rights result:
/// `rdprm-documents/{session_id}/{sanitized-company-name}.pdf` (spec §6).
pub fn personal_rights_object_key(session_id: &str, company_name: &str) -> String {
    format!(
        "{session_id}/{}.pdf",
        sanitize_key_component(company_name)
    )
}

/// Strips characters that are awkward in an S3 object key (slashes, control
/// characters) and collapses whitespace, matching the "sanitized" naming
/// spec §6 calls for without specifying exact rules.
fn sanitize_key_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_slashes_and_spaces() {
        assert_eq!(sanitize_key_component("Cadastre du Québec/42"), "Cadastre-du-Qu-bec-42");
    }

    #[test]
    fn builds_extraction_key() {
        let key = extraction_object_key("session-1", "1425100", 1_700_000_000);
        assert_eq!(key, "session-1/1425100-1700000000.pdf");
    }

    #[test]
    fn builds_personal_rights_key() {
        let key = personal_rights_object_key("session-1", "Acme Corp");
        assert_eq!(key, "session-1/Acme-Corp.pdf");
    }
}
