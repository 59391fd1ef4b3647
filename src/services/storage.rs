use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::config::Settings;

const DELETE_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredObject {
    pub(crate) size: i64,
    pub(crate) sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DeleteFailure {
    pub(crate) key: String,
    pub(crate) reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct DeleteReport {
    pub(crate) ok: bool,
    pub(crate) failed: Vec<DeleteFailure>,
}

impl DeleteReport {
    pub(crate) fn from_failures(failed: Vec<DeleteFailure>) -> Self {
        Self { ok: failed.is_empty(), failed }
    }
}

/// Blob storage holding the submitted essay photos.
#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<StoredObject>;
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
    async fn delete_many(&self, keys: &[String]) -> anyhow::Result<DeleteReport>;
}

pub(crate) fn describe_bytes(bytes: &[u8]) -> StoredObject {
    StoredObject { size: bytes.len() as i64, sha256: hex::encode(Sha256::digest(bytes)) }
}

#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    client: Client,
    bucket: String,
}

impl StorageService {
    pub(crate) async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if settings.s3().access_key.is_empty() || settings.s3().secret_key.is_empty() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "essay-grader-static",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds);
        if !settings.s3().endpoint.is_empty() {
            loader = loader.endpoint_url(settings.s3().endpoint.clone());
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config).force_path_style(true).build();
        let client = Client::from_conf(s3_config);

        Ok(Some(Self { client, bucket: settings.s3().bucket.clone() }))
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> anyhow::Result<StoredObject> {
        let stored = describe_bytes(&bytes);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("put object {key}"))?;

        Ok(stored)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("get object {key}"))?;

        let body = response.body.collect().await.with_context(|| format!("read object {key}"))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete_many(&self, keys: &[String]) -> anyhow::Result<DeleteReport> {
        let mut failed = Vec::new();

        for chunk in keys.chunks(DELETE_CHUNK_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .context("build delete identifiers")?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .context("build delete request")?;

            match self.client.delete_objects().bucket(&self.bucket).delete(delete).send().await {
                Ok(output) => {
                    for error in output.errors() {
                        failed.push(DeleteFailure {
                            key: error.key().unwrap_or_default().to_string(),
                            reason: error.message().unwrap_or("delete failed").to_string(),
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, keys = chunk.len(), "Batch delete failed");
                    failed.extend(chunk.iter().map(|key| DeleteFailure {
                        key: key.clone(),
                        reason: err.to_string(),
                    }));
                }
            }
        }

        Ok(DeleteReport::from_failures(failed))
    }
}
