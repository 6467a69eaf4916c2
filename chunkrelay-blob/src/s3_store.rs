use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult, BlockStore, CommitResult, ContentSettings, StagedBlock};

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services; `None` uses AWS defaults.
    pub endpoint_url: Option<String>,
    /// Static credentials; `None` falls back to the default provider chain.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Smallest part S3 accepts anywhere but last in a multipart upload.
const MIN_PART_BYTES: u64 = 5 * 1024 * 1024;

/// Small blocks are buffered into parts of at least this size.
const BUFFERED_PART_BYTES: u64 = 8 * 1024 * 1024;

const MAX_PARTS: usize = 10_000;

/// Where the bytes of one multipart part come from
#[derive(Debug, Clone, PartialEq, Eq)]
enum PartSource {
    /// Server-side copy of a single staged block
    Copy(String),
    /// Staged blocks read back and uploaded as one part
    Buffered(Vec<String>),
}

/// Lay out `(block, size)` pairs as multipart parts, in order.
///
/// A block is copied server-side when it is large enough to stand alone and
/// nothing is waiting in the buffer; everything else is grouped until the
/// group reaches [`BUFFERED_PART_BYTES`]. Only the last part may be smaller
/// than [`MIN_PART_BYTES`].
fn plan_parts(object_key: &str, blocks: &[(String, u64)]) -> BlobResult<Vec<PartSource>> {
    let mut parts = Vec::new();
    let mut pending = Vec::new();
    let mut pending_bytes = 0u64;

    for (name, size) in blocks {
        if pending.is_empty() && *size >= MIN_PART_BYTES {
            parts.push(PartSource::Copy(name.clone()));
            continue;
        }
        pending.push(name.clone());
        pending_bytes += size;
        if pending_bytes >= BUFFERED_PART_BYTES {
            parts.push(PartSource::Buffered(std::mem::take(&mut pending)));
            pending_bytes = 0;
        }
    }
    if !pending.is_empty() {
        parts.push(PartSource::Buffered(pending));
    }

    if parts.len() > MAX_PARTS {
        return Err(BlobError::invalid(format!(
            "{object_key} needs {} parts, more than the {MAX_PARTS} a multipart upload allows",
            parts.len()
        )));
    }
    Ok(parts)
}

/// `CopySource` is URL-encoded; block names may carry base64 padding.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", key.replace('=', "%3D"))
}

/// Block list written beside each committed object
#[derive(Debug, Serialize, Deserialize)]
struct BlockManifest {
    blocks: Vec<String>,
    content_type: String,
    content_encoding: String,
}

/// Block store on an S3-compatible bucket.
///
/// S3 has no uncommitted-block concept, so blocks are staged as objects under
/// `__blocks/<object>/<block>` and assembled on commit with a multipart
/// upload: blocks of at least 5 MiB are copied server-side, smaller ones are
/// buffered into bounded parts. A manifest of the committed names stays at
/// `__blocks/<object>/.manifest` so probes for already-committed chunks keep
/// answering `true`.
#[derive(Clone)]
pub struct S3BlockStore {
    client: Client,
    bucket: String,
}

impl S3BlockStore {
    pub async fn connect(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(key), Some(secret)) = (config.access_key_id, config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key, secret, None, None, "chunkrelay",
            ));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let aws_config = loader.load().await;
        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.endpoint_url.is_some())
                .build(),
        );

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    fn block_key(object_key: &str, block_name: &str) -> String {
        format!("__blocks/{object_key}/{block_name}")
    }

    fn manifest_key(object_key: &str) -> String {
        format!("__blocks/{object_key}/.manifest")
    }

    fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> BlobError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match err.raw_response().map(|r| r.status().as_u16()) {
            Some(401) | Some(403) => BlobError::unauthorized(err.to_string()),
            _ => BlobError::backend(err),
        }
    }

    async fn read_manifest(&self, object_key: &str) -> BlobResult<Option<BlockManifest>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::manifest_key(object_key))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(Self::map_sdk_error(err));
            }
        };

        let body = output.body.collect().await.map_err(BlobError::backend)?;
        Ok(Some(serde_json::from_slice(&body.into_bytes())?))
    }

    async fn read_block(&self, object_key: &str, block_name: &str) -> BlobResult<Bytes> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::block_key(object_key, block_name))
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output.body.collect().await.map_err(BlobError::backend)?;
                Ok(body.into_bytes())
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                Err(BlobError::block_not_found(block_name))
            }
            Err(err) => Err(Self::map_sdk_error(err)),
        }
    }

    /// Size of a staged block; a missing block fails the whole commit early.
    async fn block_size(&self, object_key: &str, block_name: &str) -> BlobResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::block_key(object_key, block_name))
            .send()
            .await;

        match head {
            Ok(output) => Ok(output.content_length().unwrap_or_default().max(0) as u64),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                Err(BlobError::block_not_found(block_name))
            }
            Err(err) => Err(Self::map_sdk_error(err)),
        }
    }

    async fn write_manifest(
        &self,
        object_key: &str,
        block_names: &[String],
        content: &ContentSettings,
    ) -> BlobResult<()> {
        let manifest = BlockManifest {
            blocks: block_names.to_vec(),
            content_type: content.content_type.clone(),
            content_encoding: content.content_encoding.clone(),
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::manifest_key(object_key))
            .content_type("application/json")
            .body(AwsByteStream::from(serde_json::to_vec(&manifest)?))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn upload_buffered(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> BlobResult<CompletedPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(output.e_tag)
            .build())
    }

    async fn upload_copied(
        &self,
        object_key: &str,
        upload_id: &str,
        part_number: i32,
        block_name: &str,
    ) -> BlobResult<CompletedPart> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(copy_source(&self.bucket, &Self::block_key(object_key, block_name)))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(output.copy_part_result.and_then(|r| r.e_tag))
            .build())
    }

    /// Upload the planned parts of `upload_id`, never holding more than one
    /// buffered part in memory.
    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        plan: &[PartSource],
    ) -> BlobResult<Vec<CompletedPart>> {
        let mut parts = Vec::with_capacity(plan.len());
        for (index, source) in plan.iter().enumerate() {
            let part_number = index as i32 + 1;
            let part = match source {
                PartSource::Copy(name) => {
                    self.upload_copied(object_key, upload_id, part_number, name)
                        .await?
                }
                PartSource::Buffered(names) => {
                    let mut data = BytesMut::new();
                    for name in names {
                        data.extend_from_slice(&self.read_block(object_key, name).await?);
                    }
                    self.upload_buffered(object_key, upload_id, part_number, data.freeze())
                        .await?
                }
            };
            parts.push(part);
        }
        Ok(parts)
    }

    async fn assemble(
        &self,
        object_key: &str,
        upload_id: &str,
        plan: &[PartSource],
        block_names: &[String],
        content: &ContentSettings,
    ) -> BlobResult<Option<String>> {
        let parts = self.upload_parts(object_key, upload_id, plan).await?;

        // The manifest goes first: once the object is visible the commit must not fail.
        self.write_manifest(object_key, block_names, content).await?;

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(completed.e_tag)
    }
}

#[async_trait]
impl BlockStore for S3BlockStore {
    async fn stage_block(
        &self,
        object_key: &str,
        block_name: &str,
        data: Bytes,
    ) -> BlobResult<StagedBlock> {
        let size_bytes = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::block_key(object_key, block_name))
            .content_type("application/octet-stream")
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;

        Ok(StagedBlock {
            name: block_name.to_string(),
            size_bytes,
        })
    }

    async fn block_exists(&self, object_key: &str, block_name: &str) -> BlobResult<bool> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(Self::block_key(object_key, block_name))
            .send()
            .await;

        match head {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                let manifest = self.read_manifest(object_key).await?;
                Ok(manifest.is_some_and(|m| m.blocks.iter().any(|b| b == block_name)))
            }
            Err(err) => Err(Self::map_sdk_error(err)),
        }
    }

    async fn object_exists(&self, object_key: &str) -> BlobResult<bool> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await;

        match head {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(Self::map_sdk_error(err)),
        }
    }

    async fn commit_blocks(
        &self,
        object_key: &str,
        block_names: &[String],
        content: &ContentSettings,
    ) -> BlobResult<CommitResult> {
        if block_names.is_empty() {
            return Err(BlobError::invalid("cannot commit an object without blocks"));
        }

        let mut blocks = Vec::with_capacity(block_names.len());
        for name in block_names {
            blocks.push((name.clone(), self.block_size(object_key, name).await?));
        }
        let size_bytes: u64 = blocks.iter().map(|(_, size)| size).sum();
        let plan = plan_parts(object_key, &blocks)?;

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(&content.content_type)
            .content_encoding(&content.content_encoding)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        let upload_id = created
            .upload_id
            .ok_or_else(|| BlobError::invalid("store returned no multipart upload id"))?;

        let etag = match self
            .assemble(object_key, &upload_id, &plan, block_names, content)
            .await
        {
            Ok(etag) => etag,
            Err(err) => {
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(object_key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = abort {
                    tracing::warn!(object_key, error = %abort, "failed to abort multipart upload");
                }
                return Err(err);
            }
        };

        // Staged copies are garbage once the object exists.
        if let Err(err) = self.discard_blocks(object_key, block_names).await {
            tracing::warn!(object_key, error = %err, "failed to remove staged blocks after commit");
        }

        Ok(CommitResult {
            object_key: object_key.to_string(),
            size_bytes,
            block_count: block_names.len() as u32,
            etag,
        })
    }

    async fn discard_blocks(&self, object_key: &str, block_names: &[String]) -> BlobResult<()> {
        for name in block_names {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(Self::block_key(object_key, name))
                .send()
                .await
                .map_err(Self::map_sdk_error)?;
        }
        Ok(())
    }

    async fn health(&self) -> BlobResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }
}
