//! Object store access
//!
//! Wraps the S3 client for everything the pipeline does against the object
//! store: bucket-name validation, idempotent bucket creation, downloading
//! staged objects, and streaming a remote file straight into a bucket.
//!
//! Staging never buffers a whole file: the download body is consumed in
//! `part_size` slices and shipped as a multipart upload, so memory stays
//! bounded no matter how large the monthly file is. Bodies that fit in a
//! single part go up as one `PutObject` instead.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, instrument, warn};
use tripdata_common::EtlError;

use crate::config::StorageConfig;

/// Default multipart part size: 50 MiB
pub const DEFAULT_PART_SIZE: usize = 50 * 1024 * 1024;

/// Outcome of one staging attempt.
///
/// Staging failures are contained by design: one unreachable monthly file
/// must not abort the remaining eleven, so transport and upload errors
/// degrade to [`StageStatus::Failed`] instead of propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Download and upload both completed; the object is in the bucket
    Staged,
    /// Download or upload failed; no partial object remains
    Failed,
}

impl StageStatus {
    pub fn is_staged(self) -> bool {
        matches!(self, StageStatus::Staged)
    }
}

/// Check a bucket name against S3 naming rules.
///
/// Rules: 3-63 characters; lowercase alphanumeric plus `.` and `-`; must
/// start and end alphanumeric; no underscores; must not look like a
/// dotted-quad IP address; must not start with `xn--` or end with
/// `-s3alias`. Pure function, no I/O.
pub fn is_valid_bucket_name(name: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    static IP_RE: OnceLock<Regex> = OnceLock::new();
    let name_re =
        NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$").expect("static regex"));
    let ip_re = IP_RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("static regex"));

    if name.len() < 3 || name.len() > 63 {
        return false;
    }
    if !name_re.is_match(name) {
        return false;
    }
    if ip_re.is_match(name) {
        return false;
    }
    if name.starts_with("xn--") || name.ends_with("-s3alias") {
        return false;
    }
    true
}

/// S3-compatible object store client
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
}

impl ObjectStore {
    /// Build a client for the configured endpoint.
    ///
    /// MinIO-style deployments need path-style addressing, so it is always
    /// on; the region is a placeholder the endpoint ignores.
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "tripdata-etl",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .endpoint_url(config.endpoint_url())
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
        }
    }

    /// Check whether a bucket exists
    pub async fn bucket_exists(&self, bucket: &str) -> Result<bool, EtlError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()) == Some(true) {
                    Ok(false)
                } else {
                    Err(EtlError::Storage(format!(
                        "Failed to check bucket '{}': {}",
                        bucket, e
                    )))
                }
            }
        }
    }

    /// Ensure a bucket exists, creating it if necessary.
    ///
    /// Rejects invalid names locally before any backend call. Creation is
    /// idempotent: an already-existing bucket is success. A backend refusal
    /// propagates as [`EtlError::BucketCreation`] and aborts the run, since
    /// nothing downstream can work without the bucket.
    #[instrument(skip(self))]
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<bool, EtlError> {
        if !is_valid_bucket_name(bucket) {
            return Err(EtlError::InvalidBucketName(bucket.to_string()));
        }

        if self.bucket_exists(bucket).await? {
            info!("Bucket {} already exists", bucket);
            return Ok(true);
        }

        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| EtlError::BucketCreation {
                bucket: bucket.to_string(),
                message: e.to_string(),
            })?;

        info!("Bucket {} created", bucket);
        Ok(true)
    }

    /// Download a staged object into memory
    #[instrument(skip(self))]
    pub async fn download(&self, bucket: &str, key: &str) -> Result<Bytes> {
        debug!("Downloading s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{}/{}", bucket, key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?
            .into_bytes();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }

    /// Stream a remote file into the bucket under `key`.
    ///
    /// An absent bucket is logged but does not fail the attempt; the upload
    /// itself will surface the problem. Transport failures, non-success
    /// statuses, and upload errors all degrade to [`StageStatus::Failed`]
    /// with a best-effort abort of any multipart upload in flight.
    #[instrument(skip(self, http), fields(bucket = %bucket, key = %key))]
    pub async fn stage_from_url(
        &self,
        http: &reqwest::Client,
        bucket: &str,
        key: &str,
        url: &str,
        part_size: usize,
    ) -> StageStatus {
        if part_size == 0 {
            warn!("Part size must be at least one byte, not staging {}", url);
            return StageStatus::Failed;
        }

        match self.bucket_exists(bucket).await {
            Ok(true) => {}
            Ok(false) => warn!("Bucket {} does not exist, staging will likely fail", bucket),
            Err(e) => warn!("Could not check bucket {}: {}", bucket, e),
        }

        let response = match http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                return StageStatus::Failed;
            }
        };

        if !response.status().is_success() {
            warn!("Download of {} returned status {}", url, response.status());
            return StageStatus::Failed;
        }

        // None means the source did not advertise a length; chunking below
        // proceeds identically either way.
        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        debug!(
            "Streaming {} into s3://{}/{} (content length: {:?}, content type: {})",
            url, bucket, key, content_length, content_type
        );

        let mut upload: Option<MultipartState> = None;
        let result = self
            .upload_stream(&mut upload, bucket, key, response, &content_type, part_size)
            .await;

        match result {
            Ok(total) => {
                info!("Staged {} bytes to s3://{}/{}", total, bucket, key);
                StageStatus::Staged
            }
            Err(e) => {
                warn!("Staging s3://{}/{} failed: {:#}", bucket, key, e);
                if let Some(state) = upload {
                    self.abort_upload(bucket, key, &state.upload_id).await;
                }
                StageStatus::Failed
            }
        }
    }

    /// Consume the download body, flushing full parts as they accumulate.
    async fn upload_stream(
        &self,
        upload: &mut Option<MultipartState>,
        bucket: &str,
        key: &str,
        response: reqwest::Response,
        content_type: &str,
        part_size: usize,
    ) -> Result<u64> {
        let mut stream = response.bytes_stream();
        let mut buf = BytesMut::with_capacity(part_size.min(8 * 1024 * 1024));
        let mut total: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Transport error while reading download body")?;
            total += chunk.len() as u64;
            buf.extend_from_slice(&chunk);

            while buf.len() >= part_size {
                let body = buf.split_to(part_size).freeze();
                self.upload_next_part(upload, bucket, key, content_type, body)
                    .await?;
            }
        }

        if upload.is_none() {
            // Whole body fit in a single part
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .content_length(buf.len() as i64)
                .body(ByteStream::from(buf.freeze()))
                .send()
                .await
                .with_context(|| format!("Failed to upload s3://{}/{}", bucket, key))?;
        } else {
            if !buf.is_empty() {
                let body = buf.split().freeze();
                self.upload_next_part(upload, bucket, key, content_type, body)
                    .await?;
            }
            let state = upload
                .take()
                .context("Multipart upload state missing at completion")?;
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(state.parts))
                .build();
            self.client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&state.upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .context("Failed to complete multipart upload")?;
        }

        Ok(total)
    }

    /// Upload one full part, initiating the multipart upload on first use
    async fn upload_next_part(
        &self,
        upload: &mut Option<MultipartState>,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<()> {
        if upload.is_none() {
            let created = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .send()
                .await
                .context("Failed to initiate multipart upload")?;
            let upload_id = created
                .upload_id()
                .context("Object store returned no upload id")?
                .to_string();
            debug!("Initiated multipart upload {} for s3://{}/{}", upload_id, bucket, key);
            *upload = Some(MultipartState {
                upload_id,
                parts: Vec::new(),
                next_part: 1,
            });
        }

        let state = upload.as_mut().context("Multipart upload state missing")?;
        let part_number = state.next_part;
        let size = body.len();

        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(&state.upload_id)
            .part_number(part_number)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload part {}", part_number))?;

        debug!("Uploaded part {} ({} bytes) to s3://{}/{}", part_number, size, bucket, key);

        state.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(response.e_tag().map(str::to_string))
                .build(),
        );
        state.next_part += 1;
        Ok(())
    }

    /// Best-effort cleanup so a failed staging leaves no partial object
    async fn abort_upload(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!("Failed to abort multipart upload {}: {}", upload_id, e);
        }
    }
}

struct MultipartState {
    upload_id: String,
    parts: Vec<CompletedPart>,
    next_part: i32,
}
