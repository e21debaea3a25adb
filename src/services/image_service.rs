//! src/services/image_service.rs
//!
//! ImageService — upload, list, fetch and delete orchestration. Each
//! operation writes through to the object store and the metadata store in
//! turn; nothing spans the two, so a failure between steps can leave an
//! orphaned payload behind.

use crate::{
    models::image::{
        ImageMetadata, ImageRecord, TagsInput, blob_key, format_timestamp, normalize_timestamp,
    },
    services::{
        metadata_store::{MetadataStore, StoreError},
        object_store::{ObjectStore, ObjectStoreError},
        pagination::{TokenError, decode_token, encode_token},
        query::{ImageQuery, QueryPlan},
    },
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("{0}")]
    Validation(String),
    #[error("image `{0}` not found")]
    NotFound(String),
    #[error("invalid next_token: {0}")]
    MalformedToken(#[from] TokenError),
    #[error("object storage failed: {0}")]
    UpstreamStorage(#[from] ObjectStoreError),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

pub type ImageResult<T> = Result<T, ImageError>;

/// An upload as received from either request shape. Mandatory fields stay
/// optional here so that validation happens in one place.
#[derive(Debug, Default)]
pub struct ImageUpload {
    pub owner_id: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub payload: Option<ImagePayload>,
    pub tags: Option<TagsInput>,
    pub description: Option<String>,
}

/// Image bytes as received: raw from a form part, or base64 text from JSON.
/// Base64 is decoded only once the mandatory fields are known to be present.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    Raw(Bytes),
    Base64(String),
}

impl ImagePayload {
    fn into_bytes(self) -> ImageResult<Bytes> {
        match self {
            ImagePayload::Raw(bytes) => Ok(bytes),
            ImagePayload::Base64(data) => decode_base64_image(&data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub image_id: String,
    pub created_at: String,
}

/// Listing request with raw, unvalidated bounds and token.
#[derive(Debug, Default, Clone)]
pub struct ListImagesParams {
    pub owner_id: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub tag: Option<String>,
    pub content_type: Option<String>,
    pub limit: Option<usize>,
    pub next_token: Option<String>,
}

#[derive(Debug)]
pub struct ImageListing {
    pub items: Vec<ImageMetadata>,
    pub next_token: Option<String>,
}

#[derive(Debug)]
pub struct ImageDownload {
    pub file_name: String,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct ImageService {
    records: MetadataStore,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ImageService {
    pub fn new(
        records: MetadataStore,
        objects: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            records,
            objects,
            bucket: bucket.into(),
        }
    }

    pub fn records(&self) -> &MetadataStore {
        &self.records
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    /// Store a new image: payload first, then its metadata record.
    #[instrument(skip_all, fields(owner_id = upload.owner_id.as_deref().unwrap_or_default()))]
    pub async fn upload(&self, upload: ImageUpload) -> ImageResult<UploadReceipt> {
        let owner_id = required(upload.owner_id, "user_id")?;
        let file_name = required(upload.file_name, "file_name")?;
        let content_type = required(upload.content_type, "content_type")?;
        let payload = upload
            .payload
            .ok_or_else(|| ImageError::Validation("image payload is required".into()))?
            .into_bytes()?;

        let image_id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());
        let key = blob_key(&owner_id, &image_id, &file_name);

        self.objects
            .put(&self.bucket, &key, payload.clone(), &content_type)
            .await
            .inspect_err(|err| error!(%image_id, "payload write failed: {err}"))?;

        let record = ImageRecord {
            owner_id,
            created_at: created_at.clone(),
            image_id: image_id.clone(),
            file_name,
            content_type,
            size_bytes: payload.len() as i64,
            tags: upload.tags.map(TagsInput::normalize).unwrap_or_default(),
            description: upload.description.unwrap_or_default(),
            blob_bucket: self.bucket.clone(),
            blob_key: key,
        };
        self.records
            .put(&record)
            .await
            .inspect_err(|err| {
                error!(%image_id, "metadata write failed, payload orphaned: {err}")
            })?;

        info!(%image_id, %created_at, size_bytes = record.size_bytes, "image stored");
        Ok(UploadReceipt {
            image_id,
            created_at,
        })
    }

    /// One page of an owner's images, newest first.
    pub async fn list(&self, params: ListImagesParams) -> ImageResult<ImageListing> {
        let owner_id = required(params.owner_id, "user_id")?;
        let created_from = params
            .created_from
            .map(|raw| bound(&raw, "created_from"))
            .transpose()?;
        let created_to = params
            .created_to
            .map(|raw| bound(&raw, "created_to"))
            .transpose()?;
        let exclusive_start = decode_token(params.next_token.as_deref())?;

        let plan = QueryPlan::new(ImageQuery {
            owner_id,
            created_from,
            created_to,
            tag: params.tag,
            content_type: params.content_type,
            limit: params
                .limit
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .clamp(1, MAX_PAGE_LIMIT),
            exclusive_start,
        })?;

        let page = self.records.query(&plan).await?;
        Ok(ImageListing {
            next_token: encode_token(page.last_evaluated_key.as_ref()),
            items: page.records.into_iter().map(ImageMetadata::from).collect(),
        })
    }

    pub async fn get_metadata(&self, image_id: &str) -> ImageResult<ImageMetadata> {
        self.resolve(image_id).await.map(ImageMetadata::from)
    }

    pub async fn download(&self, image_id: &str) -> ImageResult<ImageDownload> {
        let record = self.resolve(image_id).await?;
        let body = self
            .objects
            .get(&record.blob_bucket, &record.blob_key)
            .await
            .map_err(|err| match err {
                ObjectStoreError::NotFound { .. } => ImageError::NotFound(image_id.to_string()),
                other => ImageError::UpstreamStorage(other),
            })?;

        Ok(ImageDownload {
            file_name: record.file_name,
            content_type: record.content_type,
            body,
        })
    }

    /// Remove payload then record. A payload delete failure is logged and
    /// does not stop the record delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, image_id: &str) -> ImageResult<()> {
        let record = self.resolve(image_id).await?;

        if let Err(err) = self
            .objects
            .delete(&record.blob_bucket, &record.blob_key)
            .await
        {
            warn!(
                bucket = %record.blob_bucket,
                key = %record.blob_key,
                "payload delete failed, removing metadata anyway: {err}"
            );
        }

        self.records.delete_by_key(&record.key()).await?;
        info!("image deleted");
        Ok(())
    }

    async fn resolve(&self, image_id: &str) -> ImageResult<ImageRecord> {
        self.records
            .get_by_image_id(image_id)
            .await?
            .ok_or_else(|| ImageError::NotFound(image_id.to_string()))
    }
}

fn required(value: Option<String>, field: &str) -> ImageResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ImageError::Validation(format!("{field} is required")))
}

/// Decode base64 image data, tolerating a `data:<mime>;base64,` prefix.
fn decode_base64_image(data: &str) -> ImageResult<Bytes> {
    let encoded = match data.split_once("base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map(Bytes::from)
        .map_err(|_| ImageError::Validation("Invalid base64 image data".into()))
}

fn bound(raw: &str, field: &str) -> ImageResult<String> {
    normalize_timestamp(raw)
        .ok_or_else(|| ImageError::Validation(format!("{field} must be an RFC 3339 timestamp")))
}
