//! HTTP handlers for image upload, listing, metadata, download and delete.
//! Request shapes are parsed here; every storage decision is delegated to
//! `ImageService`.

use crate::{
    errors::AppError,
    models::image::{ImageMetadata, TagsInput},
    services::image_service::{ImagePayload, ImageService, ImageUpload, ListImagesParams},
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Path, Query, Request, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// JSON body for `POST /images`.
#[derive(Debug, Default, Deserialize)]
pub struct UploadJsonRequest {
    pub user_id: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub image_base64: Option<String>,
    pub tags: Option<TagsInput>,
    pub description: Option<String>,
}

/// Query params accepted by `GET /images`.
#[derive(Debug, Deserialize)]
pub struct ListImagesQuery {
    pub user_id: Option<String>,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub tag: Option<String>,
    pub content_type: Option<String>,
    pub limit: Option<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub image_id: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub items: Vec<ImageMetadata>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// `POST /images` — JSON with base64 payload, or multipart form data.
pub async fn upload_image(
    State(service): State<ImageService>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let upload = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &service)
            .await
            .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
        read_multipart_upload(multipart).await?
    } else {
        let body = Bytes::from_request(request, &service)
            .await
            .map_err(|rej| AppError::new(rej.status(), rej.body_text()))?;
        read_json_upload(&body)?
    };

    let receipt = service.upload(upload).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            image_id: receipt.image_id,
            created_at: receipt.created_at,
        }),
    ))
}

/// `GET /images` — one page of an owner's images.
pub async fn list_images(
    State(service): State<ImageService>,
    query: Result<Query<ListImagesQuery>, QueryRejection>,
) -> Result<Json<ImageListResponse>, AppError> {
    let Query(q) = query.map_err(|rej| AppError::bad_request(rej.body_text()))?;

    let limit = match non_empty(q.limit) {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| AppError::bad_request("limit must be a non-negative integer"))?,
        ),
        None => None,
    };

    let listing = service
        .list(ListImagesParams {
            owner_id: non_empty(q.user_id),
            created_from: non_empty(q.created_from),
            created_to: non_empty(q.created_to),
            tag: non_empty(q.tag),
            content_type: non_empty(q.content_type),
            limit,
            next_token: non_empty(q.next_token),
        })
        .await?;

    Ok(Json(ImageListResponse {
        items: listing.items,
        next_token: listing.next_token,
    }))
}

/// `GET /images/{image_id}` — metadata without storage location.
pub async fn get_image(
    State(service): State<ImageService>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageMetadata>, AppError> {
    Ok(Json(service.get_metadata(&image_id).await?))
}

/// `GET /images/{image_id}/download` — base64 body with the stored content type.
pub async fn download_image(
    State(service): State<ImageService>,
    Path(image_id): Path<String>,
) -> Result<Response, AppError> {
    let download = service.download(&image_id).await?;
    let encoded = general_purpose::STANDARD.encode(&download.body);

    let mut response = Response::new(Body::from(encoded));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&download.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_FILE_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&download.file_name));
    headers.insert(
        HeaderName::from_static("content-transfer-encoding"),
        HeaderValue::from_static("base64"),
    );

    Ok(response)
}

/// `DELETE /images/{image_id}`
pub async fn delete_image(
    State(service): State<ImageService>,
    Path(image_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    service.delete(&image_id).await?;
    Ok(Json(MessageResponse {
        message: "Image deleted",
    }))
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

fn read_json_upload(body: &[u8]) -> Result<ImageUpload, AppError> {
    let request: UploadJsonRequest = if body.iter().all(u8::is_ascii_whitespace) {
        UploadJsonRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|err| AppError::bad_request(format!("invalid JSON body: {}", err)))?
    };

    Ok(ImageUpload {
        owner_id: request.user_id,
        file_name: request.file_name,
        content_type: request.content_type,
        payload: non_empty(request.image_base64).map(ImagePayload::Base64),
        tags: request.tags,
        description: request.description,
    })
}

async fn read_multipart_upload(mut multipart: Multipart) -> Result<ImageUpload, AppError> {
    let mut upload = ImageUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if let Some(file_name) = file_name {
            if name != "file" {
                continue;
            }
            let content_type = field
                .content_type()
                .unwrap_or(DEFAULT_FILE_CONTENT_TYPE)
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::new(err.status(), err.body_text()))?;
            upload.file_name = Some(file_name);
            upload.content_type = Some(content_type);
            upload.payload = Some(ImagePayload::Raw(bytes));
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;
        match name.as_str() {
            "user_id" => upload.owner_id = Some(text),
            "tags" => upload.tags = Some(TagsInput::Csv(text)),
            "description" => upload.description = Some(text),
            _ => {}
        }
    }

    if upload.payload.is_none() {
        return Err(AppError::bad_request("file field is required"));
    }
    Ok(upload)
}

fn content_disposition(file_name: &str) -> HeaderValue {
    let escaped = file_name.replace('\\', "\\\\").replace('"', "\\\"");
    HeaderValue::from_bytes(format!("attachment; filename=\"{}\"", escaped).as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"image\""))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
