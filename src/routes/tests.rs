use super::routes::app;
use crate::services::{
    image_service::ImageService, metadata_store::memory_store, object_store::LocalObjectStore,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "image-store-test-boundary";

async fn test_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let service = ImageService::new(
        memory_store().await,
        Arc::new(LocalObjectStore::new(dir.path())),
        "test-images-bucket",
    );
    (app(service, 1024 * 1024), dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, headers, body) = send(app, request).await;
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(payload: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/images")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn post_multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/images")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn image_json(user: &str, file_name: &str, content_type: &str, bytes: &[u8], tags: Value) -> Value {
    json!({
        "user_id": user,
        "file_name": file_name,
        "content_type": content_type,
        "image_base64": STANDARD.encode(bytes),
        "tags": tags,
    })
}

async fn upload(app: &Router, payload: Value) -> String {
    let (status, body) = send_json(app, post_json(payload)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["image_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _dir) = test_app().await;
    let (status, body) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn readiness_checks_both_stores() {
    let (app, _dir) = test_app().await;
    let (status, body) = send_json(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["object_store"]["ok"], true);
}

#[tokio::test]
async fn json_upload_then_metadata_hides_storage_location() {
    let (app, _dir) = test_app().await;
    let mut payload = image_json(
        "user-1",
        "photo.jpg",
        "image/jpeg",
        b"image-bytes",
        json!(["summer", "trip"]),
    );
    payload["description"] = json!("Beach day");
    let image_id = upload(&app, payload).await;

    let (status, meta) = send_json(&app, get(&format!("/images/{image_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["tags"], json!(["summer", "trip"]));
    assert_eq!(meta["user_id"], "user-1");
    assert_eq!(meta["size_bytes"], 11);
    assert_eq!(meta["description"], "Beach day");
    assert!(meta.get("blob_bucket").is_none());
    assert!(meta.get("blob_key").is_none());
}

#[tokio::test]
async fn json_upload_missing_fields_is_bad_request() {
    let (app, _dir) = test_app().await;
    let (status, body) = send_json(&app, post_json(json!({"user_id": "user-1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file_name is required");

    let mut bad = image_json("user-1", "a.png", "image/png", b"x", json!([]));
    bad["image_base64"] = json!("***");
    let (status, _) = send_json(&app, post_json(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn multipart_and_json_uploads_store_the_same_bytes() {
    let (app, _dir) = test_app().await;
    let bytes: &[u8] = b"\x89PNG\r\n\x1a\nfile-bytes";

    let json_id = upload(
        &app,
        image_json("user-2", "avatar.png", "image/png", bytes, json!("a,b")),
    )
    .await;

    let (status, body) = send_json(
        &app,
        post_multipart(
            &[("user_id", "user-2"), ("tags", "a,b"), ("description", "desc")],
            Some(("avatar.png", "image/png", bytes)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let multipart_id = body["image_id"].as_str().unwrap().to_string();

    let mut downloads = Vec::new();
    for id in [&json_id, &multipart_id] {
        let (_, meta) = send_json(&app, get(&format!("/images/{id}"))).await;
        assert_eq!(meta["size_bytes"], bytes.len());
        assert_eq!(meta["content_type"], "image/png");
        assert_eq!(meta["tags"], json!(["a", "b"]));

        let (status, _, body) = send(&app, get(&format!("/images/{id}/download"))).await;
        assert_eq!(status, StatusCode::OK);
        downloads.push(STANDARD.decode(body).unwrap());
    }
    assert_eq!(downloads[0], bytes);
    assert_eq!(downloads[0], downloads[1]);
}

#[tokio::test]
async fn multipart_without_file_or_user_is_bad_request() {
    let (app, _dir) = test_app().await;
    let (status, body) = send_json(&app, post_multipart(&[("user_id", "user-2")], None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file field is required");

    let (status, body) = send_json(
        &app,
        post_multipart(&[], Some(("a.png", "image/png", &b"x"[..]))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "user_id is required");
}

#[tokio::test]
async fn download_sets_attachment_headers() {
    let (app, _dir) = test_app().await;
    let image_id = upload(
        &app,
        image_json("user-4", "doc.png", "image/png", b"download", json!([])),
    )
    .await;

    let (status, headers, body) = send(&app, get(&format!("/images/{image_id}/download"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"doc.png\""
    );
    assert_eq!(headers["content-transfer-encoding"], "base64");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(body, STANDARD.encode(b"download").into_bytes());
}

#[tokio::test]
async fn list_filters_by_time_and_tag() {
    let (app, _dir) = test_app().await;
    upload(
        &app,
        image_json("user-3", "one.jpg", "image/jpeg", b"one", json!(["travel"])),
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let cutoff = chrono::Utc::now().to_rfc3339();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    upload(
        &app,
        image_json("user-3", "two.jpg", "image/png", b"two", json!(["work"])),
    )
    .await;
    upload(
        &app,
        image_json("user-3", "three.jpg", "image/png", b"three", json!(["travel"])),
    )
    .await;

    let uri = format!(
        "/images?user_id=user-3&created_from={}&tag=work",
        cutoff.replace('+', "%2B")
    );
    let (status, body) = send_json(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["content_type"], "image/png");
    assert_eq!(items[0]["file_name"], "two.jpg");
    assert!(body["next_token"].is_null());

    let (_, body) = send_json(&app, get("/images?user_id=user-3&content_type=image/png")).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let (_, body) = send_json(&app, get("/images?user_id=user-3&tag=trav")).await;
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn list_pages_with_next_token() {
    let (app, _dir) = test_app().await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            upload(
                &app,
                image_json("user-6", &format!("{i}.png"), "image/png", b"px", json!([])),
            )
            .await,
        );
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let mut seen = Vec::new();
    let mut uri = "/images?user_id=user-6&limit=2".to_string();
    loop {
        let (status, body) = send_json(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert!(items.len() <= 2);
        seen.extend(items.iter().map(|i| i["image_id"].as_str().unwrap().to_string()));
        match body["next_token"].as_str() {
            Some(token) => uri = format!("/images?user_id=user-6&limit=2&next_token={token}"),
            None => break,
        }
    }

    ids.reverse();
    assert_eq!(seen, ids);
}

#[tokio::test]
async fn list_rejects_bad_parameters() {
    let (app, _dir) = test_app().await;
    for uri in [
        "/images",
        "/images?user_id=",
        "/images?user_id=user-1&limit=ten",
        "/images?user_id=user-1&next_token=corrupt!!",
        "/images?user_id=user-1&created_to=soon",
    ] {
        let (status, body) = send_json(&app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}: {body}");
    }
}

#[tokio::test]
async fn delete_then_fetch_is_not_found() {
    let (app, _dir) = test_app().await;
    let image_id = upload(
        &app,
        image_json("user-5", "del.png", "image/png", b"delete", json!([])),
    )
    .await;

    let (status, body) = send_json(&app, delete(&format!("/images/{image_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Image deleted"}));

    let (status, _) = send_json(&app, get(&format!("/images/{image_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&app, get(&format!("/images/{image_id}/download"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&app, delete(&format!("/images/{image_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overlong_file_name_is_stored_and_kept_in_metadata() {
    let (app, _dir) = test_app().await;
    let file_name = format!("{}.png", "a".repeat(300));
    let image_id = upload(
        &app,
        image_json("user-7", &file_name, "image/png", b"long", json!([])),
    )
    .await;

    let (status, meta) = send_json(&app, get(&format!("/images/{image_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["file_name"], file_name);

    let (status, _, body) = send(&app, get(&format!("/images/{image_id}/download"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(STANDARD.decode(body).unwrap(), b"long");
}

#[tokio::test]
async fn missing_user_is_reported_before_bad_base64() {
    let (app, _dir) = test_app().await;
    let (status, body) = send_json(&app, post_json(json!({"image_base64": "***"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "user_id is required");
}

#[tokio::test]
async fn date_only_bounds_are_accepted() {
    let (app, _dir) = test_app().await;
    upload(
        &app,
        image_json("user-8", "a.png", "image/png", b"a", json!([])),
    )
    .await;

    let (status, body) =
        send_json(&app, get("/images?user_id=user-8&created_from=2024-01-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) =
        send_json(&app, get("/images?user_id=user-8&created_to=2024-01-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn non_string_tags_are_stringified() {
    let (app, _dir) = test_app().await;
    let image_id = upload(
        &app,
        image_json("user-9", "a.png", "image/png", b"a", json!(["a", 1, true])),
    )
    .await;

    let (_, meta) = send_json(&app, get(&format!("/images/{image_id}"))).await;
    assert_eq!(meta["tags"], json!(["a", "1", "true"]));
}
