//! HTTP surface tests against the stand-in models

#![cfg(feature = "server")]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use edgeconnect_web::{
    server::{build_router, AppState},
    BackendType, ImageCodec, InpaintProcessor, ResizePolicy, ServiceConfig,
};
use http_body_util::BodyExt;
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "edgeconnect-test-boundary";

fn test_config() -> ServiceConfig {
    ServiceConfig::builder()
        .backend(BackendType::Mock)
        .resize_policy(ResizePolicy::MultipleOf { multiple: 8 })
        .build()
        .unwrap()
}

fn app_with(config: ServiceConfig, initialize: bool) -> (Router, Arc<InpaintProcessor>) {
    let processor = Arc::new(InpaintProcessor::from_config(config.clone()).unwrap());
    if initialize {
        processor.initialize().unwrap();
    }
    let router = build_router(AppState::new(Arc::clone(&processor)), &config);
    (router, processor)
}

fn app() -> Router {
    app_with(test_config(), true).0
}

fn photo() -> RgbImage {
    RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 7) as u8, (y * 9) as u8, 200]))
}

fn mask_data_url(masked: impl Fn(u32, u32) -> bool) -> String {
    let mask = GrayImage::from_fn(32, 24, |x, y| Luma([if masked(x, y) { 255 } else { 0 }]));
    ImageCodec::png_data_url(&image::DynamicImage::ImageLuma8(mask).to_rgb8()).unwrap()
}

/// Hand-built multipart body: `(name, Some(filename), bytes)` for files, `None` for text
fn multipart_body(parts: &[(&str, Option<&str>, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn inpaint_request(parts: &[(&str, Option<&str>, Vec<u8>)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/inpaint")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_inpaint_success_returns_png_data_url() {
    let image = ImageCodec::encode_png(&photo()).unwrap();
    let mask = mask_data_url(|x, y| (8..16).contains(&x) && (8..16).contains(&y));

    let (status, json) = send(
        app(),
        inpaint_request(&[
            ("image", Some("photo.png"), image),
            ("mask", None, mask.into_bytes()),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let data_url = json["image"].as_str().unwrap();
    assert!(data_url.starts_with("data:image/png;base64,"));

    let result = ImageCodec::load_data_url_image(data_url).unwrap().to_rgb8();
    assert_eq!(result.dimensions(), (32, 24));
    assert_eq!(result.get_pixel(0, 0), photo().get_pixel(0, 0));
    assert_eq!(result.get_pixel(31, 23), photo().get_pixel(31, 23));
}

#[tokio::test]
async fn test_empty_mask_returns_input_unchanged() {
    let image = ImageCodec::encode_png(&photo()).unwrap();
    let (status, json) = send(
        app(),
        inpaint_request(&[
            ("image", Some("photo.png"), image),
            ("mask", None, mask_data_url(|_, _| false).into_bytes()),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let result = ImageCodec::load_data_url_image(json["image"].as_str().unwrap())
        .unwrap()
        .to_rgb8();
    assert_eq!(result, photo());
}

#[tokio::test]
async fn test_missing_image_is_reported() {
    let (status, json) = send(
        app(),
        inpaint_request(&[("mask", None, mask_data_url(|_, _| true).into_bytes())]),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("image"));
}

#[tokio::test]
async fn test_missing_mask_is_reported() {
    let image = ImageCodec::encode_png(&photo()).unwrap();
    let (status, json) = send(app(), inpaint_request(&[("image", Some("photo.png"), image)])).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("mask"));
}

#[tokio::test]
async fn test_undecodable_mask_is_reported() {
    let image = ImageCodec::encode_png(&photo()).unwrap();
    let (status, json) = send(
        app(),
        inpaint_request(&[
            ("image", Some("photo.png"), image),
            ("mask", None, b"data:image/png;base64,!!!".to_vec()),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_non_multipart_request_is_reported() {
    let request = Request::builder()
        .method("POST")
        .uri("/inpaint")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, json) = send(app(), request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_uninitialized_models_are_reported() {
    let (router, _processor) = app_with(test_config(), false);
    let image = ImageCodec::encode_png(&photo()).unwrap();
    let (status, json) = send(
        router,
        inpaint_request(&[
            ("image", Some("photo.png"), image),
            ("mask", None, mask_data_url(|_, _| true).into_bytes()),
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("not initialized"));
}

#[tokio::test]
async fn test_health_reports_model_state() {
    let (router, processor) = app_with(test_config(), true);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(router.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["initialized"], true);
    assert_eq!(json["backend"], "mock");
    assert_eq!(json["models"].as_array().unwrap().len(), 2);

    processor.shutdown();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (_, json) = send(router, request).await;
    assert_eq!(json["initialized"], false);
}

#[tokio::test]
async fn test_index_page_is_served() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("drawingCanvas"));
    assert!(html.contains("/inpaint"));
}

#[tokio::test]
async fn test_static_dir_overrides_index_and_serves_assets() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<p>custom page</p>").unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log('hi');").unwrap();

    let config = ServiceConfig::builder()
        .backend(BackendType::Mock)
        .static_dir(Some(dir.path()))
        .build()
        .unwrap();
    let (router, _processor) = app_with(config, true);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"<p>custom page</p>");

    let response = router
        .oneshot(Request::builder().uri("/static/app.js").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
