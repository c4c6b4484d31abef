use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{error::InternalError, web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::compress::{compress_image, decode_image_payload, strip_data_url, to_data_url, CompressionConfig};
use crate::decoder::{decode_all, DecodePolicy};
use crate::detector::Detector;
use crate::error::ApiError;
use crate::models::{
    AnalyzeQuery, AnalyzeRequest, AnalyzeResponse, CompressResponse, DetectionPayload,
    DetectorResponse, ErrorBody, Prediction,
};
use crate::overlay::Overlay;
use crate::summary::{average_confidence, generate_summary, overall_severity};

/// Everything a request needs, built once at startup.
pub struct AppState {
    /// `None` when the detector credentials are not configured.
    pub detector: Option<Arc<dyn Detector>>,
    pub policy: DecodePolicy,
    pub compression: CompressionConfig,
    pub overlay: Overlay,
    pub max_body_bytes: usize,
}

pub fn app_config(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let json_config = web::JsonConfig::default()
            .limit(state.max_body_bytes)
            .error_handler(|err, _req| {
                let body = ErrorBody {
                    error: "Invalid request body".to_string(),
                    details: Some(err.to_string()),
                };
                InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
            });

        cfg.app_data(state)
            .app_data(json_config)
            .service(web::resource("/analyze").route(web::post().to(analyze)))
            .service(web::resource("/compress").route(web::post().to(compress)))
            .service(web::resource("/health").route(web::get().to(health)));
    }
}

#[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn analyze(
    state: web::Data<AppState>,
    query: web::Query<AnalyzeQuery>,
    body: web::Json<AnalyzeRequest>,
) -> Result<HttpResponse, ApiError> {
    let Some(detector) = state.detector.clone() else {
        error!("detector credentials are not configured");
        return Err(ApiError::MissingConfiguration);
    };

    let request = body.into_inner();
    let response = detector
        .detect(strip_data_url(&request.image))
        .await
        .map_err(|e| {
            error!("detector call failed: {}", e);
            ApiError::Upstream(e)
        })?;

    let payload = match response {
        DetectorResponse::Detections(payload) => payload,
        DetectorResponse::Unrecognized(raw) => {
            warn!("detector returned an unrecognized payload, passing it through");
            return Ok(HttpResponse::Ok().json(raw));
        }
    };

    let findings = decode_all(&payload.predictions, &state.policy);
    info!(received = payload.predictions.len(), "predictions decoded");

    if payload.predictions.is_empty() {
        return Ok(HttpResponse::Ok().json(plain_response(payload)));
    }

    let annotated_image = if query.annotate {
        let drawable = payload
            .predictions
            .iter()
            .filter(|p| state.policy.drawable(p))
            .cloned()
            .collect();
        annotate(&state, request.image, drawable).await
    } else {
        None
    };

    let response = AnalyzeResponse {
        ai_summary: Some(generate_summary(&findings)),
        overall_severity: Some(overall_severity(&findings, &payload.predictions)),
        average_confidence: Some(average_confidence(&payload.predictions)),
        structured_findings: Some(findings),
        annotated_image,
        detection: payload,
    };
    Ok(HttpResponse::Ok().json(response))
}

fn plain_response(detection: DetectionPayload) -> AnalyzeResponse {
    AnalyzeResponse {
        detection,
        structured_findings: None,
        ai_summary: None,
        overall_severity: None,
        average_confidence: None,
        annotated_image: None,
    }
}

// Best effort: an image we can't decode just goes back without an overlay.
async fn annotate(state: &AppState, image: String, predictions: Vec<Prediction>) -> Option<String> {
    let overlay = state.overlay.clone();
    let quality = state.compression.quality;
    let result = web::block(move || {
        let img = decode_image_payload(&image)?;
        overlay
            .annotate(&img, &predictions, quality)
            .map(|jpeg| to_data_url(&jpeg))
    })
    .await;

    match result {
        Ok(Ok(url)) => Some(url),
        Ok(Err(e)) => {
            warn!("skipping overlay: {}", e);
            None
        }
        Err(e) => {
            warn!("overlay worker failed: {}", e);
            None
        }
    }
}

/// Accepts a multipart upload and returns it resized and re-encoded as a
/// JPEG data URL. Only the first non-empty field is used.
#[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn compress(state: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    let mut bytes = Vec::new();

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::Upload(e.to_string()))?;
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::Upload(e.to_string()))?;
            if bytes.len() + data.len() > state.max_body_bytes {
                return Err(ApiError::Upload(format!(
                    "upload exceeds {} bytes",
                    state.max_body_bytes
                )));
            }
            bytes.extend_from_slice(&data);
        }
        if !bytes.is_empty() {
            break;
        }
    }

    if bytes.is_empty() {
        return Err(ApiError::EmptyUpload);
    }

    let received = bytes.len();
    let config = state.compression;
    let compressed = web::block(move || compress_image(&bytes, &config))
        .await
        .map_err(|e| {
            error!("compression worker failed: {}", e);
            ApiError::Worker
        })?
        .map_err(|e| {
            warn!("rejecting upload: {}", e);
            ApiError::InvalidImage(e)
        })?;

    info!(
        received,
        encoded = compressed.jpeg.len(),
        width = compressed.width,
        height = compressed.height,
        "image compressed"
    );

    Ok(HttpResponse::Ok().json(CompressResponse {
        image: compressed.to_data_url(),
        width: compressed.width,
        height: compressed.height,
    }))
}

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "detector_configured": state.detector.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use base64::{prelude::BASE64_STANDARD, Engine};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use serde_json::Value;
    use std::io::Cursor;
    use std::sync::Mutex;

    struct StubDetector {
        body: Option<&'static str>,
        seen: Mutex<Option<String>>,
    }

    impl StubDetector {
        fn replying(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                body: Some(body),
                seen: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                body: None,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Detector for StubDetector {
        async fn detect(&self, image_base64: &str) -> Result<DetectorResponse, DetectorError> {
            *self.seen.lock().unwrap() = Some(image_base64.to_string());
            match self.body {
                Some(body) => Ok(serde_json::from_str(body)?),
                None => Err(DetectorError::Body(
                    serde_json::from_str::<Value>("{").unwrap_err(),
                )),
            }
        }
    }

    fn state(detector: Option<Arc<dyn Detector>>) -> web::Data<AppState> {
        web::Data::new(AppState {
            detector,
            policy: DecodePolicy::default(),
            compression: CompressionConfig::default(),
            overlay: Overlay::default(),
            max_body_bytes: 1 << 20,
        })
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn png_data_url(width: u32, height: u32) -> String {
        format!(
            "data:image/png;base64,{}",
            BASE64_STANDARD.encode(png_bytes(width, height))
        )
    }

    const DETECTIONS: &str = r#"{
        "inference_id": "inf-1",
        "image": {"width": 64, "height": 64},
        "predictions": [
            {"x": 20, "y": 30, "width": 10, "height": 8, "class": "DOOR_DENT_LOW_INTACT", "confidence": 0.6, "class_id": 1},
            {"x": 40, "y": 40, "width": 12, "height": 12, "class": "GLASS_SHATTER", "confidence": 0.9},
            {"x": 5, "y": 5, "width": 2, "height": 2, "class": "HOOD_SCRATCH_LOW_INTACT", "confidence": 0.1}
        ]
    }"#;

    async fn post_analyze(state: web::Data<AppState>, uri: &str, image: &str) -> (StatusCode, Value) {
        let app = test::init_service(App::new().configure(app_config(state))).await;
        let req = test::TestRequest::post()
            .uri(uri)
            .set_json(json!({ "image": image }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp.status();
        (status, test::read_body_json(resp).await)
    }

    #[actix_web::test]
    async fn missing_configuration_is_500() {
        let (status, body) = post_analyze(state(None), "/analyze", "data:image/jpeg;base64,AAAA").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Server configuration error. API key or Model ID is missing."
        );
        assert!(body.get("details").is_none());
    }

    #[actix_web::test]
    async fn upstream_failure_is_wrapped() {
        let (status, body) = post_analyze(state(Some(StubDetector::failing())), "/analyze", "AAAA").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to analyze image.");
        assert!(body["details"].as_str().unwrap().contains("unreadable"));
    }

    #[actix_web::test]
    async fn detections_are_decoded_and_summarized() {
        let stub = StubDetector::replying(DETECTIONS);
        let (status, body) =
            post_analyze(state(Some(stub.clone())), "/analyze", "data:image/jpeg;base64,QUJD").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stub.seen.lock().unwrap().as_deref(), Some("QUJD"));

        assert_eq!(body["inference_id"], "inf-1");
        let predictions = body["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0]["class_id"], 1);
        assert_eq!(predictions[2]["class"], "HOOD_SCRATCH_LOW_INTACT");

        let findings = body["structured_findings"].as_array().unwrap();
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0]["part"], "DOOR");
        assert_eq!(findings[0]["repair_action"], "PDR (Paintless Dent Repair)");
        assert_eq!(findings[1]["severity"], "CRITICAL");
        assert_eq!(findings[1]["part"], "GLASS PANEL");

        let summary = body["ai_summary"].as_str().unwrap();
        assert!(summary.starts_with("AI Inspection found 3 issues. "));
        assert!(summary.contains("CRITICAL FLAGS: GLASS SHATTER"));
        assert_eq!(body["overall_severity"], "Severe");
        assert!((body["average_confidence"].as_f64().unwrap() - 1.6 / 3.0).abs() < 1e-9);
        assert!(body.get("annotated_image").is_none());
    }

    #[actix_web::test]
    async fn low_confidence_flag_is_still_critical() {
        let stub = StubDetector::replying(
            r#"{"predictions": [{"x": 10, "y": 10, "width": 4, "height": 4, "class": "GLASS_SHATTER", "confidence": 0.2}]}"#,
        );
        let (status, body) = post_analyze(state(Some(stub)), "/analyze", "AAAA").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"].as_array().unwrap().len(), 1);
        assert_eq!(body["predictions"][0]["confidence"], 0.2);
        let findings = body["structured_findings"].as_array().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["severity"], "CRITICAL");
        assert_eq!(findings[0]["repair_action"], "MANUAL_REVIEW_REQUIRED");
        assert!(body["ai_summary"]
            .as_str()
            .unwrap()
            .contains("CRITICAL FLAGS: GLASS SHATTER"));
    }

    #[actix_web::test]
    async fn empty_detections_pass_through() {
        let stub = StubDetector::replying(r#"{"predictions": [], "time": 0.2}"#);
        let (status, body) = post_analyze(state(Some(stub)), "/analyze", "AAAA").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["predictions"], json!([]));
        assert_eq!(body["time"], 0.2);
        assert!(body.get("ai_summary").is_none());
        assert!(body.get("structured_findings").is_none());
    }

    #[actix_web::test]
    async fn unrecognized_payload_passes_through() {
        let stub = StubDetector::replying(r#"{"message": "Forbidden"}"#);
        let (status, body) = post_analyze(state(Some(stub)), "/analyze", "AAAA").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Forbidden" }));
    }

    #[actix_web::test]
    async fn annotate_adds_overlay_image() {
        let stub = StubDetector::replying(DETECTIONS);
        let (status, body) =
            post_analyze(state(Some(stub)), "/analyze?annotate=true", &png_data_url(64, 64)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["annotated_image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[actix_web::test]
    async fn annotate_skips_undecodable_image() {
        let stub = StubDetector::replying(DETECTIONS);
        let (status, body) = post_analyze(state(Some(stub)), "/analyze?annotate=true", "QUJD").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("annotated_image").is_none());
        assert!(body.get("ai_summary").is_some());
    }

    #[actix_web::test]
    async fn malformed_body_is_400() {
        let app = test::init_service(App::new().configure(app_config(state(None)))).await;
        let req = test::TestRequest::post()
            .uri("/analyze")
            .set_json(json!({ "picture": "AAAA" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid request body");
    }

    fn multipart(bytes: &[u8]) -> (String, Vec<u8>) {
        let boundary = "damage-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"car.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    #[actix_web::test]
    async fn compress_returns_data_url() {
        let (content_type, body) = multipart(&png_bytes(2000, 1000));

        let app = test::init_service(App::new().configure(app_config(state(None)))).await;
        let req = test::TestRequest::post()
            .uri("/compress")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["width"], 1280);
        assert_eq!(body["height"], 640);
        assert!(body["image"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[actix_web::test]
    async fn compress_rejects_non_images() {
        let (content_type, body) = multipart(b"definitely not an image");
        let app = test::init_service(App::new().configure(app_config(state(None)))).await;
        let req = test::TestRequest::post()
            .uri("/compress")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid image file");
    }

    #[actix_web::test]
    async fn health_reports_detector() {
        let app = test::init_service(
            App::new().configure(app_config(state(Some(StubDetector::replying("{}"))))),
        )
        .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["detector_configured"], true);
    }
}
