use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Field, Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use http::{header, HeaderValue, Method, StatusCode};
use parcel_backends::{CodeRegistry, ObjectStager, UrlSigner};
use parcel_storage::TransferRecordStore;
use parcel_transfer::{SendReceipt, UpdateFileStatusRequest, ValidationError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::TransferError;
use crate::receive::ReceiveWorkflow;
use crate::send::{SendRequest, SendSettings, SendWorkflow, UploadedFile};

/// RFC 5987 `attr-char` minus alphanumerics; everything else is escaped.
const FILENAME_ATTR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_body_bytes: usize,
    pub cors_allow_any_origin: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: 100 * 1024 * 1024,
            cors_allow_any_origin: true,
        }
    }
}

/// Backend handles, built once at startup and shared by every request.
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn TransferRecordStore>,
    pub registry: Arc<dyn CodeRegistry>,
    pub stager: Arc<dyn ObjectStager>,
    pub signer: UrlSigner,
}

#[derive(Clone)]
pub struct AppState {
    pub send: Arc<SendWorkflow>,
    pub receive: Arc<ReceiveWorkflow>,
    pub store: Arc<dyn TransferRecordStore>,
    pub stager: Arc<dyn ObjectStager>,
    pub signer: UrlSigner,
    pub http: HttpSettings,
}

impl AppState {
    pub fn new(deps: Dependencies, send_settings: SendSettings, http: HttpSettings) -> Self {
        let receive = ReceiveWorkflow::new(
            deps.store.clone(),
            deps.registry.clone(),
            deps.stager.clone(),
            send_settings.download_ttl,
        );
        let send = SendWorkflow::new(
            deps.store.clone(),
            deps.registry,
            deps.stager.clone(),
            send_settings,
        );

        Self {
            send: Arc::new(send),
            receive: Arc::new(receive),
            store: deps.store,
            stager: deps.stager,
            signer: deps.signer,
            http,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendResponse {
    msg: &'static str,
    #[serde(flatten)]
    receipt: SendReceipt,
}

#[derive(Debug, Deserialize)]
struct ReceiveQuery {
    #[serde(rename = "pickupCode", default)]
    pickup_code: String,
}

#[derive(Debug, Deserialize)]
struct PresignedQuery {
    expires: i64,
    signature: String,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.http.max_body_bytes;
    let cors = state.http.cors_allow_any_origin.then(|| {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers(Any)
            .expose_headers([header::CONTENT_LENGTH])
    });

    let router = Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/api/v1/sendPackage", post(send_package))
        .route("/api/v1/sendRecords", get(send_records))
        .route("/api/v1/receivePackage", get(receive_package))
        .route("/api/v1/updateFileStatus", post(update_file_status))
        .route("/api/v1/receiveRecords", get(receive_records))
        .route("/objects/{*locator}", get(download_object))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http());

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = match state.store.ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = ?err, "record store not reachable");
            false
        }
    };
    let payload = Json(json!({
        "status": if ready { "ready" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339()
    }));

    if ready {
        (StatusCode::OK, payload).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, payload).into_response()
    }
}

async fn send_package(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, TransferError> {
    let multipart = multipart
        .map_err(|rejection| ValidationError::MalformedRequest(rejection.body_text()))?;
    let request = read_send_form(multipart).await?;
    let receipt = state.send.send(request).await?;
    Ok(Json(SendResponse {
        msg: "sent",
        receipt,
    }))
}

async fn send_records(State(state): State<AppState>) -> Result<impl IntoResponse, TransferError> {
    let records = state.send.send_records().await?;
    Ok(Json(json!({ "records": records })))
}

async fn receive_package(
    State(state): State<AppState>,
    Query(query): Query<ReceiveQuery>,
) -> Result<impl IntoResponse, TransferError> {
    let ticket = state.receive.receive(&query.pickup_code).await?;
    Ok(Json(ticket))
}

async fn update_file_status(
    State(state): State<AppState>,
    payload: Result<Json<UpdateFileStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TransferError> {
    let Json(payload) = payload
        .map_err(|rejection| ValidationError::MalformedRequest(rejection.body_text()))?;
    state.receive.confirm_received(&payload.transfer_id).await?;
    Ok(Json(json!({ "msg": "file status updated" })))
}

async fn receive_records(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TransferError> {
    let records = state.receive.receive_records().await?;
    Ok(Json(json!({ "records": records })))
}

/// Serves a staged object to the holder of a valid presigned URL.
async fn download_object(
    State(state): State<AppState>,
    Path(locator): Path<String>,
    Query(query): Query<PresignedQuery>,
) -> Response {
    if let Err(err) = state
        .signer
        .verify(&locator, query.expires, &query.signature, Utc::now())
    {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "forbidden", "message": err.to_string() })),
        )
            .into_response();
    }

    match state.stager.get(&locator).await {
        Ok(Some(object)) => {
            let mut response = (StatusCode::OK, object.body).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&object.content_type) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            if let Ok(value) = HeaderValue::from_str(&content_disposition(&locator)) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            info!(locator = %locator, "object downloaded");
            response
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not_found", "message": "object not found" })),
        )
            .into_response(),
        Err(err) => {
            error!(locator = %locator, error = %err, "object read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal_error", "message": "internal server error" })),
            )
                .into_response()
        }
    }
}

async fn read_send_form(mut multipart: Multipart) -> Result<SendRequest, TransferError> {
    let mut request = SendRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "files[]" | "file" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let body = field.bytes().await.map_err(malformed)?;
                request.files.push(UploadedFile::new(file_name, body));
            }
            "type" => request.kind = text_field(field).await?,
            "expireTip" => request.expire_amount = text_field(field).await?,
            "expireUnit" => request.expire_unit = text_field(field).await?,
            "text" => request.text = Some(text_field(field).await?),
            "pickupCode" => request.pickup_code = Some(text_field(field).await?),
            _ => {}
        }
    }

    Ok(request)
}

async fn text_field(field: Field<'_>) -> Result<String, TransferError> {
    field.text().await.map_err(malformed)
}

fn malformed(err: MultipartError) -> TransferError {
    ValidationError::MalformedRequest(err.body_text()).into()
}

/// `attachment` with the timestamp prefix stripped. `filename` is an ASCII
/// fallback; `filename*` carries the UTF-8 name.
fn content_disposition(locator: &str) -> String {
    let last = locator.rsplit('/').next().unwrap_or(locator);
    let display = match last.split_once('_') {
        Some((prefix, rest)) if !rest.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => last,
    };
    let safe: String = display
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(display, FILENAME_ATTR);
    format!("attachment; filename=\"{safe}\"; filename*=UTF-8''{encoded}")
}
