//! Json http api of the daemon.
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::ingest::{ClientInputError, IngestError, IngestService};
use crate::shutdown::Shutdown;
use crate::storage::StorageError;

/// Requests with larger bodies are answered with `413`.
const MAX_BODY_BYTES: u64 = 64 * 1024;

fn default_workers() -> usize {
    4
}

fn default_reference_limit() -> usize {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the http server.
pub struct HttpParameters {
    /// The ip address the server should listen on.
    pub address: String,
    /// The port the server should listen on.
    pub port: u32,
    /// Number of request handling threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of reference readings served by `/api/airkorea`.
    #[serde(default = "default_reference_limit")]
    pub reference_limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    fn ok(status: u16, body: Value) -> Self {
        ApiResponse { status, body: Some(body) }
    }

    fn error(status: u16, message: &str) -> Self {
        ApiResponse {
            status,
            body: Some(json!({"success": false, "error": message})),
        }
    }

    fn storage_error(err: StorageError) -> Self {
        log::error!(target: "aqlogd::http", "Storage operation failed: \'{}\'", err);
        ApiResponse::error(500, &err.to_string())
    }

    fn payload_too_large() -> Self {
        ApiResponse::error(413, &format!("Payload exceeds {} bytes", MAX_BODY_BYTES))
    }

    fn no_content() -> Self {
        ApiResponse { status: 204, body: None }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ApiResponse> {
    serde_json::to_value(value).map_err(|err| ApiResponse::error(500, &err.to_string()))
}

/// Returns true for `application/json` and `application/*+json` media types.
fn is_json(content_type: Option<&str>) -> bool {
    let media_type = match content_type.and_then(|value| value.split(';').next()) {
        Some(media_type) => media_type.trim().to_ascii_lowercase(),
        None => return false,
    };
    media_type == "application/json" || (media_type.starts_with("application/") && media_type.ends_with("+json"))
}

/// Maps requests onto the ingestion service.
pub struct Router {
    service: Arc<IngestService>,
    reference_limit: usize,
}

impl Router {
    pub fn new(service: Arc<IngestService>, reference_limit: usize) -> Self {
        Router { service, reference_limit }
    }

    pub fn handle(&self, method: &Method, url: &str, content_type: Option<&str>, body: &[u8]) -> ApiResponse {
        let path = url.split('?').next().unwrap_or(url);
        if *method == Method::Options {
            return ApiResponse::no_content();
        }

        let result = match (method, path) {
            (Method::Post, "/api/sensor_data") => self.post_sensor_data(content_type, body),
            (Method::Get, "/api/sensor_data") | (Method::Get, "/") => self.get_sensor_data(),
            (Method::Get, "/api/scores") => self.get_scores(),
            (Method::Get, "/api/airkorea") => self.get_reference_readings(),
            (_, "/api/sensor_data") | (_, "/") | (_, "/api/scores") | (_, "/api/airkorea") => {
                Err(ApiResponse::error(405, "Method not allowed"))
            }
            _ => Err(ApiResponse::error(404, "Not found")),
        };
        match result {
            Ok(response) => response,
            Err(response) => response,
        }
    }

    fn post_sensor_data(&self, content_type: Option<&str>, body: &[u8]) -> Result<ApiResponse, ApiResponse> {
        if !is_json(content_type) {
            let err = ClientInputError::UnsupportedMediaType;
            return Err(ApiResponse::error(415, &err.to_string()));
        }
        let outcome = match self.service.ingest(body) {
            Ok(outcome) => outcome,
            Err(IngestError::ClientInput(err)) => {
                log::debug!(target: "aqlogd::http", "Rejected sensor data: \'{}\'", err);
                return Err(ApiResponse::error(400, &err.to_string()));
            }
            Err(IngestError::Storage(err)) => return Err(ApiResponse::storage_error(err)),
        };
        Ok(ApiResponse::ok(201, json!({
            "success": true,
            "sensor_data": to_json(&outcome.sensor_data)?,
            "environmental_score": outcome.environmental_score,
        })))
    }

    fn get_sensor_data(&self) -> Result<ApiResponse, ApiResponse> {
        let readings = self.service.sensor_readings().map_err(ApiResponse::storage_error)?;
        Ok(ApiResponse::ok(200, json!({"success": true, "sensor_data": to_json(readings)?})))
    }

    fn get_scores(&self) -> Result<ApiResponse, ApiResponse> {
        let scores = self.service.scores().map_err(ApiResponse::storage_error)?;
        Ok(ApiResponse::ok(200, json!({"success": true, "scores": to_json(scores)?})))
    }

    fn get_reference_readings(&self) -> Result<ApiResponse, ApiResponse> {
        let readings = self
            .service
            .reference_readings(self.reference_limit)
            .map_err(ApiResponse::storage_error)?;
        Ok(ApiResponse::ok(200, json!({"success": true, "data": to_json(readings)?})))
    }
}

fn header(field: &str, value: &str) -> Option<Header> {
    match Header::from_bytes(field.as_bytes(), value.as_bytes()) {
        Ok(header) => Some(header),
        Err(_) => {
            log::warn!(target: "aqlogd::http", "Invalid response header \'{}\'", field);
            None
        }
    }
}

/// Reads at most `MAX_BODY_BYTES` of a request body.
///
/// Returns `None` if the body is larger than that.
fn read_body<R: Read>(reader: R) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(MAX_BODY_BYTES + 1).read_to_end(&mut body)?;
    if body.len() as u64 > MAX_BODY_BYTES {
        return Ok(None);
    }
    Ok(Some(body))
}

fn respond(mut request: Request, router: &Router) {
    let content_type = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Content-Type"))
        .map(|header| header.value.as_str().to_string());

    let method = request.method().clone();
    let url = request.url().to_string();
    let api_response = match read_body(request.as_reader()) {
        Ok(Some(body)) => router.handle(&method, &url, content_type.as_deref(), &body),
        Ok(None) => {
            log::debug!(target: "aqlogd::http", "Rejected request body larger than {} bytes", MAX_BODY_BYTES);
            ApiResponse::payload_too_large()
        }
        Err(err) => {
            log::warn!(target: "aqlogd::http", "Could not read request body: \'{}\'", err);
            router.handle(&method, &url, content_type.as_deref(), &[])
        }
    };
    log::debug!(target: "aqlogd::http", "{} {} -> {}", method, url, api_response.status);

    let payload = match &api_response.body {
        Some(value) => value.to_string().into_bytes(),
        None => Vec::new(),
    };
    let mut response = Response::from_data(payload).with_status_code(StatusCode(api_response.status));
    let mut headers = vec![
        header("Access-Control-Allow-Origin", "*"),
        header("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
        header("Access-Control-Allow-Headers", "Content-Type"),
    ];
    if api_response.body.is_some() {
        headers.push(header("Content-Type", "application/json"));
    }
    for header in headers.into_iter().flatten() {
        response.add_header(header);
    }

    if let Err(err) = request.respond(response) {
        log::warn!(target: "aqlogd::http", "Could not send response: \'{}\'", err);
    }
}

/// Thread function for a single http worker.
///
/// Handles requests until `shutdown` is cancelled.
pub fn worker_thread(server: Arc<Server>, router: Arc<Router>, shutdown: Shutdown) {
    let timeout = time::Duration::from_millis(100);

    while !shutdown.is_cancelled() {
        let request = match server.recv_timeout(timeout) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                log::error!(target: "aqlogd::http", "Could not receive request: \'{}\'", err);
                continue;
            }
        };
        respond(request, &router);
    }
}

/// Starts `workers` named worker threads serving `server`.
pub fn spawn_workers(
    server: Arc<Server>,
    router: Arc<Router>,
    shutdown: Shutdown,
    workers: usize,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    (0..workers.max(1))
        .map(|index| {
            let server = Arc::clone(&server);
            let router = Arc::clone(&router);
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name(format!("http-{}", index))
                .spawn(move || worker_thread(server, router, shutdown))
        })
        .collect()
}
