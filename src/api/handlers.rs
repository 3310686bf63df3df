//! Endpoint handlers returning a status code and a JSON body.

use serde_json::{json, Value};

use crate::common::error::{ErrorCode, ServeError};
use crate::common::{ids, time};
use crate::inference::PredictionService;

use super::auth;

/// Status plus JSON body, ready for the host server to write out.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn from_error(err: &ServeError) -> Self {
        Self {
            status: status_for(err),
            body: json!({ "detail": err.to_string(), "code": err.code() as u32 }),
        }
    }
}

/// Headers the handlers care about.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestMeta<'a> {
    pub api_key: Option<&'a str>,
    pub request_id: Option<&'a str>,
}

pub fn status_for(err: &ServeError) -> u16 {
    match err.code() {
        ErrorCode::Unauthorized => 401,
        ErrorCode::InvalidInput => 422,
        ErrorCode::NotFound | ErrorCode::StoreUnavailable => 503,
        _ => 500,
    }
}

/// `GET /health`. Never fails.
pub fn health() -> ApiResponse {
    ApiResponse::ok(json!({ "status": "ok", "timestamp": time::now_iso8601() }))
}

/// `GET /info`.
pub fn info(svc: &PredictionService) -> ApiResponse {
    match svc.info() {
        Ok(info) => match serde_json::to_value(&info) {
            Ok(body) => ApiResponse::ok(body),
            Err(err) => ApiResponse::from_error(&err.into()),
        },
        Err(err) => {
            tracing::warn!(model = %svc.model_name(), error = %err, "info unavailable");
            ApiResponse::from_error(&err)
        }
    }
}

/// `POST /predict`. The key is checked before any model work.
pub fn predict(
    svc: &PredictionService,
    expected_key: &str,
    meta: RequestMeta<'_>,
    body: &Value,
) -> ApiResponse {
    let request_id = meta
        .request_id
        .map(String::from)
        .unwrap_or_else(ids::new_run_id);

    if let Err(err) = auth::check_api_key(meta.api_key, expected_key) {
        tracing::warn!(request_id = %request_id, "rejected request with invalid API key");
        return ApiResponse::from_error(&err);
    }

    let served = match svc.predict(body) {
        Ok(served) => served,
        Err(err) => {
            if err.is_client_error() {
                tracing::info!(
                    request_id = %request_id,
                    error = %err,
                    "invalid prediction request"
                );
            } else {
                tracing::error!(request_id = %request_id, error = %err, "prediction failed");
            }
            return ApiResponse::from_error(&err);
        }
    };

    tracing::info!(
        request_id = %request_id,
        model_version = %served.version,
        target_field = served.result.target(),
        prediction = served.result.value(),
        "prediction served"
    );
    match serde_json::to_value(&served.result) {
        Ok(body) => ApiResponse::ok(body),
        Err(err) => ApiResponse::from_error(&err.into()),
    }
}
