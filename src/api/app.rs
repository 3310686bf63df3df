//! Process-wide serving state: the configured key and the warmed service.

use crate::common::config::AppCfg;
use crate::common::error::{ServeError, ServeResult};
use crate::inference::{PredictionService, ServingCache};

use serde_json::Value;

use super::auth;
use super::handlers::{self, ApiResponse, RequestMeta};

pub struct ServingApp {
    api_key: String,
    service: ServingCache<PredictionService>,
}

impl ServingApp {
    /// Build the app and warm the prediction service. Fails if the service
    /// cannot be constructed from `cfg`.
    pub fn start(cfg: AppCfg) -> ServeResult<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServeError::Config("API_KEY must be set".into()))?;
        let service = ServingCache::new(move || PredictionService::new(&cfg));
        service.warm()?;
        tracing::info!("serving app started");
        Ok(Self { api_key, service })
    }

    pub fn health(&self) -> ApiResponse {
        handlers::health()
    }

    pub fn info(&self) -> ApiResponse {
        match self.service.get() {
            Ok(svc) => handlers::info(&svc),
            Err(err) => ApiResponse::from_error(&err),
        }
    }

    pub fn predict(&self, meta: RequestMeta<'_>, body: &Value) -> ApiResponse {
        match self.service.get() {
            Ok(svc) => handlers::predict(&svc, &self.api_key, meta, body),
            Err(err) => match auth::check_api_key(meta.api_key, &self.api_key) {
                Err(rejected) => ApiResponse::from_error(&rejected),
                Ok(()) => ApiResponse::from_error(&err),
            },
        }
    }
}
