use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("ingredientes do not exist: {0:?}")]
    Referential(Vec<i64>),

    #[error("{entity} {id} is still referenced by {links} maki_ingrediente rows")]
    Conflict {
        entity: &'static str,
        id: i64,
        links: i64,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("catalog store is unavailable")]
    Unavailable,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("failed to connect to database: {0}")]
    Connection(#[from] diesel::result::ConnectionError),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("blocking task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        CatalogError::NotFound { entity, id }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        CatalogError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the failure comes from the store itself rather than from the request.
    /// Only these count against the circuit breaker.
    pub(crate) fn is_store_failure(&self) -> bool {
        matches!(
            self,
            CatalogError::Database(_) | CatalogError::Connection(_) | CatalogError::Pool(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for CatalogError {
    fn status_code(&self) -> StatusCode {
        match self {
            CatalogError::NotFound { .. } => StatusCode::NOT_FOUND,
            CatalogError::Referential(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CatalogError::Conflict { .. } => StatusCode::CONFLICT,
            CatalogError::Validation { .. } => StatusCode::BAD_REQUEST,
            CatalogError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        HttpResponse::build(status).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
