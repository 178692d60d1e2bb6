use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, RuntimeErr, SqlErr};
use serde::Serialize;
use thiserror::Error;

use crate::{
    models::OrderStatus,
    response::{ApiResponse, Meta},
};

/// Postgres SQLSTATEs a caller can resolve by retrying:
/// serialization_failure, deadlock_detected, lock_not_available.
const RETRYABLE_SQLSTATES: [&str; 3] = ["40001", "40P01", "55P03"];

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Cart is empty or not found")]
    EmptyCart,

    #[error("Order is already canceled")]
    AlreadyCanceled,

    #[error("Cannot move order from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Product not found")]
    ProductNotFound,

    #[error("Quantity must be greater than 0")]
    InvalidQuantity,

    #[error("Multiple active carts found")]
    MultipleActiveCarts,

    #[error("Concurrent update conflict, retry the request")]
    Conflict,

    #[error("Storage unavailable, retry the request")]
    Unavailable,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("ORM error")]
    OrmError(DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound | AppError::ProductNotFound => StatusCode::NOT_FOUND,
            AppError::EmptyCart
            | AppError::AlreadyCanceled
            | AppError::InvalidTransition { .. }
            | AppError::InvalidQuantity
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MultipleActiveCarts | AppError::Conflict => StatusCode::CONFLICT,
            AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::EmptyCart => "empty_cart",
            AppError::AlreadyCanceled => "already_canceled",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::ProductNotFound => "product_not_found",
            AppError::InvalidQuantity => "invalid_quantity",
            AppError::MultipleActiveCarts => "multiple_active_carts",
            AppError::Conflict => "conflict",
            AppError::Unavailable => "unavailable",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::DbError(_) | AppError::OrmError(_) | AppError::Internal(_) => "internal",
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        if is_retryable_conflict(&err) {
            return AppError::Conflict;
        }
        if matches!(err, DbErr::ConnectionAcquire(_)) {
            return AppError::Unavailable;
        }
        AppError::OrmError(err)
    }
}

fn is_retryable_conflict(err: &DbErr) -> bool {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let runtime = match err {
        DbErr::Query(e) | DbErr::Exec(e) | DbErr::Conn(e) => e,
        _ => return false,
    };
    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::Database(db)) => db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            match &self {
                AppError::DbError(err) => tracing::error!(error = %err, "database error"),
                AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
                AppError::Internal(err) => tracing::error!(error = %err, "internal error"),
                other => tracing::warn!(error = %other, "storage unavailable"),
            }
        }

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                code: self.code(),
            }),
            meta: Some(Meta::empty()),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
