// src/error.rs
use log::error;
use serde_json::json;
use std::convert::Infallible;
use std::fmt;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;
use warp::{Rejection, Reply};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("mail error: {0}")]
    Mail(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Mail(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Upstream(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Rejection carried through warp filters and rendered by [`handle_rejection`].
#[derive(Debug)]
pub struct CustomError {
    pub status: StatusCode,
    pub message: String,
}

impl CustomError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        CustomError {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        CustomError::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl From<AppError> for CustomError {
    fn from(e: AppError) -> Self {
        CustomError {
            status: e.status(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CustomError {}

impl Reject for CustomError {}

pub fn reject(e: impl Into<CustomError>) -> Rejection {
    warp::reject::custom(e.into())
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<CustomError>() {
        (e.status, e.message.clone())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "error": message })),
        status,
    ))
}
