use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("forbidden")] Forbidden,
    #[error("conflict")] Conflict,
    #[error("already reported")] AlreadyReported,
    #[error("story is not published")] NotPublished,
    #[error("story has no start page")] NoStartPage,
    #[error("page is not an ending")] NotAnEnding,
    #[error("broken reference: {0}")] InvalidReference(String),
    #[error("{0}")] Validation(String),
    #[error("too many requests")] RateLimited,
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::AlreadyReported => ApiError::AlreadyReported,
            RepoError::NotPublished => ApiError::NotPublished,
            RepoError::NoStartPage => ApiError::NoStartPage,
            RepoError::NotAnEnding => ApiError::NotAnEnding,
            RepoError::InvalidReference(what) => ApiError::InvalidReference(what),
            RepoError::Validation(msg) => ApiError::Validation(msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict | ApiError::AlreadyReported => StatusCode::CONFLICT,
            ApiError::NotPublished
            | ApiError::NoStartPage
            | ApiError::NotAnEnding
            | ApiError::InvalidReference(_)
            | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
