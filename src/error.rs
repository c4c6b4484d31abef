use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::compress::CompressError;
use crate::detector::DetectorError;
use crate::models::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Server configuration error. API key or Model ID is missing.")]
    MissingConfiguration,
    #[error("Failed to analyze image.")]
    Upstream(#[source] DetectorError),
    #[error("Invalid image file")]
    InvalidImage(#[source] CompressError),
    #[error("No image file was uploaded")]
    EmptyUpload,
    #[error("Could not read upload")]
    Upload(String),
    #[error("Image worker failed")]
    Worker,
}

impl ApiError {
    fn details(&self) -> Option<String> {
        match self {
            ApiError::Upstream(e) => Some(e.to_string()),
            ApiError::InvalidImage(e) => Some(e.to_string()),
            ApiError::Upload(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingConfiguration | ApiError::Upstream(_) | ApiError::Worker => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::InvalidImage(_) | ApiError::EmptyUpload | ApiError::Upload(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            details: self.details(),
        })
    }
}
