use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Non trovato: {0}")]
    NotFound(String),

    #[error("Job malformato: {0}")]
    MalformedJob(String),

    #[error("Errore di decodifica immagine: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Errore di trasformazione: {0}")]
    Transform(String),

    #[error("Errore di I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Errore download: {0}")]
    Download(String),

    #[error("Errore database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Errore coda: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Richiesta non valida: {0}")]
    BadRequest(String),

    #[error("Errore interno: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Download(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::MalformedJob(_) => StatusCode::BAD_REQUEST,
            AppError::Decode(_) | AppError::Transform(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Download(_) => StatusCode::BAD_GATEWAY,
            AppError::Io(_)
            | AppError::Database(_)
            | AppError::Queue(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
