// src/error.rs
use axum::http::StatusCode as AxumStatusCode;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Database error")]
    Database(#[from] rusqlite::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("PDF rendering error: {0}")]
    Pdf(String),

    #[error("ZIP archive error")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV export error")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed")]
    Join(#[from] tokio::task::JoinError),
}

// Helper to create context-aware IO errors
pub fn io_context<S: Into<String>>(source: std::io::Error, context: S) -> AppError {
    AppError::Io {
        source,
        context: context.into(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, error_message) = match &self {
            AppError::NotFound(msg) => {
                warn!("Not found: {}", msg);
                (AxumStatusCode::NOT_FOUND, msg.clone())
            }
            AppError::BadRequest(msg) => {
                warn!("Bad request: {}", msg);
                (AxumStatusCode::BAD_REQUEST, msg.clone())
            }
            AppError::Spreadsheet(msg) => {
                warn!("Spreadsheet rejected: {}", msg);
                (
                    AxumStatusCode::BAD_REQUEST,
                    format!("Erro ao processar arquivo: {}", msg),
                )
            }
            AppError::Database(e) => {
                error!("Database error: {}", e);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro interno do servidor".to_string(),
                )
            }
            AppError::Pdf(msg) => {
                error!("PDF rendering error: {}", msg);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro ao gerar PDF".to_string(),
                )
            }
            AppError::Zip(e) => {
                error!("ZIP archive error: {}", e);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro ao gerar arquivo ZIP".to_string(),
                )
            }
            AppError::Csv(e) => {
                error!("CSV export error: {}", e);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro ao exportar CSV".to_string(),
                )
            }
            AppError::Io { source, context } => {
                error!("I/O error ({}): {}", context, source);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro interno do servidor (I/O)".to_string(),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro de configuração do servidor".to_string(),
                )
            }
            AppError::Join(e) => {
                error!("Blocking task failed: {}", e);
                (
                    AxumStatusCode::INTERNAL_SERVER_ERROR,
                    "Erro interno do servidor".to_string(),
                )
            }
        };
        (status_code, Json(json!({ "error": error_message }))).into_response()
    }
}
