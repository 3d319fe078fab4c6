// src/report_routes.rs
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tracing::info;

use crate::config::REPORT_RETENTION_DAYS;
use crate::error::{io_context, AppError};
use crate::models::Period;
use crate::pdf;
use crate::reports::{self, BatchOutcome, CleanupOutcome, ReportListing};
use crate::routes::{attachment, json_body, run_blocking, AppState};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const ZIP_CONTENT_TYPE: &str = "application/zip";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/generate-pdf/{client}/{month}/{year}",
            get(handle_client_pdf),
        )
        .route(
            "/generate-summary-pdf/{month}/{year}",
            get(handle_summary_pdf),
        )
        .route("/generate-all-pdfs/{month}/{year}", post(handle_generate_all))
        .route(
            "/generate-selected-zip/{month}/{year}",
            post(handle_selected_zip),
        )
        .route("/list-reports/{month}/{year}", get(handle_list_reports))
        .route("/download-pdf/reports/{filename}", get(handle_download))
        .route("/cleanup-reports", post(handle_cleanup))
}

#[derive(Debug, Deserialize)]
pub struct SelectedClients {
    #[serde(default)]
    clients: Vec<String>,
}

async fn handle_client_pdf(
    State(state): State<AppState>,
    Path((client, month, year)): Path<(String, u32, i32)>,
) -> Result<Response, AppError> {
    let period = Period::new(month, year)?;
    info!("Generating invoice PDF for {} ({})", client, period);
    let db = state.db.clone();
    let dir = state.config.reports_dir.clone();
    let report = run_blocking(move || {
        reports::client_invoice(&db, &dir, &client, period, Local::now().naive_local())
    })
    .await?;
    Ok(attachment(report.bytes, PDF_CONTENT_TYPE, &report.filename))
}

async fn handle_summary_pdf(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Response, AppError> {
    let period = Period::new(month, year)?;
    let db = state.db.clone();
    let dir = state.config.reports_dir.clone();
    let report = run_blocking(move || {
        reports::period_summary(&db, &dir, period, Local::now().naive_local())
    })
    .await?;
    Ok(attachment(report.bytes, PDF_CONTENT_TYPE, &report.filename))
}

async fn handle_generate_all(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<BatchOutcome>, AppError> {
    let period = Period::new(month, year)?;
    let db = state.db.clone();
    let dir = state.config.reports_dir.clone();
    let outcome = run_blocking(move || {
        reports::generate_all(&db, &dir, period, Local::now().naive_local())
    })
    .await?;
    info!(
        "Generated {} PDFs for {} ({} errors)",
        outcome.generated_files,
        period,
        outcome.errors.len()
    );
    Ok(Json(outcome))
}

async fn handle_selected_zip(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
    payload: Result<Json<SelectedClients>, JsonRejection>,
) -> Result<Response, AppError> {
    let period = Period::new(month, year)?;
    let selected = json_body(payload)?.clients;
    let db = state.db.clone();
    let dir = state.config.reports_dir.clone();
    let bytes = run_blocking(move || {
        reports::selected_zip(&db, &dir, period, &selected, Local::now().naive_local())
    })
    .await?;
    Ok(attachment(
        bytes,
        ZIP_CONTENT_TYPE,
        &pdf::selected_zip_filename(period),
    ))
}

async fn handle_list_reports(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<ReportListing>, AppError> {
    let period = Period::new(month, year)?;
    Ok(Json(reports::list_reports(&state.config.reports_dir, period)?))
}

async fn handle_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let path = reports::resolve_download(&state.config.reports_dir, &filename)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| io_context(e, format!("reading {}", path.display())))?;
    let content_type = if filename.ends_with(".zip") {
        ZIP_CONTENT_TYPE
    } else {
        PDF_CONTENT_TYPE
    };
    Ok(attachment(bytes, content_type, &filename))
}

async fn handle_cleanup(State(state): State<AppState>) -> Result<Json<CleanupOutcome>, AppError> {
    let dir = state.config.reports_dir.clone();
    let max_age = Duration::from_secs(REPORT_RETENTION_DAYS * 24 * 60 * 60);
    let outcome =
        run_blocking(move || reports::cleanup_reports(&dir, max_age, SystemTime::now())).await?;
    Ok(Json(outcome))
}
