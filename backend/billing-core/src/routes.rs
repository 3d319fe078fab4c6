// src/routes.rs
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analytics;
use crate::billing;
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::AppError;
use crate::ingest::{self, ImportOutcome};
use crate::models::Period;
use crate::ticket_store;
use crate::{admin_routes, client_routes, report_routes};

const ALLOWED_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

// --- Shared State ---
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<AppConfig>,
}

/// Runs blocking work (SQLite, workbook parsing, PDF rendering) off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Locks the shared connection on a blocking thread and hands it to `f`.
pub async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, AppError>
where
    F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    run_blocking(move || {
        let mut conn = db.lock();
        f(&mut conn)
    })
    .await
}

/// Unwraps a JSON body, reporting malformed or mistyped payloads as 400.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::BadRequest(format!("Erro de validação: {}", e.body_text())))
}

pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    let api_routes = Router::new()
        .route("/periods", get(handle_periods))
        .route("/statistics/{month}/{year}", get(handle_statistics))
        .route("/billing/{month}/{year}", get(handle_period_billing))
        .route(
            "/client-billing/{client}/{month}/{year}",
            get(handle_client_billing),
        )
        .route("/billing-export/{month}/{year}", get(handle_billing_export))
        .route("/tickets/{month}/{year}", get(handle_tickets))
        .route("/heatmap-data/{month}/{year}", get(handle_heatmap))
        .route(
            "/technician-performance/{month}/{year}",
            get(handle_technician_performance),
        )
        .route(
            "/technician-details/{name}/{month}/{year}",
            get(handle_technician_details),
        )
        .route("/charts/{month}/{year}", get(handle_charts))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .merge(client_routes::routes())
        .merge(report_routes::routes())
        .merge(admin_routes::routes());

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Web Handlers ---

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_periods(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let periods = with_conn(&state, |conn| ticket_store::list_periods(conn)).await?;
    Ok(Json(json!(periods)))
}

async fn handle_statistics(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<analytics::PeriodStatistics>, AppError> {
    let period = Period::new(month, year)?;
    let stats = with_conn(&state, move |conn| {
        let tickets = ticket_store::tickets_for_period(conn, period)?;
        analytics::period_statistics(period, &tickets)
    })
    .await?;
    Ok(Json(stats))
}

async fn handle_period_billing(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<billing::PeriodBilling>, AppError> {
    let period = Period::new(month, year)?;
    let billing = with_conn(&state, move |conn| billing::period_billing(conn, period)).await?;
    Ok(Json(billing))
}

async fn handle_client_billing(
    State(state): State<AppState>,
    Path((client, month, year)): Path<(String, u32, i32)>,
) -> Result<Json<billing::ClientBilling>, AppError> {
    let period = Period::new(month, year)?;
    let billing =
        with_conn(&state, move |conn| billing::client_billing(conn, &client, period)).await?;
    Ok(Json(billing))
}

async fn handle_billing_export(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Response, AppError> {
    let period = Period::new(month, year)?;
    let csv = with_conn(&state, move |conn| {
        billing::billing_csv(&billing::period_billing(conn, period)?)
    })
    .await?;
    let filename = format!("faturamento_{:02}_{}.csv", period.month, period.year);
    Ok(attachment(csv, "text/csv; charset=utf-8", &filename))
}

async fn handle_tickets(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<Value>, AppError> {
    let period = Period::new(month, year)?;
    let tickets = with_conn(&state, move |conn| ticket_store::tickets_for_period(conn, period)).await?;
    Ok(Json(json!(tickets)))
}

async fn handle_heatmap(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<analytics::Heatmap>, AppError> {
    let period = Period::new(month, year)?;
    let map = with_conn(&state, move |conn| {
        let tickets = ticket_store::tickets_for_period(conn, period)?;
        analytics::heatmap(period, &tickets)
    })
    .await?;
    Ok(Json(map))
}

async fn handle_technician_performance(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<analytics::TechnicianPerformance>, AppError> {
    let period = Period::new(month, year)?;
    let performance = with_conn(&state, move |conn| {
        let tickets = ticket_store::tickets_for_period(conn, period)?;
        analytics::technician_performance(period, &tickets)
    })
    .await?;
    Ok(Json(performance))
}

async fn handle_technician_details(
    State(state): State<AppState>,
    Path((name, month, year)): Path<(String, u32, i32)>,
) -> Result<Json<analytics::TechnicianDetails>, AppError> {
    let period = Period::new(month, year)?;
    let details = with_conn(&state, move |conn| {
        let tickets = ticket_store::tickets_for_technician(conn, &name, period)?;
        analytics::technician_details(&name, period, tickets)
    })
    .await?;
    Ok(Json(details))
}

async fn handle_charts(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<analytics::Charts>, AppError> {
    let period = Period::new(month, year)?;
    let charts = with_conn(&state, move |conn| analytics::charts(conn, period)).await?;
    Ok(Json(charts))
}

// --- Upload ---

fn has_allowed_extension(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn optional_number<T: std::str::FromStr>(text: &str, field: &str) -> Result<Option<T>, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("Valor inválido para {}", field)))
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImportOutcome>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut month: Option<u32> = None;
    let mut year: Option<i32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Formulário inválido: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Falha ao ler arquivo: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            "month" | "year" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Formulário inválido: {}", e)))?;
                if name == "month" {
                    month = optional_number(&text, "month")?;
                } else {
                    year = optional_number(&text, "year")?;
                }
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::BadRequest("Nenhum arquivo foi enviado".to_string()))?;
    if filename.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Nenhum arquivo foi selecionado".to_string(),
        ));
    }
    if !has_allowed_extension(&filename) {
        return Err(AppError::BadRequest(
            "Tipo de arquivo não permitido. Use apenas .xlsx ou .xls".to_string(),
        ));
    }

    info!("Processing upload '{}' ({} bytes)", filename, bytes.len());
    let db = state.db.clone();
    let outcome =
        run_blocking(move || ingest::import_workbook(&db, &bytes, &filename, month, year)).await?;
    Ok(Json(outcome))
}

/// `Content-Disposition` value with the filename reduced to characters that
/// cannot end the quoted string or break the header line.
fn disposition(filename: &str) -> String {
    let quoted: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{}\"", quoted)
}

/// Binary download with `Content-Disposition: attachment`.
pub fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition(filename)),
        ],
        bytes,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_extension_check() {
        assert!(has_allowed_extension("chamados_marco.xlsx"));
        assert!(has_allowed_extension("LEGADO.XLS"));
        assert!(!has_allowed_extension("chamados.csv"));
        assert!(!has_allowed_extension("xlsx"));
    }

    #[test]
    fn test_optional_form_numbers() {
        assert_eq!(optional_number::<u32>(" 3 ", "month").unwrap(), Some(3));
        assert_eq!(optional_number::<i32>("", "year").unwrap(), None);
        assert!(optional_number::<u32>("março", "month").is_err());
    }

    #[test]
    fn test_attachment_filename_cannot_escape_quotes() {
        assert_eq!(
            disposition("fatura_Loja \"Central\"\\Sul_03_2024.pdf"),
            "attachment; filename=\"fatura_Loja _Central__Sul_03_2024.pdf\""
        );

        let response = attachment(Vec::new(), "application/pdf", "a\"b\r\nX-Injected: 1.pdf");
        let value = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(value, "attachment; filename=\"a_b__X-Injected: 1.pdf\"");
        assert!(response.headers().get("x-injected").is_none());
    }
}
