// src/admin_routes.rs
use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::info;

use crate::analytics;
use crate::client_store;
use crate::error::AppError;
use crate::models::Period;
use crate::reports;
use crate::routes::{run_blocking, with_conn, AppState};
use crate::ticket_store;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/processed-periods", get(handle_processed_periods))
        .route("/admin/delete-period/{month}/{year}", delete(handle_delete_period))
        .route(
            "/admin/upload-batches/{month}/{year}",
            get(handle_period_batches),
        )
        .route("/admin/delete-batch/{batch_id}", delete(handle_delete_batch))
        .route("/admin/statistics", get(handle_admin_statistics))
        .route("/admin/backup-database", post(handle_backup))
        .route("/admin/system-info", get(handle_admin_system_info))
        // Older endpoints still used by the settings page
        .route("/upload-batches", get(handle_all_batches))
        .route("/delete-batch/{batch_id}", delete(handle_delete_batch))
        .route("/delete-period/{month}/{year}", delete(handle_delete_period))
        .route("/system-info", get(handle_system_info))
}

async fn handle_processed_periods(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let periods: Vec<Value> = with_conn(&state, |conn| ticket_store::list_periods(conn))
        .await?
        .into_iter()
        .map(|p| {
            json!({
                "month": p.month,
                "year": p.year,
                "period_label": p.label,
                "record_count": p.total_tickets,
                "first_upload": p.first_upload,
                "last_upload": p.last_update,
            })
        })
        .collect();
    Ok(Json(json!({ "success": true, "periods": periods })))
}

async fn handle_delete_period(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<Value>, AppError> {
    let period = Period::new(month, year)?;
    let deleted = with_conn(&state, move |conn| {
        if ticket_store::count_period(conn, period)? == 0 {
            return Err(AppError::NotFound(format!(
                "Nenhum dado encontrado para {}",
                period.label()
            )));
        }
        ticket_store::delete_period(conn, period)
    })
    .await?;
    info!("Deleted {} tickets of {}", deleted, period);
    Ok(Json(json!({
        "success": true,
        "message": format!("Período {} deletado com sucesso", period.label()),
        "deleted_records": deleted,
    })))
}

async fn handle_period_batches(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<Value>, AppError> {
    let period = Period::new(month, year)?;
    let batches =
        with_conn(&state, move |conn| ticket_store::list_batches(conn, Some(period))).await?;
    Ok(Json(json!({ "success": true, "batches": batches })))
}

async fn handle_all_batches(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let batches: Vec<Value> = with_conn(&state, |conn| ticket_store::list_batches(conn, None))
        .await?
        .into_iter()
        .map(|b| {
            json!({
                "batch_id": b.batch_id,
                "filename": b.filename,
                "period": b.period,
                "tickets_count": b.record_count,
                "upload_date": b.upload_time,
            })
        })
        .collect();
    Ok(Json(json!({ "batches": batches })))
}

async fn handle_delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = batch_id.clone();
    let batch = with_conn(&state, move |conn| ticket_store::delete_batch(conn, &id))
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Nenhum registro encontrado para o lote {}", batch_id))
        })?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Lote {} deletado com sucesso", batch_id),
        "deleted_records": batch.record_count,
        "batch_info": {
            "month": batch.month,
            "year": batch.year,
            "upload_time": batch.upload_time,
        },
    })))
}

async fn handle_admin_statistics(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let statistics = with_conn(&state, |conn| analytics::admin_statistics(conn)).await?;
    Ok(Json(json!({ "success": true, "statistics": statistics })))
}

async fn handle_backup(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let db = state.db.clone();
    let path = run_blocking(move || db.backup()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Backup criado com sucesso",
        "backup_path": path.display().to_string(),
    })))
}

async fn handle_admin_system_info(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let db = state.db.clone();
    let (size, version) = run_blocking(move || Ok((db.file_size(), db.schema_version()?))).await?;
    let size_mb = (Decimal::from(size) / Decimal::from(1024 * 1024)).round_dp(2);
    Ok(Json(json!({
        "success": true,
        "system_info": {
            "database_path": state.config.database_path.display().to_string(),
            "database_size_mb": size_mb,
            "database_version": version,
            "reports_dir": state.config.reports_dir.display().to_string(),
            "tls": state.config.tls.is_some(),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })))
}

async fn handle_system_info(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let db = state.db.clone();
    let reports_dir = state.config.reports_dir.clone();
    let system_info = run_blocking(move || {
        let (total_tickets, total_clients, total_uploads) = {
            let conn = db.lock();
            (
                ticket_store::total_tickets(&conn)?,
                client_store::list_clients(&conn)?.len(),
                ticket_store::total_batches(&conn)?,
            )
        };
        let version = db.schema_version()?;
        Ok(json!({
            "total_tickets": total_tickets,
            "total_clients": total_clients,
            "total_uploads": total_uploads,
            "total_reports": reports::count_reports(&reports_dir),
            "database_size": db.file_size(),
            "database_version": version,
            "last_backup": db.last_backup(),
        }))
    })
    .await?;
    Ok(Json(json!({ "system_info": system_info })))
}
