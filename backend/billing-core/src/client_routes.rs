// src/client_routes.rs
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::analytics;
use crate::client_store;
use crate::error::AppError;
use crate::models::{ClientUpdate, NewClient, NewTechnician, Period, TechnicianUpdate};
use crate::routes::{json_body, with_conn, AppState};
use crate::technician_store;
use crate::ticket_store;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(handle_list_clients).post(handle_create_client))
        .route("/clients/search", get(handle_search_clients))
        .route("/clients/auto-populate", post(handle_auto_populate))
        .route("/clients/sync-check", get(handle_sync_check))
        .route("/clients/data-summary", get(handle_data_summary))
        .route(
            "/clients/{id}",
            get(handle_get_client)
                .put(handle_update_client)
                .delete(handle_deactivate_client),
        )
        .route(
            "/technicians",
            get(handle_list_technicians).post(handle_create_technician),
        )
        .route("/technicians/search", get(handle_search_technicians))
        .route(
            "/technicians/stats/{month}/{year}",
            get(handle_all_technician_stats),
        )
        .route(
            "/technicians/{id}",
            get(handle_get_technician).put(handle_update_technician),
        )
        .route(
            "/technicians/{id}/stats/{month}/{year}",
            get(handle_technician_stats),
        )
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
}

fn search_term(params: SearchParams) -> Result<String, AppError> {
    params
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::BadRequest("Parâmetro de busca obrigatório".to_string()))
}

// --- Clients ---

async fn handle_list_clients(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let clients = with_conn(&state, |conn| client_store::list_clients(conn)).await?;
    Ok(Json(json!({ "success": true, "clients": clients })))
}

async fn handle_get_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let client = with_conn(&state, move |conn| client_store::get_client(conn, id))
        .await?
        .ok_or_else(|| AppError::NotFound("Cliente não encontrado".to_string()))?;
    Ok(Json(json!({ "success": true, "client": client })))
}

async fn handle_create_client(
    State(state): State<AppState>,
    payload: Result<Json<NewClient>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let new_client = json_body(payload)?;
    let client = with_conn(&state, move |conn| client_store::create_client(conn, new_client)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Cliente criado com sucesso",
            "client": client,
        })),
    ))
}

async fn handle_update_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<ClientUpdate>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let update = json_body(payload)?;
    let client = with_conn(&state, move |conn| client_store::update_client(conn, id, update)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Cliente atualizado com sucesso",
        "client": client,
    })))
}

async fn handle_deactivate_client(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    with_conn(&state, move |conn| client_store::deactivate_client(conn, id)).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Cliente desativado com sucesso",
    })))
}

async fn handle_search_clients(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, AppError> {
    let term = search_term(params)?;
    let clients = with_conn(&state, move |conn| client_store::search_clients(conn, &term)).await?;
    Ok(Json(json!({
        "success": true,
        "count": clients.len(),
        "clients": clients,
    })))
}

async fn handle_auto_populate(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let created = with_conn(&state, |conn| client_store::auto_populate(conn)).await?;
    info!("Auto-populate created {} clients", created.len());
    Ok(Json(json!({
        "success": true,
        "message": format!("{} novos clientes criados automaticamente", created.len()),
        "count": created.len(),
        "created_clients": created,
    })))
}

async fn handle_sync_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let status = with_conn(&state, |conn| client_store::sync_status(conn)).await?;
    let mut body = json!(status);
    body["success"] = json!(true);
    Ok(Json(body))
}

async fn handle_data_summary(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let clients = with_conn(&state, |conn| client_store::data_summary(conn)).await?;
    Ok(Json(json!({
        "success": true,
        "total_clients": clients.len(),
        "clients": clients,
    })))
}

// --- Technicians ---

async fn handle_list_technicians(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let technicians = with_conn(&state, |conn| technician_store::list_active(conn)).await?;
    Ok(Json(json!({ "success": true, "technicians": technicians })))
}

async fn handle_get_technician(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let technician = with_conn(&state, move |conn| technician_store::get_technician(conn, id))
        .await?
        .ok_or_else(|| AppError::NotFound("Técnico não encontrado".to_string()))?;
    Ok(Json(json!({ "success": true, "technician": technician })))
}

async fn handle_create_technician(
    State(state): State<AppState>,
    payload: Result<Json<NewTechnician>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let new_technician = json_body(payload)?;
    let technician = with_conn(&state, move |conn| {
        technician_store::create_technician(conn, new_technician)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Técnico criado com sucesso",
            "technician": technician,
        })),
    ))
}

async fn handle_update_technician(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<TechnicianUpdate>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let update = json_body(payload)?;
    let technician = with_conn(&state, move |conn| {
        technician_store::update_technician(conn, id, update)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Técnico atualizado com sucesso",
        "technician": technician,
    })))
}

async fn handle_search_technicians(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, AppError> {
    let term = search_term(params)?;
    let technicians =
        with_conn(&state, move |conn| technician_store::search_technicians(conn, &term)).await?;
    Ok(Json(json!({
        "success": true,
        "count": technicians.len(),
        "technicians": technicians,
    })))
}

async fn handle_technician_stats(
    State(state): State<AppState>,
    Path((id, month, year)): Path<(i64, u32, i32)>,
) -> Result<Json<Value>, AppError> {
    let period = Period::new(month, year)?;
    let (technician, stats) = with_conn(&state, move |conn| {
        let technician = technician_store::get_technician(conn, id)?
            .ok_or_else(|| AppError::NotFound("Técnico não encontrado".to_string()))?;
        let tickets = ticket_store::tickets_for_technician(conn, &technician.name, period)?;
        let stats = analytics::technician_monthly_stats(&technician, tickets)?;
        Ok((technician, stats))
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "technician": technician,
        "period": { "month": month, "year": year },
        "stats": stats,
    })))
}

async fn handle_all_technician_stats(
    State(state): State<AppState>,
    Path((month, year)): Path<(u32, i32)>,
) -> Result<Json<Value>, AppError> {
    let period = Period::new(month, year)?;
    let stats_data = with_conn(&state, move |conn| {
        let mut stats_data = Vec::new();
        for technician in technician_store::list_active(conn)? {
            let tickets = ticket_store::tickets_for_technician(conn, &technician.name, period)?;
            let mut stats = analytics::technician_monthly_stats(&technician, tickets)?;
            stats.tickets.clear();
            stats_data.push(json!({ "technician": technician, "stats": stats }));
        }
        Ok(stats_data)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "period": { "month": month, "year": year },
        "technicians_stats": stats_data,
    })))
}
