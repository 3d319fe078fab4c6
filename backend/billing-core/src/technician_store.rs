// src/technician_store.rs
use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{decimal_col, decimal_sql};
use crate::error::AppError;
use crate::models::{
    parse_iso_datetime, NewTechnician, Technician, TechnicianUpdate, DEFAULT_EFFICIENCY_TARGET,
    DEFAULT_MONTHLY_HOURS_TARGET, MAX_AMOUNT,
};

const TECHNICIAN_COLUMNS: &str = "id, name, email, phone, department, monthly_hours_target, \
     efficiency_target, active, hire_date, created_at, updated_at";

fn technician_from_row(row: &Row<'_>) -> rusqlite::Result<Technician> {
    Ok(Technician {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        department: row.get(4)?,
        monthly_hours_target: decimal_col(row, 5)?,
        efficiency_target: decimal_col(row, 6)?,
        active: row.get(7)?,
        hire_date: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn amount_in_range(message: &str, value: Decimal) -> Result<Decimal, AppError> {
    if value.is_sign_negative() || value > MAX_AMOUNT {
        return Err(AppError::BadRequest(message.to_string()));
    }
    Ok(value)
}

fn hire_date(value: Option<&str>) -> Result<Option<NaiveDateTime>, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(parse_iso_datetime)
        .transpose()
}

pub fn list_active(conn: &Connection) -> Result<Vec<Technician>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM technicians WHERE active = 1 ORDER BY name",
        TECHNICIAN_COLUMNS
    ))?;
    let technicians = stmt
        .query_map([], technician_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(technicians)
}

pub fn get_technician(conn: &Connection, id: i64) -> Result<Option<Technician>, AppError> {
    let technician = conn
        .query_row(
            &format!("SELECT {} FROM technicians WHERE id = ?1", TECHNICIAN_COLUMNS),
            [id],
            technician_from_row,
        )
        .optional()?;
    Ok(technician)
}

fn name_taken(conn: &Connection, name: &str, except_id: i64) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM technicians WHERE name = ?1 AND id <> ?2",
        params![name, except_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_technician(conn: &Connection, new: NewTechnician) -> Result<Technician, AppError> {
    let name = new
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Nome do técnico é obrigatório".to_string()))?
        .to_string();
    if name_taken(conn, &name, -1)? {
        return Err(AppError::BadRequest(
            "Técnico com este nome já existe".to_string(),
        ));
    }

    let monthly_hours_target = amount_in_range(
        "Valor inválido para meta de horas mensais",
        new.monthly_hours_target.unwrap_or(DEFAULT_MONTHLY_HOURS_TARGET),
    )?;
    let efficiency_target = amount_in_range(
        "Valor inválido para meta de eficiência",
        new.efficiency_target.unwrap_or(DEFAULT_EFFICIENCY_TARGET),
    )?;
    let hired = hire_date(new.hire_date.as_deref())?;

    let timestamp = Local::now().naive_local();
    conn.execute(
        "INSERT INTO technicians (
            name, email, phone, department, monthly_hours_target, efficiency_target,
            active, hire_date, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            name,
            new.email,
            new.phone,
            new.department,
            decimal_sql(&monthly_hours_target),
            decimal_sql(&efficiency_target),
            new.active.unwrap_or(true),
            hired,
            timestamp,
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!("Created technician '{}' (id {})", name, id);

    get_technician(conn, id)?
        .ok_or_else(|| AppError::NotFound("Técnico não encontrado".to_string()))
}

pub fn update_technician(
    conn: &Connection,
    id: i64,
    update: TechnicianUpdate,
) -> Result<Technician, AppError> {
    let mut technician = get_technician(conn, id)?
        .ok_or_else(|| AppError::NotFound("Técnico não encontrado".to_string()))?;

    if let Some(name) = update.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(
                "Nome do técnico não pode estar vazio".to_string(),
            ));
        }
        if name != technician.name && name_taken(conn, &name, id)? {
            return Err(AppError::BadRequest(
                "Técnico com este nome já existe".to_string(),
            ));
        }
        technician.name = name;
    }
    if let Some(email) = update.email {
        technician.email = email;
    }
    if let Some(phone) = update.phone {
        technician.phone = phone;
    }
    if let Some(department) = update.department {
        technician.department = department;
    }
    if let Some(value) = update.monthly_hours_target {
        technician.monthly_hours_target =
            amount_in_range("Valor inválido para meta de horas mensais", value)?;
    }
    if let Some(value) = update.efficiency_target {
        technician.efficiency_target = amount_in_range("Valor inválido para meta de eficiência", value)?;
    }
    if let Some(hired) = hire_date(update.hire_date.as_deref())? {
        technician.hire_date = Some(hired);
    }
    if let Some(active) = update.active {
        technician.active = active;
    }

    conn.execute(
        "UPDATE technicians SET
            name = ?1, email = ?2, phone = ?3, department = ?4, monthly_hours_target = ?5,
            efficiency_target = ?6, active = ?7, hire_date = ?8, updated_at = ?9
         WHERE id = ?10",
        params![
            technician.name,
            technician.email,
            technician.phone,
            technician.department,
            decimal_sql(&technician.monthly_hours_target),
            decimal_sql(&technician.efficiency_target),
            technician.active,
            technician.hire_date,
            Local::now().naive_local(),
            id,
        ],
    )?;

    get_technician(conn, id)?
        .ok_or_else(|| AppError::NotFound("Técnico não encontrado".to_string()))
}

pub fn search_technicians(conn: &Connection, query: &str) -> Result<Vec<Technician>, AppError> {
    let needle = query.trim().to_lowercase();
    Ok(list_active(conn)?
        .into_iter()
        .filter(|t| t.name.to_lowercase().contains(&needle))
        .collect())
}
