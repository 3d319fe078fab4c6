// src/ticket_store.rs
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::db::{decimal_col, decimal_sql};
use crate::error::AppError;
use crate::models::{Period, PeriodSummary, Ticket, TicketFields, UploadBatch};

const TICKET_COLUMNS: &str = "id, ticket_id, client_name, subject, technician, primary_category, \
     secondary_category, contact, arrival_date, departure_date, completion_date, workstation, \
     pause_reason, sector, status, ticket_type, service, description, business_hours, \
     external_service, start_date, end_date, total_service_time, processing_month, \
     processing_year, upload_batch_id, created_at";

/// Metadata of an import, written next to its tickets.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch_id: String,
    pub filename: String,
    pub uploaded_at: NaiveDateTime,
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        fields: TicketFields {
            ticket_id: row.get(1)?,
            client_name: row.get(2)?,
            subject: row.get(3)?,
            technician: row.get(4)?,
            primary_category: row.get(5)?,
            secondary_category: row.get(6)?,
            contact: row.get(7)?,
            arrival_date: row.get(8)?,
            departure_date: row.get(9)?,
            completion_date: row.get(10)?,
            workstation: row.get(11)?,
            pause_reason: row.get(12)?,
            sector: row.get(13)?,
            status: row.get(14)?,
            ticket_type: row.get(15)?,
            service: row.get(16)?,
            description: row.get(17)?,
            business_hours: row.get(18)?,
            external_service: row.get(19)?,
            start_date: row.get(20)?,
            end_date: row.get(21)?,
            total_service_time: decimal_col(row, 22)?,
        },
        processing_month: row.get(23)?,
        processing_year: row.get(24)?,
        upload_batch_id: row.get(25)?,
        created_at: row.get(26)?,
    })
}

/// Swaps the whole content of `period` for `tickets`.
/// Batches whose tickets are all gone are dropped as well. Run it on a
/// `Transaction` so the swap commits together with whatever the import adds.
pub fn replace_period(
    tx: &Connection,
    period: Period,
    batch: &NewBatch,
    tickets: &[TicketFields],
) -> Result<usize, AppError> {
    let removed = tx.execute(
        "DELETE FROM ticket_data WHERE processing_month = ?1 AND processing_year = ?2",
        params![period.month, period.year],
    )?;
    tx.execute(
        "DELETE FROM upload_batches WHERE processing_month = ?1 AND processing_year = ?2",
        params![period.month, period.year],
    )?;
    if removed > 0 {
        info!("Replacing {} existing tickets for {}", removed, period);
    }

    tx.execute(
        "INSERT INTO upload_batches (batch_id, filename, processing_month, processing_year, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            batch.batch_id,
            batch.filename,
            period.month,
            period.year,
            batch.uploaded_at
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO ticket_data (
                ticket_id, client_name, subject, technician, primary_category,
                secondary_category, contact, arrival_date, departure_date, completion_date,
                workstation, pause_reason, sector, status, ticket_type, service, description,
                business_hours, external_service, start_date, end_date, total_service_time,
                processing_month, processing_year, upload_batch_id, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                       ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
        )?;
        for t in tickets {
            stmt.execute(params![
                t.ticket_id,
                t.client_name,
                t.subject,
                t.technician,
                t.primary_category,
                t.secondary_category,
                t.contact,
                t.arrival_date,
                t.departure_date,
                t.completion_date,
                t.workstation,
                t.pause_reason,
                t.sector,
                t.status,
                t.ticket_type,
                t.service,
                t.description,
                t.business_hours,
                t.external_service,
                t.start_date,
                t.end_date,
                decimal_sql(&t.total_service_time),
                period.month,
                period.year,
                batch.batch_id,
                batch.uploaded_at,
            ])?;
        }
    }

    debug!(
        "Stored {} tickets for {} under batch {}",
        tickets.len(),
        period,
        batch.batch_id
    );
    Ok(tickets.len())
}

pub fn tickets_for_period(conn: &Connection, period: Period) -> Result<Vec<Ticket>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ticket_data
         WHERE processing_month = ?1 AND processing_year = ?2
         ORDER BY id",
        TICKET_COLUMNS
    ))?;
    let tickets = stmt
        .query_map(params![period.month, period.year], ticket_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tickets)
}

pub fn tickets_for_client(
    conn: &Connection,
    client_name: &str,
    period: Period,
) -> Result<Vec<Ticket>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ticket_data
         WHERE client_name = ?1 AND processing_month = ?2 AND processing_year = ?3
         ORDER BY id",
        TICKET_COLUMNS
    ))?;
    let tickets = stmt
        .query_map(params![client_name, period.month, period.year], ticket_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tickets)
}

pub fn tickets_for_technician(
    conn: &Connection,
    technician: &str,
    period: Period,
) -> Result<Vec<Ticket>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ticket_data
         WHERE technician = ?1 AND processing_month = ?2 AND processing_year = ?3
         ORDER BY id",
        TICKET_COLUMNS
    ))?;
    let tickets = stmt
        .query_map(params![technician, period.month, period.year], ticket_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tickets)
}

pub fn all_tickets(conn: &Connection) -> Result<Vec<Ticket>, AppError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM ticket_data ORDER BY id", TICKET_COLUMNS))?;
    let tickets = stmt
        .query_map([], ticket_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tickets)
}

/// Distinct, non-blank client names of a period, sorted.
pub fn client_names_for_period(conn: &Connection, period: Period) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT TRIM(client_name) FROM ticket_data
         WHERE processing_month = ?1 AND processing_year = ?2
           AND client_name IS NOT NULL AND TRIM(client_name) <> ''
         ORDER BY TRIM(client_name)",
    )?;
    let names = stmt
        .query_map(params![period.month, period.year], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Periods with data, newest first.
pub fn list_periods(conn: &Connection) -> Result<Vec<PeriodSummary>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT processing_month, processing_year, COUNT(*),
                COUNT(DISTINCT client_name), MIN(created_at), MAX(created_at)
         FROM ticket_data
         GROUP BY processing_year, processing_month
         ORDER BY processing_year DESC, processing_month DESC",
    )?;
    let periods = stmt
        .query_map([], |row| {
            let month: u32 = row.get(0)?;
            let year: i32 = row.get(1)?;
            Ok(PeriodSummary {
                month,
                year,
                label: format!("{:02}/{}", month, year),
                total_tickets: row.get(2)?,
                total_clients: row.get(3)?,
                first_upload: row.get(4)?,
                last_update: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(periods)
}

pub fn count_period(conn: &Connection, period: Period) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM ticket_data WHERE processing_month = ?1 AND processing_year = ?2",
        params![period.month, period.year],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Removes a period's tickets and batches. Returns the number of tickets deleted.
pub fn delete_period(conn: &mut Connection, period: Period) -> Result<usize, AppError> {
    let tx = conn.transaction()?;
    let deleted = tx.execute(
        "DELETE FROM ticket_data WHERE processing_month = ?1 AND processing_year = ?2",
        params![period.month, period.year],
    )?;
    tx.execute(
        "DELETE FROM upload_batches WHERE processing_month = ?1 AND processing_year = ?2",
        params![period.month, period.year],
    )?;
    tx.commit()?;
    info!("Deleted period {} ({} tickets)", period, deleted);
    Ok(deleted)
}

fn batch_clients(conn: &Connection, batch_id: &str) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT client_name FROM ticket_data
         WHERE upload_batch_id = ?1 AND client_name IS NOT NULL AND client_name <> ''
         ORDER BY client_name",
    )?;
    let clients = stmt
        .query_map([batch_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(clients)
}

/// Upload batches, newest first, optionally restricted to one period.
pub fn list_batches(conn: &Connection, period: Option<Period>) -> Result<Vec<UploadBatch>, AppError> {
    let base = "SELECT b.batch_id, b.filename, b.processing_month, b.processing_year, b.uploaded_at,
                       (SELECT COUNT(*) FROM ticket_data t WHERE t.upload_batch_id = b.batch_id)
                FROM upload_batches b";
    let rows: Vec<(String, String, u32, i32, NaiveDateTime, i64)> = match period {
        Some(p) => {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE b.processing_month = ?1 AND b.processing_year = ?2
                 ORDER BY b.uploaded_at DESC",
                base
            ))?;
            let rows = stmt
                .query_map(params![p.month, p.year], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!("{} ORDER BY b.uploaded_at DESC", base))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    rows.into_iter()
        .map(|(batch_id, filename, month, year, upload_time, record_count)| {
            let clients = batch_clients(conn, &batch_id)?;
            Ok(UploadBatch {
                batch_id,
                filename,
                month,
                year,
                period: format!("{:02}/{}", month, year),
                record_count,
                upload_time,
                clients,
            })
        })
        .collect()
}

pub fn find_batch(conn: &Connection, batch_id: &str) -> Result<Option<UploadBatch>, AppError> {
    Ok(list_batches(conn, None)?
        .into_iter()
        .find(|batch| batch.batch_id == batch_id))
}

/// Deletes a batch and its tickets. `None` when the batch is unknown.
pub fn delete_batch(conn: &mut Connection, batch_id: &str) -> Result<Option<UploadBatch>, AppError> {
    let Some(batch) = find_batch(conn, batch_id)? else {
        return Ok(None);
    };
    let tx = conn.transaction()?;
    let deleted = tx.execute("DELETE FROM ticket_data WHERE upload_batch_id = ?1", [batch_id])?;
    tx.execute("DELETE FROM upload_batches WHERE batch_id = ?1", [batch_id])?;
    tx.commit()?;
    info!("Deleted batch {} ({} tickets)", batch_id, deleted);
    Ok(Some(batch))
}

pub fn total_tickets(conn: &Connection) -> Result<i64, AppError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM ticket_data", [], |row| row.get(0))?)
}

pub fn total_batches(conn: &Connection) -> Result<i64, AppError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM upload_batches", [], |row| row.get(0))?)
}

/// Oldest and newest periods holding any ticket.
pub fn period_bounds(conn: &Connection) -> Result<Option<(Period, Period)>, AppError> {
    let bounds: Option<(Option<i64>, Option<i64>)> = conn
        .query_row(
            "SELECT MIN(processing_year * 12 + processing_month - 1),
                    MAX(processing_year * 12 + processing_month - 1)
             FROM ticket_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(match bounds {
        Some((Some(oldest), Some(newest))) => {
            Some((Period::from_ordinal(oldest), Period::from_ordinal(newest)))
        }
        _ => None,
    })
}
