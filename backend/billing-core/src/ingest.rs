// src/ingest.rs
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use rust_decimal_macros::dec;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, BTreeSet},
    io::Cursor,
    str::FromStr,
};
use tracing::{debug, info, warn};

use crate::client_store;
use crate::db::Database;
use crate::error::AppError;
use crate::models::{add_to, checked_sum, out_of_range, Period, TicketFields, MAX_TICKET_HOURS};
use crate::ticket_store::{self, NewBatch};

const SERVICE_TIME: &str = "tempo total de atendimento";
/// Upload statistics report hours to the cent of an hour; stored hours are exact.
const SUMMARY_HOURS_DP: u32 = 2;
const BATCH_ID_LEN: usize = 16;

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.?\d*").expect("valid regex"));
static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+)D)?T?(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?$")
        .expect("valid regex")
});

/// Export columns and the ticket field each one fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    TicketId,
    ClientName,
    Subject,
    Technician,
    PrimaryCategory,
    SecondaryCategory,
    Contact,
    ArrivalDate,
    DepartureDate,
    CompletionDate,
    Workstation,
    PauseReason,
    Sector,
    Status,
    TicketType,
    Service,
    Description,
    BusinessHours,
    ExternalService,
    StartDate,
    EndDate,
    TotalServiceTime,
}

const COLUMN_MAP: &[(&str, Column)] = &[
    ("Ticket", Column::TicketId),
    ("Cliente", Column::ClientName),
    ("Assunto", Column::Subject),
    ("Técnico", Column::Technician),
    ("Categoria primária", Column::PrimaryCategory),
    ("Categoria secundária", Column::SecondaryCategory),
    ("contato", Column::Contact),
    ("Data chegada", Column::ArrivalDate),
    ("Data saida", Column::DepartureDate),
    ("Data de finalização", Column::CompletionDate),
    ("Mesa de trabalho", Column::Workstation),
    ("Motivo de pausa do ticket", Column::PauseReason),
    ("setor", Column::Sector),
    ("Status", Column::Status),
    ("Tipo de ticket", Column::TicketType),
    ("Atendimento", Column::Service),
    ("Descrição", Column::Description),
    ("Atendimento em horário comercial?", Column::BusinessHours),
    ("Atendimento externo?", Column::ExternalService),
    ("Data inicial", Column::StartDate),
    ("Data final", Column::EndDate),
    ("Tempo total de atendimento", Column::TotalServiceTime),
];

fn column_for_header(header: &str) -> Option<Column> {
    let header = header.trim();
    COLUMN_MAP
        .iter()
        .find(|(name, _)| *name == header)
        .map(|(_, column)| *column)
}

// --- Cell conversions ---

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Shortest decimal that prints like `value`; `None` when it does not fit a `Decimal`.
fn decimal_from_f64(value: f64) -> Option<Decimal> {
    Decimal::from_str(&value.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(value))
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Excel serial day number (1900 system) to a timestamp, rounded to the second.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::seconds(seconds))
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

pub fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn cell_datetime(cell: &Data) -> Option<NaiveDateTime> {
    match cell {
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()),
        Data::Float(f) => excel_serial_to_datetime(*f),
        Data::Int(i) => excel_serial_to_datetime(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_date_text(s),
        _ => None,
    }
}

/// Hours from `H:MM[:SS]`, a plain number, or the first number in free text.
/// Unreadable text counts as zero hours; only arithmetic overflow is an error.
pub fn convert_time_to_hours(text: &str) -> Result<Decimal, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Decimal::ZERO);
    }

    if text.contains(':') {
        let parts: Option<Vec<Decimal>> = text
            .split(':')
            .map(|p| Decimal::from_str(p.trim()).ok())
            .collect();
        if let Some(parts) = parts {
            let hours = parts.first().copied().unwrap_or_default();
            let minutes = parts.get(1).copied().unwrap_or_default();
            let seconds = parts.get(2).copied().unwrap_or_default();
            return checked_sum([hours, minutes / dec!(60), seconds / dec!(3600)], SERVICE_TIME);
        }
    }

    if let Ok(value) = Decimal::from_str(&text.replace(',', ".")) {
        return Ok(value);
    }

    Ok(FIRST_NUMBER
        .find(text)
        .and_then(|m| Decimal::from_str(m.as_str()).ok())
        .unwrap_or(Decimal::ZERO))
}

fn iso_duration_hours(text: &str) -> Result<Decimal, AppError> {
    let Some(caps) = ISO_DURATION.captures(text.trim()) else {
        return Ok(Decimal::ZERO);
    };
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| Decimal::from_str(m.as_str()).ok())
            .unwrap_or_default()
    };
    let days = part(1)
        .checked_mul(dec!(24))
        .ok_or_else(|| out_of_range(SERVICE_TIME))?;
    checked_sum(
        [days, part(2), part(3) / dec!(60), part(4) / dec!(3600)],
        SERVICE_TIME,
    )
}

/// Time cells are fractions of a day. Snapping to whole seconds undoes the
/// binary noise of the float, so a `[h]:mm` cell of 1:30 reads as exactly 1.5.
fn day_fraction_hours(days: f64) -> Result<Decimal, AppError> {
    let seconds = Decimal::from_f64((days * 86_400.0).round())
        .ok_or_else(|| out_of_range(SERVICE_TIME))?;
    Ok(seconds / dec!(3600))
}

fn cell_hours(cell: &Data) -> Result<Decimal, AppError> {
    let hours = match cell {
        Data::Int(i) => Decimal::from(*i),
        Data::Float(f) => decimal_from_f64(*f).ok_or_else(|| out_of_range(SERVICE_TIME))?,
        Data::DateTime(dt) => day_fraction_hours(dt.as_f64())?,
        Data::DurationIso(s) => iso_duration_hours(s)?,
        Data::String(s) => convert_time_to_hours(s)?,
        _ => Decimal::ZERO,
    };
    if hours.abs() > MAX_TICKET_HOURS {
        return Err(out_of_range(SERVICE_TIME));
    }
    Ok(hours)
}

pub fn convert_to_boolean(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "sim" | "yes" | "true" | "1" | "verdadeiro" => Some(true),
        "não" | "nao" | "no" | "false" | "0" | "falso" => Some(false),
        _ => None,
    }
}

fn cell_bool(cell: &Data) -> Option<bool> {
    match cell {
        Data::Bool(b) => Some(*b),
        Data::Int(i) => Some(*i != 0),
        Data::Float(f) => Some(*f != 0.0),
        Data::String(s) => convert_to_boolean(s),
        _ => None,
    }
}

fn apply_cell(ticket: &mut TicketFields, column: Column, cell: &Data) -> Result<(), AppError> {
    match column {
        Column::TicketId => ticket.ticket_id = cell_text(cell),
        Column::ClientName => ticket.client_name = cell_text(cell),
        Column::Subject => ticket.subject = cell_text(cell),
        Column::Technician => ticket.technician = cell_text(cell),
        Column::PrimaryCategory => ticket.primary_category = cell_text(cell),
        Column::SecondaryCategory => ticket.secondary_category = cell_text(cell),
        Column::Contact => ticket.contact = cell_text(cell),
        Column::ArrivalDate => ticket.arrival_date = cell_datetime(cell),
        Column::DepartureDate => ticket.departure_date = cell_datetime(cell),
        Column::CompletionDate => ticket.completion_date = cell_datetime(cell),
        Column::Workstation => ticket.workstation = cell_text(cell),
        Column::PauseReason => ticket.pause_reason = cell_text(cell),
        Column::Sector => ticket.sector = cell_text(cell),
        Column::Status => ticket.status = cell_text(cell),
        Column::TicketType => ticket.ticket_type = cell_text(cell),
        Column::Service => ticket.service = cell_text(cell),
        Column::Description => ticket.description = cell_text(cell),
        Column::BusinessHours => ticket.business_hours = cell_bool(cell),
        Column::ExternalService => ticket.external_service = cell_bool(cell),
        Column::StartDate => ticket.start_date = cell_datetime(cell),
        Column::EndDate => ticket.end_date = cell_datetime(cell),
        Column::TotalServiceTime => ticket.total_service_time = cell_hours(cell)?,
    }
    Ok(())
}

// --- Workbook parsing ---

/// Reads the first worksheet of an .xlsx/.xls export into ticket rows.
pub fn parse_workbook(bytes: &[u8]) -> Result<Vec<TicketFields>, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::Spreadsheet(format!("arquivo ilegível ({})", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::Spreadsheet("a planilha não contém abas".to_string()))?
        .map_err(|e| AppError::Spreadsheet(format!("falha ao ler a primeira aba ({})", e)))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| AppError::Spreadsheet("planilha vazia".to_string()))?;

    let columns: Vec<Option<Column>> = header
        .iter()
        .map(|cell| cell_text(cell).and_then(|h| column_for_header(&h)))
        .collect();
    if columns.iter().all(Option::is_none) {
        return Err(AppError::Spreadsheet(
            "nenhuma coluna reconhecida no cabeçalho".to_string(),
        ));
    }
    debug!(
        "Mapped {} of {} header columns",
        columns.iter().filter(|c| c.is_some()).count(),
        columns.len()
    );

    let mut tickets = Vec::new();
    let mut skipped = 0usize;
    // Sheet row numbers are 1-based and the header takes the first one.
    for (row_number, row) in (2..).zip(rows) {
        if row.iter().all(is_blank) {
            skipped += 1;
            continue;
        }
        let mut ticket = TicketFields::default();
        for (cell, column) in row.iter().zip(columns.iter()) {
            if let Some(column) = column {
                apply_cell(&mut ticket, *column, cell)
                    .map_err(|e| AppError::Spreadsheet(format!("{} (linha {})", e, row_number)))?;
            }
        }
        tickets.push(ticket);
    }
    if skipped > 0 {
        debug!("Skipped {} empty rows", skipped);
    }
    Ok(tickets)
}

/// Month/year of the most recent completion date.
pub fn infer_period(tickets: &[TicketFields]) -> Option<Period> {
    let latest = tickets.iter().filter_map(|t| t.completion_date).max()?;
    Period::new(latest.month(), latest.year()).ok()
}

/// Explicit month/year win over inference, each independently.
pub fn resolve_period(
    tickets: &[TicketFields],
    month: Option<u32>,
    year: Option<i32>,
) -> Result<Period, AppError> {
    let inferred = infer_period(tickets);
    let month = month.or(inferred.map(|p| p.month));
    let year = year.or(inferred.map(|p| p.year));
    match (month, year) {
        (Some(month), Some(year)) => Period::new(month, year),
        _ => Err(AppError::BadRequest(
            "Não foi possível determinar o período (mês/ano) do arquivo".to_string(),
        )),
    }
}

pub fn batch_id(bytes: &[u8], uploaded_at: NaiveDateTime) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.update(uploaded_at.and_utc().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(BATCH_ID_LEN);
    id
}

// --- Upload statistics ---

#[derive(Debug, Clone, Default, Serialize)]
pub struct TechnicianUploadDetail {
    pub total_hours: Decimal,
    pub total_tickets: usize,
    pub external_services: usize,
    pub unique_clients: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadStatistics {
    pub total_tickets: usize,
    pub unique_clients: usize,
    pub unique_technicians: usize,
    pub total_hours: Decimal,
    pub hours_by_client: BTreeMap<String, Decimal>,
    pub hours_by_technician: BTreeMap<String, Decimal>,
    pub external_services_by_client: BTreeMap<String, usize>,
    pub external_services_by_technician: BTreeMap<String, usize>,
    pub primary_categories: BTreeMap<String, usize>,
    pub secondary_categories: BTreeMap<String, usize>,
    pub technician_details: BTreeMap<String, TechnicianUploadDetail>,
}

pub fn upload_statistics(tickets: &[TicketFields]) -> Result<UploadStatistics, AppError> {
    let mut stats = UploadStatistics {
        total_tickets: tickets.len(),
        ..Default::default()
    };
    let mut clients_by_tech: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for t in tickets {
        let hours = t.total_service_time;
        add_to(&mut stats.total_hours, hours, "horas totais")?;

        if let Some(client) = &t.client_name {
            add_to(
                stats.hours_by_client.entry(client.clone()).or_default(),
                hours,
                "horas por cliente",
            )?;
            if t.is_external() {
                *stats.external_services_by_client.entry(client.clone()).or_default() += 1;
            }
        }
        if let Some(category) = &t.primary_category {
            *stats.primary_categories.entry(category.clone()).or_default() += 1;
        }
        if let Some(category) = &t.secondary_category {
            *stats.secondary_categories.entry(category.clone()).or_default() += 1;
        }
        if let Some(tech) = &t.technician {
            add_to(
                stats.hours_by_technician.entry(tech.clone()).or_default(),
                hours,
                "horas por técnico",
            )?;
            let detail = stats.technician_details.entry(tech.clone()).or_default();
            add_to(&mut detail.total_hours, hours, "horas por técnico")?;
            detail.total_tickets += 1;
            if t.is_external() {
                detail.external_services += 1;
                *stats
                    .external_services_by_technician
                    .entry(tech.clone())
                    .or_default() += 1;
            }
            let served = clients_by_tech.entry(tech.clone()).or_default();
            if let Some(client) = &t.client_name {
                served.insert(client.clone());
            }
        }
    }

    for (tech, clients) in clients_by_tech {
        if let Some(detail) = stats.technician_details.get_mut(&tech) {
            detail.unique_clients = clients.len();
        }
    }
    stats.unique_clients = stats.hours_by_client.len();
    stats.unique_technicians = stats.hours_by_technician.len();

    stats.total_hours = stats.total_hours.round_dp(SUMMARY_HOURS_DP);
    for hours in stats
        .hours_by_client
        .values_mut()
        .chain(stats.hours_by_technician.values_mut())
        .chain(stats.technician_details.values_mut().map(|d| &mut d.total_hours))
    {
        *hours = hours.round_dp(SUMMARY_HOURS_DP);
    }
    Ok(stats)
}

// --- Import ---

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
    pub month: u32,
    pub year: i32,
    pub batch_id: String,
    pub processed_records: usize,
    pub new_clients: Vec<String>,
    pub statistics: UploadStatistics,
}

/// Parses a workbook and replaces the tickets of its period. The new tickets and
/// any clients they introduce are committed together or not at all.
pub fn import_workbook(
    db: &Database,
    bytes: &[u8],
    filename: &str,
    month: Option<u32>,
    year: Option<i32>,
) -> Result<ImportOutcome, AppError> {
    let tickets = parse_workbook(bytes)?;
    if tickets.is_empty() {
        warn!("Upload '{}' contained no ticket rows", filename);
    }
    let period = resolve_period(&tickets, month, year)?;

    let uploaded_at = Local::now().naive_local();
    let batch = NewBatch {
        batch_id: batch_id(bytes, uploaded_at),
        filename: filename.to_string(),
        uploaded_at,
    };

    let statistics = upload_statistics(&tickets)?;

    let mut first_seen: Vec<(String, Option<String>, Option<String>)> = Vec::new();
    for t in &tickets {
        if let Some(name) = t.client_name.as_deref().map(str::trim) {
            if !name.is_empty() && !first_seen.iter().any(|(n, _, _)| n == name) {
                first_seen.push((name.to_string(), t.contact.clone(), t.sector.clone()));
            }
        }
    }

    let (stored, new_clients) = {
        let mut conn = db.lock();
        let tx = conn.transaction()?;
        let stored = ticket_store::replace_period(&tx, period, &batch, &tickets)?;
        let new_clients = client_store::register_missing(&tx, &first_seen)?;
        tx.commit()?;
        (stored, new_clients)
    };

    info!(
        "Imported '{}' into {}: {} tickets, {} new clients (batch {})",
        filename,
        period,
        stored,
        new_clients.len(),
        batch.batch_id
    );

    Ok(ImportOutcome {
        success: true,
        message: format!("Dados processados com sucesso para {}", period.label()),
        month: period.month,
        year: period.year,
        batch_id: batch.batch_id,
        processed_records: stored,
        new_clients,
        statistics,
    })
}
