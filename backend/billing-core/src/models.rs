// src/models.rs
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

use crate::error::AppError;

// --- Contract defaults for newly registered clients ---
pub const DEFAULT_CONTRACT_HOURS: Decimal = dec!(10.0);
pub const DEFAULT_HOURLY_RATE: Decimal = dec!(100.0);
pub const DEFAULT_OVERTIME_RATE: Decimal = dec!(115.0);
pub const DEFAULT_EXTERNAL_SERVICE_RATE: Decimal = dec!(88.0);

// --- Technician targets ---
pub const DEFAULT_MONTHLY_HOURS_TARGET: Decimal = dec!(160.0);
pub const DEFAULT_EFFICIENCY_TARGET: Decimal = dec!(85.0);

// --- Input bounds ---
/// Largest rate, contract size or target accepted for a client or technician.
pub const MAX_AMOUNT: Decimal = dec!(1000000);
/// Largest service time accepted for a single ticket, in hours.
pub const MAX_TICKET_HOURS: Decimal = dec!(10000);

// --- Checked arithmetic ---

pub fn out_of_range(what: &str) -> AppError {
    AppError::BadRequest(format!("Valor fora do intervalo ao calcular {}", what))
}

/// Adds up `values`, reporting `Decimal` overflow instead of panicking.
pub fn checked_sum<I>(values: I, what: &str) -> Result<Decimal, AppError>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
        .ok_or_else(|| out_of_range(what))
}

/// `*acc += value` for running totals.
pub fn add_to(acc: &mut Decimal, value: Decimal, what: &str) -> Result<(), AppError> {
    *acc = acc.checked_add(value).ok_or_else(|| out_of_range(what))?;
    Ok(())
}

// --- Period ---

/// A billing period. All reporting is keyed by (month, year).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(month: u32, year: i32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::BadRequest(format!(
                "Mês inválido: {} (esperado 1-12)",
                month
            )));
        }
        if !(1900..=9999).contains(&year) {
            return Err(AppError::BadRequest(format!("Ano inválido: {}", year)));
        }
        Ok(Self { year, month })
    }

    pub fn label(&self) -> String {
        format!("{:02}/{}", self.month, self.year)
    }

    pub fn first_day(&self) -> NaiveDate {
        // Validated in `new`, so the first of the month always exists.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn days_in_month(&self) -> u32 {
        let next_first = if self.month == 12 {
            NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(self.year, self.month + 1, 1)
        };
        next_first
            .map(|next| (next - self.first_day()).num_days() as u32)
            .unwrap_or(31)
    }

    /// Months since year 0, used to order periods in a single integer.
    pub fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    pub fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: (ordinal.rem_euclid(12) + 1) as u32,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// --- Client ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub contact: Option<String>,
    pub sector: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_contact: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub contract_hours: Decimal,
    pub hourly_rate: Decimal,
    pub overtime_rate: Decimal,
    pub external_service_rate: Decimal,
    pub active: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewClient {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub sector: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_contact: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub contract_hours: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub hourly_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub overtime_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub external_service_rate: Option<Decimal>,
    pub active: Option<bool>,
}

impl NewClient {
    /// A client registered from ticket data with the default contract.
    pub fn from_ticket_name(name: &str, contact: Option<String>, sector: Option<String>) -> Self {
        Self {
            name: Some(name.trim().to_string()),
            contact,
            sector,
            ..Default::default()
        }
    }
}

/// Partial update. Text fields distinguish "absent" (`None`) from an explicit
/// `null` (`Some(None)`), which clears the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub contact: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub sector: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub whatsapp_contact: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub contract_hours: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub hourly_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub overtime_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub external_service_rate: Option<Decimal>,
    pub active: Option<bool>,
}

// --- Technician ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Technician {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub monthly_hours_target: Decimal,
    pub efficiency_target: Decimal,
    pub active: bool,
    pub hire_date: Option<NaiveDateTime>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTechnician {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub monthly_hours_target: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub efficiency_target: Option<Decimal>,
    pub hire_date: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TechnicianUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub department: Option<Option<String>>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub monthly_hours_target: Option<Decimal>,
    #[serde(default, deserialize_with = "flexible_decimal")]
    pub efficiency_target: Option<Decimal>,
    pub hire_date: Option<String>,
    pub active: Option<bool>,
}

/// Accepts `2024-03-01`, `2024-03-01T08:00:00` or `2024-03-01 08:00:00`.
pub fn parse_iso_datetime(value: &str) -> Result<NaiveDateTime, AppError> {
    let trimmed = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        .map_err(|_| AppError::BadRequest("Formato de data inválido".to_string()))
}

// --- Tickets ---

/// The ticket columns carried over from a helpdesk export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketFields {
    pub ticket_id: Option<String>,
    pub client_name: Option<String>,
    pub subject: Option<String>,
    pub technician: Option<String>,
    pub primary_category: Option<String>,
    pub secondary_category: Option<String>,
    pub contact: Option<String>,
    pub arrival_date: Option<NaiveDateTime>,
    pub departure_date: Option<NaiveDateTime>,
    pub completion_date: Option<NaiveDateTime>,
    pub workstation: Option<String>,
    pub pause_reason: Option<String>,
    pub sector: Option<String>,
    pub status: Option<String>,
    pub ticket_type: Option<String>,
    pub service: Option<String>,
    pub description: Option<String>,
    pub business_hours: Option<bool>,
    pub external_service: Option<bool>,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    /// Hours.
    pub total_service_time: Decimal,
}

impl TicketFields {
    pub fn is_external(&self) -> bool {
        self.external_service == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: i64,
    #[serde(flatten)]
    pub fields: TicketFields,
    pub processing_month: u32,
    pub processing_year: i32,
    pub upload_batch_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Ticket {
    /// The day a ticket is attributed to on the activity heatmap.
    pub fn activity_date(&self) -> NaiveDateTime {
        self.fields
            .arrival_date
            .or(self.fields.start_date)
            .unwrap_or(self.created_at)
    }
}

// --- Periods and upload batches ---

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub month: u32,
    pub year: i32,
    pub label: String,
    pub total_tickets: i64,
    pub total_clients: i64,
    pub first_upload: Option<NaiveDateTime>,
    pub last_update: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadBatch {
    pub batch_id: String,
    pub filename: String,
    pub month: u32,
    pub year: i32,
    pub period: String,
    pub record_count: i64,
    pub upload_time: NaiveDateTime,
    pub clients: Vec<String>,
}

// --- Serde helpers ---

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Dashboard forms post rates either as JSON numbers or as the raw input
/// string; both are accepted.
fn flexible_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Int(i)) => Ok(Some(Decimal::from(i))),
        // Shortest round-trip text of the float, so 120.1 stays 120.1.
        Some(NumberOrString::Float(f)) => Decimal::from_str(&f.to_string())
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid number: {}", f))),
        Some(NumberOrString::Text(s)) => Decimal::from_str(s.trim().replace(',', ".").as_str())
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid number: {}", s))),
    }
}
