// src/analytics.rs
use chrono::{Datelike, NaiveDateTime, Weekday};
use rusqlite::Connection;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::billing;
use crate::error::AppError;
use crate::models::{add_to, checked_sum, out_of_range, Period, Technician, Ticket};
use crate::ticket_store;

const MAX_INTENSITY: usize = 10;
const TOP_LIMIT: usize = 10;

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        round2(numerator / denominator)
    }
}

// --- Period statistics ---

#[derive(Debug, Clone, Serialize)]
pub struct GeneralStatistics {
    pub total_tickets: usize,
    pub unique_clients: usize,
    pub unique_technicians: usize,
    pub total_hours: Decimal,
    pub total_external_services: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodStatistics {
    pub period: Period,
    pub general: GeneralStatistics,
    pub hours_by_client: BTreeMap<String, Decimal>,
    pub hours_by_technician: BTreeMap<String, Decimal>,
    pub external_services_by_technician: BTreeMap<String, usize>,
    pub tickets_by_technician: BTreeMap<String, usize>,
    pub unique_clients_by_technician: BTreeMap<String, usize>,
    pub primary_categories: BTreeMap<String, usize>,
    pub secondary_categories: BTreeMap<String, usize>,
}

pub fn period_statistics(period: Period, tickets: &[Ticket]) -> Result<PeriodStatistics, AppError> {
    if tickets.is_empty() {
        return Err(AppError::NotFound(
            "Nenhum dado encontrado para o período especificado".to_string(),
        ));
    }

    let mut hours_by_client: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut hours_by_technician: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut external_services_by_technician: BTreeMap<String, usize> = BTreeMap::new();
    let mut tickets_by_technician: BTreeMap<String, usize> = BTreeMap::new();
    let mut clients_by_technician: BTreeMap<String, BTreeSet<Option<String>>> = BTreeMap::new();
    let mut primary_categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut secondary_categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut clients = BTreeSet::new();
    let mut total_hours = Decimal::ZERO;
    let mut total_external_services = 0;

    for ticket in tickets {
        let t = &ticket.fields;
        add_to(&mut total_hours, t.total_service_time, "horas totais")?;
        clients.insert(t.client_name.clone());
        if t.is_external() {
            total_external_services += 1;
        }
        if let Some(client) = &t.client_name {
            add_to(
                hours_by_client.entry(client.clone()).or_default(),
                t.total_service_time,
                "horas por cliente",
            )?;
        }
        if let Some(tech) = &t.technician {
            add_to(
                hours_by_technician.entry(tech.clone()).or_default(),
                t.total_service_time,
                "horas por técnico",
            )?;
            *tickets_by_technician.entry(tech.clone()).or_default() += 1;
            if t.is_external() {
                *external_services_by_technician.entry(tech.clone()).or_default() += 1;
            }
            clients_by_technician
                .entry(tech.clone())
                .or_default()
                .insert(t.client_name.clone());
        }
        if let Some(category) = &t.primary_category {
            *primary_categories.entry(category.clone()).or_default() += 1;
        }
        if let Some(category) = &t.secondary_category {
            *secondary_categories.entry(category.clone()).or_default() += 1;
        }
    }

    Ok(PeriodStatistics {
        period,
        general: GeneralStatistics {
            total_tickets: tickets.len(),
            unique_clients: clients.len(),
            unique_technicians: hours_by_technician.len(),
            total_hours: round2(total_hours),
            total_external_services,
        },
        hours_by_client: hours_by_client.into_iter().map(|(k, v)| (k, round2(v))).collect(),
        hours_by_technician: hours_by_technician
            .into_iter()
            .map(|(k, v)| (k, round2(v)))
            .collect(),
        external_services_by_technician,
        tickets_by_technician,
        unique_clients_by_technician: clients_by_technician
            .into_iter()
            .map(|(k, v)| (k, v.len()))
            .collect(),
        primary_categories,
        secondary_categories,
    })
}

// --- Heatmap ---

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapTicket {
    pub ticket_id: Option<String>,
    pub client_name: Option<String>,
    pub technician: Option<String>,
    pub total_service_time: Decimal,
    pub date: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapDay {
    pub day: u32,
    pub date: NaiveDateTime,
    pub weekday: String,
    pub weekday_short: String,
    pub is_weekday: bool,
    pub ticket_count: usize,
    pub total_hours: Decimal,
    pub tickets: Vec<HeatmapTicket>,
    pub intensity: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HeatmapStatistics {
    pub total_tickets: usize,
    pub total_hours: Decimal,
    pub max_tickets_per_day: usize,
    pub avg_tickets_per_day: Decimal,
    pub working_days: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
    pub heatmap_data: Vec<HeatmapDay>,
    pub statistics: HeatmapStatistics,
    pub period: String,
}

fn is_weekday(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// One cell per calendar day, keyed by each ticket's activity date.
pub fn heatmap(period: Period, tickets: &[Ticket]) -> Result<Heatmap, AppError> {
    if tickets.is_empty() {
        return Ok(Heatmap {
            heatmap_data: Vec::new(),
            statistics: HeatmapStatistics::default(),
            period: period.label(),
        });
    }

    let mut by_day: BTreeMap<u32, (usize, Decimal, Vec<HeatmapTicket>)> = BTreeMap::new();
    for ticket in tickets {
        let date = ticket.activity_date();
        let entry = by_day.entry(date.day()).or_default();
        entry.0 += 1;
        add_to(&mut entry.1, ticket.fields.total_service_time, "horas do dia")?;
        entry.2.push(HeatmapTicket {
            ticket_id: ticket.fields.ticket_id.clone(),
            client_name: ticket.fields.client_name.clone(),
            technician: ticket.fields.technician.clone(),
            total_service_time: ticket.fields.total_service_time,
            date,
        });
    }

    let first = period.first_day();
    let heatmap_data: Vec<HeatmapDay> = first
        .iter_days()
        .take(period.days_in_month() as usize)
        .map(|date| {
            let (count, hours, day_tickets) = by_day.remove(&date.day()).unwrap_or_default();
            HeatmapDay {
                day: date.day(),
                date: date.and_hms_opt(0, 0, 0).unwrap_or_default(),
                weekday: date.format("%A").to_string(),
                weekday_short: date.format("%a").to_string(),
                is_weekday: is_weekday(date.weekday()),
                ticket_count: count,
                total_hours: round2(hours),
                tickets: day_tickets,
                intensity: count.min(MAX_INTENSITY),
            }
        })
        .collect();

    // Days past the end of the month still count towards the totals.
    let overflow_count: usize = by_day.values().map(|(c, _, _)| *c).sum();

    let total_tickets: usize =
        heatmap_data.iter().map(|d| d.ticket_count).sum::<usize>() + overflow_count;
    let total_hours = checked_sum(tickets.iter().map(|t| t.fields.total_service_time), "horas totais")?;
    let max_tickets_per_day = heatmap_data
        .iter()
        .map(|d| d.ticket_count)
        .chain(by_day.values().map(|(c, _, _)| *c))
        .max()
        .unwrap_or(0);
    let weekdays = heatmap_data.iter().filter(|d| d.is_weekday).count();
    let working_days = heatmap_data
        .iter()
        .filter(|d| d.is_weekday && d.ticket_count > 0)
        .count();

    Ok(Heatmap {
        statistics: HeatmapStatistics {
            total_tickets,
            total_hours: round2(total_hours),
            max_tickets_per_day,
            avg_tickets_per_day: ratio(Decimal::from(total_tickets), Decimal::from(weekdays)),
            working_days,
        },
        heatmap_data,
        period: period.label(),
    })
}

// --- Technicians ---

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianPerformanceRow {
    pub technician: String,
    pub ticket_count: usize,
    pub total_hours: Decimal,
    pub avg_hours_per_ticket: Decimal,
    pub external_services_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianPerformance {
    pub performance_data: Vec<TechnicianPerformanceRow>,
    pub period: String,
}

pub fn technician_performance(
    period: Period,
    tickets: &[Ticket],
) -> Result<TechnicianPerformance, AppError> {
    let mut by_tech: HashMap<&str, (usize, Decimal, usize)> = HashMap::new();
    for ticket in tickets {
        if let Some(tech) = ticket.fields.technician.as_deref() {
            let entry = by_tech.entry(tech).or_default();
            entry.0 += 1;
            add_to(&mut entry.1, ticket.fields.total_service_time, "horas por técnico")?;
            if ticket.fields.is_external() {
                entry.2 += 1;
            }
        }
    }

    let mut performance_data: Vec<TechnicianPerformanceRow> = by_tech
        .into_iter()
        .map(|(tech, (count, hours, external))| TechnicianPerformanceRow {
            technician: tech.to_string(),
            ticket_count: count,
            total_hours: round2(hours),
            avg_hours_per_ticket: ratio(hours, Decimal::from(count)),
            external_services_count: external,
        })
        .collect();
    performance_data.sort_by(|a, b| {
        b.ticket_count
            .cmp(&a.ticket_count)
            .then_with(|| a.technician.cmp(&b.technician))
    });

    Ok(TechnicianPerformance {
        performance_data,
        period: period.label(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianSummary {
    pub ticket_count: usize,
    pub total_hours: Decimal,
    pub avg_hours_per_ticket: Decimal,
    pub external_services_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianTicket {
    pub ticket_id: Option<String>,
    pub client_name: Option<String>,
    pub subject: Option<String>,
    pub total_service_time: Decimal,
    pub status: Option<String>,
    pub external_service: bool,
    pub created_at: NaiveDateTime,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianDetails {
    pub technician: String,
    pub period: String,
    pub summary: TechnicianSummary,
    pub tickets: Vec<TechnicianTicket>,
}

pub fn technician_details(
    technician: &str,
    period: Period,
    mut tickets: Vec<Ticket>,
) -> Result<TechnicianDetails, AppError> {
    tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    let total_hours = checked_sum(tickets.iter().map(|t| t.fields.total_service_time), "horas do técnico")?;
    let count = tickets.len();

    Ok(TechnicianDetails {
        technician: technician.to_string(),
        period: period.label(),
        summary: TechnicianSummary {
            ticket_count: count,
            total_hours: round2(total_hours),
            avg_hours_per_ticket: ratio(total_hours, Decimal::from(count)),
            external_services_count: tickets.iter().filter(|t| t.fields.is_external()).count(),
        },
        tickets: tickets
            .into_iter()
            .map(|t| TechnicianTicket {
                external_service: t.fields.is_external(),
                ticket_id: t.fields.ticket_id,
                client_name: t.fields.client_name,
                subject: t.fields.subject,
                total_service_time: t.fields.total_service_time,
                status: t.fields.status,
                created_at: t.created_at,
                category: t.fields.primary_category,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TechnicianMonthlyStats {
    pub total_tickets: usize,
    pub total_hours: Decimal,
    pub external_services: usize,
    pub clients_served: usize,
    pub efficiency: Decimal,
    pub target_achievement: Decimal,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tickets: Vec<Ticket>,
}

/// Hours worked against the technician's monthly target.
pub fn technician_monthly_stats(
    technician: &Technician,
    tickets: Vec<Ticket>,
) -> Result<TechnicianMonthlyStats, AppError> {
    let total_hours = checked_sum(tickets.iter().map(|t| t.fields.total_service_time), "horas do técnico")?;
    let efficiency = if technician.monthly_hours_target > Decimal::ZERO {
        total_hours
            .checked_div(technician.monthly_hours_target)
            .and_then(|ratio| ratio.checked_mul(dec!(100)))
            .ok_or_else(|| out_of_range("eficiência"))?
    } else {
        Decimal::ZERO
    };
    let clients_served = tickets
        .iter()
        .filter_map(|t| t.fields.client_name.as_deref())
        .collect::<BTreeSet<_>>()
        .len();

    Ok(TechnicianMonthlyStats {
        total_tickets: tickets.len(),
        total_hours: round2(total_hours),
        external_services: tickets.iter().filter(|t| t.fields.is_external()).count(),
        clients_served,
        efficiency: round2(efficiency),
        target_achievement: round2(efficiency.min(dec!(100))),
        tickets,
    })
}

// --- Charts ---

#[derive(Debug, Clone, Serialize)]
pub struct ClientChartRow {
    pub client_name: String,
    pub ticket_count: usize,
    pub total_hours: Decimal,
    pub external_services: usize,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryChartRow {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyChartRow {
    pub day: u32,
    pub date: NaiveDateTime,
    pub ticket_count: usize,
    pub total_hours: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Charts {
    pub client_data: Vec<ClientChartRow>,
    pub category_data: Vec<CategoryChartRow>,
    pub daily_data: Vec<DailyChartRow>,
    pub period: String,
}

pub fn charts(conn: &Connection, period: Period) -> Result<Charts, AppError> {
    let tickets = ticket_store::tickets_for_period(conn, period)?;
    let billed: HashMap<String, Decimal> = billing::period_billing(conn, period)?
        .clients
        .into_iter()
        .map(|c| (c.client_name, c.total_value))
        .collect();

    let mut by_client: BTreeMap<String, (usize, Decimal, usize)> = BTreeMap::new();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for ticket in &tickets {
        if let Some(client) = &ticket.fields.client_name {
            let entry = by_client.entry(client.clone()).or_default();
            entry.0 += 1;
            add_to(&mut entry.1, ticket.fields.total_service_time, "horas por cliente")?;
            if ticket.fields.is_external() {
                entry.2 += 1;
            }
        }
        if let Some(category) = &ticket.fields.primary_category {
            *by_category.entry(category.clone()).or_default() += 1;
        }
    }

    let mut client_data: Vec<ClientChartRow> = by_client
        .into_iter()
        .map(|(client_name, (count, hours, external))| ClientChartRow {
            total_value: billed.get(&client_name).copied().unwrap_or_default(),
            client_name,
            ticket_count: count,
            total_hours: round2(hours),
            external_services: external,
        })
        .collect();
    client_data.sort_by(|a, b| b.total_hours.cmp(&a.total_hours));

    let mut category_data: Vec<CategoryChartRow> = by_category
        .into_iter()
        .map(|(category, count)| CategoryChartRow { category, count })
        .collect();
    category_data.sort_by(|a, b| b.count.cmp(&a.count));

    let daily_data = heatmap(period, &tickets)?
        .heatmap_data
        .into_iter()
        .map(|d| DailyChartRow {
            day: d.day,
            date: d.date,
            ticket_count: d.ticket_count,
            total_hours: d.total_hours,
        })
        .collect();

    Ok(Charts {
        client_data,
        category_data,
        daily_data,
        period: period.label(),
    })
}

// --- Admin ---

#[derive(Debug, Clone, Serialize)]
pub struct TopEntry {
    pub name: String,
    pub ticket_count: usize,
    pub total_hours: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminStatistics {
    pub total_tickets: usize,
    pub oldest_period: Option<Period>,
    pub newest_period: Option<Period>,
    pub top_clients: Vec<TopEntry>,
    pub top_technicians: Vec<TopEntry>,
}

fn top_by<'a>(
    names: impl Iterator<Item = (Option<&'a str>, Decimal)>,
) -> Result<Vec<TopEntry>, AppError> {
    let mut acc: HashMap<&str, (usize, Decimal)> = HashMap::new();
    for (name, hours) in names {
        if let Some(name) = name {
            let entry = acc.entry(name).or_default();
            entry.0 += 1;
            add_to(&mut entry.1, hours, "horas acumuladas")?;
        }
    }
    let mut entries: Vec<TopEntry> = acc
        .into_iter()
        .map(|(name, (count, hours))| TopEntry {
            name: name.to_string(),
            ticket_count: count,
            total_hours: round2(hours),
        })
        .collect();
    entries.sort_by(|a, b| b.ticket_count.cmp(&a.ticket_count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(TOP_LIMIT);
    Ok(entries)
}

pub fn admin_statistics(conn: &Connection) -> Result<AdminStatistics, AppError> {
    let tickets = ticket_store::all_tickets(conn)?;
    let bounds = ticket_store::period_bounds(conn)?;
    Ok(AdminStatistics {
        total_tickets: tickets.len(),
        oldest_period: bounds.map(|(oldest, _)| oldest),
        newest_period: bounds.map(|(_, newest)| newest),
        top_clients: top_by(
            tickets
                .iter()
                .map(|t| (t.fields.client_name.as_deref(), t.fields.total_service_time)),
        )?,
        top_technicians: top_by(
            tickets
                .iter()
                .map(|t| (t.fields.technician.as_deref(), t.fields.total_service_time)),
        )?,
    })
}
