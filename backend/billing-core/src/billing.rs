// src/billing.rs
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::client_store;
use crate::error::AppError;
use crate::models::{checked_sum, out_of_range, Client, Period, Ticket};
use crate::ticket_store;

const MONEY_DP: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rates {
    pub hourly_rate: Decimal,
    pub overtime_rate: Decimal,
    pub external_service_rate: Decimal,
}

/// One client's bill for one period.
#[derive(Debug, Clone, Serialize)]
pub struct ClientBilling {
    pub client_id: i64,
    pub client_name: String,
    pub month: u32,
    pub year: i32,
    pub total_hours: Decimal,
    pub contract_hours: Decimal,
    pub used_contract_hours: Decimal,
    pub overtime_hours: Decimal,
    pub external_services: usize,
    pub contract_value: Decimal,
    pub overtime_value: Decimal,
    pub external_services_value: Decimal,
    pub total_value: Decimal,
    pub rates: Rates,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingSummary {
    pub total_clients: usize,
    pub total_value: Decimal,
    pub total_hours: Decimal,
    pub total_overtime_hours: Decimal,
    pub total_external_services: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodBilling {
    pub month: u32,
    pub year: i32,
    pub clients: Vec<ClientBilling>,
    pub summary: BillingSummary,
}

/// Splits hours into contracted and overtime and prices each part.
/// Hours keep full precision until the amounts are rounded for output.
pub fn compute_billing(
    client: &Client,
    period: Period,
    tickets: Vec<Ticket>,
) -> Result<ClientBilling, AppError> {
    let total_hours = checked_sum(
        tickets.iter().map(|t| t.fields.total_service_time),
        "horas totais",
    )?;
    let external_services = tickets.iter().filter(|t| t.fields.is_external()).count();

    let used_contract_hours = total_hours.min(client.contract_hours);
    let overtime_hours = total_hours
        .checked_sub(client.contract_hours)
        .ok_or_else(|| out_of_range("horas excedentes"))?
        .max(Decimal::ZERO);

    let contract_value = used_contract_hours
        .checked_mul(client.hourly_rate)
        .ok_or_else(|| out_of_range("valor do contrato"))?;
    let overtime_value = overtime_hours
        .checked_mul(client.overtime_rate)
        .ok_or_else(|| out_of_range("valor excedente"))?;
    let external_services_value = Decimal::from(external_services)
        .checked_mul(client.external_service_rate)
        .ok_or_else(|| out_of_range("valor de atendimentos externos"))?;
    let total_value = checked_sum(
        [contract_value, overtime_value, external_services_value],
        "valor total",
    )?;

    Ok(ClientBilling {
        client_id: client.id,
        client_name: client.name.clone(),
        month: period.month,
        year: period.year,
        total_hours: total_hours.round_dp(MONEY_DP),
        contract_hours: client.contract_hours,
        used_contract_hours: used_contract_hours.round_dp(MONEY_DP),
        overtime_hours: overtime_hours.round_dp(MONEY_DP),
        external_services,
        contract_value: contract_value.round_dp(MONEY_DP),
        overtime_value: overtime_value.round_dp(MONEY_DP),
        external_services_value: external_services_value.round_dp(MONEY_DP),
        total_value: total_value.round_dp(MONEY_DP),
        rates: Rates {
            hourly_rate: client.hourly_rate,
            overtime_rate: client.overtime_rate,
            external_service_rate: client.external_service_rate,
        },
        tickets,
    })
}

pub fn client_billing(
    conn: &Connection,
    client_name: &str,
    period: Period,
) -> Result<ClientBilling, AppError> {
    let client = client_store::find_by_name(conn, client_name)?
        .ok_or_else(|| AppError::NotFound(format!("Cliente {} não encontrado", client_name)))?;
    let tickets = ticket_store::tickets_for_client(conn, &client.name, period)?;
    debug!(
        "Billing {} for {} over {} tickets",
        client.name,
        period,
        tickets.len()
    );
    compute_billing(&client, period, tickets)
}

pub fn summarize(clients: &[ClientBilling]) -> Result<BillingSummary, AppError> {
    Ok(BillingSummary {
        total_clients: clients.len(),
        total_value: checked_sum(clients.iter().map(|c| c.total_value), "valor total do período")?,
        total_hours: checked_sum(clients.iter().map(|c| c.total_hours), "horas do período")?,
        total_overtime_hours: checked_sum(
            clients.iter().map(|c| c.overtime_hours),
            "horas excedentes do período",
        )?,
        total_external_services: clients.iter().map(|c| c.external_services).sum(),
    })
}

/// Bills every registered client that has tickets in the period.
/// Ticket names with no registered client are left out.
pub fn period_billing(conn: &Connection, period: Period) -> Result<PeriodBilling, AppError> {
    let mut clients = Vec::new();
    for name in ticket_store::client_names_for_period(conn, period)? {
        match client_billing(conn, &name, period) {
            Ok(billing) => clients.push(billing),
            Err(AppError::NotFound(_)) => {
                warn!("Tickets for unregistered client '{}' in {} were not billed", name, period)
            }
            Err(e) => return Err(e),
        }
    }
    let summary = summarize(&clients)?;
    Ok(PeriodBilling {
        month: period.month,
        year: period.year,
        clients,
        summary,
    })
}

#[derive(Debug, Serialize)]
struct BillingCsvRow<'a> {
    cliente: &'a str,
    horas_totais: Decimal,
    horas_contratadas: Decimal,
    horas_utilizadas: Decimal,
    horas_excedentes: Decimal,
    atendimentos_externos: usize,
    valor_contrato: Decimal,
    valor_excedente: Decimal,
    valor_externos: Decimal,
    valor_total: Decimal,
}

/// CSV export of the period's billing lines.
pub fn billing_csv(billing: &PeriodBilling) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for c in &billing.clients {
        writer.serialize(BillingCsvRow {
            cliente: &c.client_name,
            horas_totais: c.total_hours,
            horas_contratadas: c.contract_hours,
            horas_utilizadas: c.used_contract_hours,
            horas_excedentes: c.overtime_hours,
            atendimentos_externos: c.external_services,
            valor_contrato: c.contract_value,
            valor_excedente: c.overtime_value,
            valor_externos: c.external_services_value,
            valor_total: c.total_value,
        })?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Csv(e.into_error().into()))
}
