// src/client_store.rs
use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::db::{decimal_col, decimal_sql};
use crate::error::AppError;
use crate::models::{
    Client, ClientUpdate, NewClient, Period, DEFAULT_CONTRACT_HOURS, DEFAULT_EXTERNAL_SERVICE_RATE,
    DEFAULT_HOURLY_RATE, DEFAULT_OVERTIME_RATE, MAX_AMOUNT,
};

const CLIENT_COLUMNS: &str = "id, name, contact, sector, email, phone, whatsapp_contact, address, \
     notes, contract_hours, hourly_rate, overtime_rate, external_service_rate, active, created_at, \
     updated_at";

pub const AUTO_CREATED_NOTE: &str = "Cliente criado automaticamente a partir dos dados processados";
const SYNC_SAMPLE_SIZE: usize = 10;

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        contact: row.get(2)?,
        sector: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        whatsapp_contact: row.get(6)?,
        address: row.get(7)?,
        notes: row.get(8)?,
        contract_hours: decimal_col(row, 9)?,
        hourly_rate: decimal_col(row, 10)?,
        overtime_rate: decimal_col(row, 11)?,
        external_service_rate: decimal_col(row, 12)?,
        active: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn amount_in_range(field: &str, value: Decimal) -> Result<Decimal, AppError> {
    if value.is_sign_negative() || value > MAX_AMOUNT {
        return Err(AppError::BadRequest(format!("Valor inválido para {}", field)));
    }
    Ok(value)
}

pub fn list_clients(conn: &Connection) -> Result<Vec<Client>, AppError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM clients ORDER BY name", CLIENT_COLUMNS))?;
    let clients = stmt
        .query_map([], client_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(clients)
}

pub fn get_client(conn: &Connection, id: i64) -> Result<Option<Client>, AppError> {
    let client = conn
        .query_row(
            &format!("SELECT {} FROM clients WHERE id = ?1", CLIENT_COLUMNS),
            [id],
            client_from_row,
        )
        .optional()?;
    Ok(client)
}

/// Exact name lookup, used by billing.
pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Client>, AppError> {
    let client = conn
        .query_row(
            &format!("SELECT {} FROM clients WHERE name = ?1", CLIENT_COLUMNS),
            [name],
            client_from_row,
        )
        .optional()?;
    Ok(client)
}

fn name_taken(conn: &Connection, name: &str, except_id: Option<i64>) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM clients WHERE name = ?1 AND id <> ?2",
        params![name, except_id.unwrap_or(-1)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_client(conn: &Connection, new_client: NewClient) -> Result<Client, AppError> {
    let name = new_client
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Nome do cliente é obrigatório".to_string()))?
        .to_string();

    if name_taken(conn, &name, None)? {
        return Err(AppError::BadRequest(
            "Cliente com este nome já existe".to_string(),
        ));
    }

    let contract_hours = amount_in_range(
        "contract_hours",
        new_client.contract_hours.unwrap_or(DEFAULT_CONTRACT_HOURS),
    )?;
    let hourly_rate = amount_in_range(
        "hourly_rate",
        new_client.hourly_rate.unwrap_or(DEFAULT_HOURLY_RATE),
    )?;
    let overtime_rate = amount_in_range(
        "overtime_rate",
        new_client.overtime_rate.unwrap_or(DEFAULT_OVERTIME_RATE),
    )?;
    let external_service_rate = amount_in_range(
        "external_service_rate",
        new_client
            .external_service_rate
            .unwrap_or(DEFAULT_EXTERNAL_SERVICE_RATE),
    )?;

    let timestamp = now();
    conn.execute(
        "INSERT INTO clients (
            name, contact, sector, email, phone, whatsapp_contact, address, notes,
            contract_hours, hourly_rate, overtime_rate, external_service_rate, active,
            created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            name,
            new_client.contact,
            new_client.sector,
            new_client.email,
            new_client.phone,
            new_client.whatsapp_contact,
            new_client.address,
            new_client.notes,
            decimal_sql(&contract_hours),
            decimal_sql(&hourly_rate),
            decimal_sql(&overtime_rate),
            decimal_sql(&external_service_rate),
            new_client.active.unwrap_or(true),
            timestamp,
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!("Created client '{}' (id {})", name, id);

    get_client(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("Cliente {} não encontrado", id)))
}

/// Applies a partial update and returns the stored client.
pub fn update_client(conn: &Connection, id: i64, update: ClientUpdate) -> Result<Client, AppError> {
    let mut client = get_client(conn, id)?
        .ok_or_else(|| AppError::NotFound("Cliente não encontrado".to_string()))?;

    if let Some(name) = update.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest(
                "Nome do cliente não pode estar vazio".to_string(),
            ));
        }
        if name != client.name && name_taken(conn, &name, Some(id))? {
            return Err(AppError::BadRequest(
                "Cliente com este nome já existe".to_string(),
            ));
        }
        client.name = name;
    }

    if let Some(contact) = update.contact {
        client.contact = contact;
    }
    if let Some(sector) = update.sector {
        client.sector = sector;
    }
    if let Some(email) = update.email {
        client.email = email;
    }
    if let Some(phone) = update.phone {
        client.phone = phone;
    }
    if let Some(whatsapp_contact) = update.whatsapp_contact {
        client.whatsapp_contact = whatsapp_contact;
    }
    if let Some(address) = update.address {
        client.address = address;
    }
    if let Some(notes) = update.notes {
        client.notes = notes;
    }
    if let Some(value) = update.contract_hours {
        client.contract_hours = amount_in_range("contract_hours", value)?;
    }
    if let Some(value) = update.hourly_rate {
        client.hourly_rate = amount_in_range("hourly_rate", value)?;
    }
    if let Some(value) = update.overtime_rate {
        client.overtime_rate = amount_in_range("overtime_rate", value)?;
    }
    if let Some(value) = update.external_service_rate {
        client.external_service_rate = amount_in_range("external_service_rate", value)?;
    }
    if let Some(active) = update.active {
        client.active = active;
    }

    conn.execute(
        "UPDATE clients SET
            name = ?1, contact = ?2, sector = ?3, email = ?4, phone = ?5,
            whatsapp_contact = ?6, address = ?7, notes = ?8, contract_hours = ?9,
            hourly_rate = ?10, overtime_rate = ?11, external_service_rate = ?12,
            active = ?13, updated_at = ?14
         WHERE id = ?15",
        params![
            client.name,
            client.contact,
            client.sector,
            client.email,
            client.phone,
            client.whatsapp_contact,
            client.address,
            client.notes,
            decimal_sql(&client.contract_hours),
            decimal_sql(&client.hourly_rate),
            decimal_sql(&client.overtime_rate),
            decimal_sql(&client.external_service_rate),
            client.active,
            now(),
            id,
        ],
    )?;
    info!("Updated client '{}' (id {})", client.name, id);

    get_client(conn, id)?.ok_or_else(|| AppError::NotFound("Cliente não encontrado".to_string()))
}

/// Soft delete.
pub fn deactivate_client(conn: &Connection, id: i64) -> Result<(), AppError> {
    let changed = conn.execute(
        "UPDATE clients SET active = 0, updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound("Cliente não encontrado".to_string()));
    }
    info!("Deactivated client {}", id);
    Ok(())
}

/// Case-insensitive substring match over active clients.
pub fn search_clients(conn: &Connection, query: &str) -> Result<Vec<Client>, AppError> {
    let needle = query.trim().to_lowercase();
    Ok(list_clients(conn)?
        .into_iter()
        .filter(|c| c.active && c.name.to_lowercase().contains(&needle))
        .collect())
}

/// Creates default clients for ticket names that have no registered match.
/// Matching is by exact name, the same way billing looks clients up.
pub fn register_missing(
    conn: &Connection,
    names: &[(String, Option<String>, Option<String>)],
) -> Result<Vec<String>, AppError> {
    let mut created = Vec::new();
    for (name, contact, sector) in names {
        let name = name.trim();
        if name.is_empty() || find_by_name(conn, name)?.is_some() {
            continue;
        }
        create_client(
            conn,
            NewClient::from_ticket_name(name, contact.clone(), sector.clone()),
        )?;
        created.push(name.to_string());
    }
    Ok(created)
}

fn normalized(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Ticket client names without a trimmed, case-insensitive client match.
pub fn missing_client_names(conn: &Connection) -> Result<Vec<String>, AppError> {
    let registered: BTreeSet<String> = list_clients(conn)?
        .iter()
        .map(|c| normalized(&c.name))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT DISTINCT TRIM(client_name) FROM ticket_data
         WHERE client_name IS NOT NULL AND TRIM(client_name) <> ''
         ORDER BY TRIM(client_name)",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = BTreeSet::new();
    Ok(names
        .into_iter()
        .filter(|name| !registered.contains(&normalized(name)))
        .filter(|name| seen.insert(normalized(name)))
        .collect())
}

pub fn auto_populate(conn: &Connection) -> Result<Vec<String>, AppError> {
    let missing = missing_client_names(conn)?;
    for name in &missing {
        create_client(
            conn,
            NewClient {
                notes: Some(AUTO_CREATED_NOTE.to_string()),
                ..NewClient::from_ticket_name(name, None, None)
            },
        )?;
    }
    if !missing.is_empty() {
        info!("Auto-populated {} clients from ticket data", missing.len());
    }
    Ok(missing)
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub total_unique_clients_in_data: usize,
    pub registered_clients: usize,
    pub missing_clients_count: usize,
    pub missing_clients_sample: Vec<String>,
    pub needs_sync: bool,
}

pub fn sync_status(conn: &Connection) -> Result<SyncStatus, AppError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT TRIM(client_name)) FROM ticket_data
         WHERE client_name IS NOT NULL AND TRIM(client_name) <> ''",
        [],
        |row| row.get(0),
    )?;
    let registered: i64 = conn.query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))?;
    let missing = missing_client_names(conn)?;

    Ok(SyncStatus {
        total_unique_clients_in_data: total as usize,
        registered_clients: registered as usize,
        missing_clients_count: missing.len(),
        missing_clients_sample: missing.iter().take(SYNC_SAMPLE_SIZE).cloned().collect(),
        needs_sync: !missing.is_empty(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientActivity {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub active_months: usize,
    pub total_tickets: usize,
    pub total_hours: Decimal,
    pub first_activity: Option<String>,
    pub last_activity: Option<String>,
    pub has_data: bool,
}

/// Activity of every client across all stored periods, most recently active first.
pub fn data_summary(conn: &Connection) -> Result<Vec<ClientActivity>, AppError> {
    #[derive(Default)]
    struct Acc {
        months: BTreeSet<Period>,
        tickets: usize,
        hours: Decimal,
    }

    let mut stmt = conn.prepare(
        "SELECT client_name, processing_month, processing_year, total_service_time
         FROM ticket_data WHERE client_name IS NOT NULL",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Period {
                    month: row.get(1)?,
                    year: row.get(2)?,
                },
                decimal_col(row, 3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_name: HashMap<String, Acc> = HashMap::new();
    for (name, period, hours) in rows {
        let acc = by_name.entry(normalized(&name)).or_default();
        acc.months.insert(period);
        acc.tickets += 1;
        acc.hours += hours;
    }

    let mut summary: Vec<ClientActivity> = list_clients(conn)?
        .into_iter()
        .map(|client| {
            let acc = by_name.get(&normalized(&client.name));
            let first = acc.and_then(|a| a.months.iter().next().copied());
            let last = acc.and_then(|a| a.months.iter().next_back().copied());
            ClientActivity {
                id: client.id,
                name: client.name,
                active: client.active,
                active_months: acc.map(|a| a.months.len()).unwrap_or(0),
                total_tickets: acc.map(|a| a.tickets).unwrap_or(0),
                total_hours: acc.map(|a| a.hours.round_dp(2)).unwrap_or_default(),
                first_activity: first.map(|p| p.label()),
                last_activity: last.map(|p| p.label()),
                has_data: acc.map(|a| a.tickets > 0).unwrap_or(false),
            }
        })
        .collect();

    // Sort by last activity (newest first, inactive last), then by name.
    let last_ordinal = |c: &ClientActivity| {
        by_name
            .get(&normalized(&c.name))
            .and_then(|a| a.months.iter().next_back().map(Period::ordinal))
    };
    summary.sort_by(|a, b| {
        last_ordinal(b)
            .cmp(&last_ordinal(a))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::TicketFields;
    use crate::ticket_store::{replace_period, NewBatch};
    use rust_decimal_macros::dec;

    fn named(name: &str) -> NewClient {
        NewClient {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn seed_tickets(conn: &Connection, period: Period, clients: &[&str]) {
        let tickets: Vec<TicketFields> = clients
            .iter()
            .map(|c| TicketFields {
                client_name: Some(c.to_string()),
                total_service_time: dec!(1.5),
                ..Default::default()
            })
            .collect();
        let batch = NewBatch {
            batch_id: format!("b-{}", period.ordinal()),
            filename: "tickets.xlsx".to_string(),
            uploaded_at: now(),
        };
        replace_period(conn, period, &batch, &tickets).unwrap();
    }

    #[test]
    fn test_create_applies_contract_defaults() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let client = create_client(&conn, named("  ACME  ")).unwrap();
        assert_eq!(client.name, "ACME");
        assert_eq!(client.contract_hours, dec!(10));
        assert_eq!(client.hourly_rate, dec!(100));
        assert_eq!(client.overtime_rate, dec!(115));
        assert_eq!(client.external_service_rate, dec!(88));
        assert!(client.active);
    }

    #[test]
    fn test_create_rejects_blank_and_duplicate_names() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        assert!(matches!(create_client(&conn, named("  ")), Err(AppError::BadRequest(_))));
        create_client(&conn, named("ACME")).unwrap();
        assert!(matches!(create_client(&conn, named("ACME")), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_update_round_trips_fields() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let client = create_client(
            &conn,
            NewClient {
                contact: Some("Maria".to_string()),
                ..named("ACME")
            },
        )
        .unwrap();

        let update: ClientUpdate = serde_json::from_str(
            r#"{"contact": null, "email": "fin@acme.com", "hourly_rate": 150, "contract_hours": "12,5"}"#,
        )
        .unwrap();
        let updated = update_client(&conn, client.id, update).unwrap();
        assert_eq!(updated.contact, None);
        assert_eq!(updated.email.as_deref(), Some("fin@acme.com"));
        assert_eq!(updated.hourly_rate, dec!(150));
        assert_eq!(updated.contract_hours, dec!(12.5));
        assert_eq!(updated.overtime_rate, dec!(115));
    }

    #[test]
    fn test_update_rejects_taken_name() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        create_client(&conn, named("ACME")).unwrap();
        let beta = create_client(&conn, named("Beta")).unwrap();
        let update = ClientUpdate {
            name: Some("ACME".to_string()),
            ..Default::default()
        };
        assert!(matches!(update_client(&conn, beta.id, update), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_rates_above_limit_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let acme = create_client(&conn, named("ACME")).unwrap();

        let huge: Decimal = "70000000000000000000000000000".parse().unwrap();
        let update = ClientUpdate {
            hourly_rate: Some(huge),
            ..Default::default()
        };
        assert!(matches!(update_client(&conn, acme.id, update), Err(AppError::BadRequest(_))));
        assert_eq!(get_client(&conn, acme.id).unwrap().unwrap().hourly_rate, dec!(100));

        let too_big = NewClient {
            contract_hours: Some(MAX_AMOUNT + dec!(1)),
            ..named("Beta")
        };
        assert!(matches!(create_client(&conn, too_big), Err(AppError::BadRequest(_))));
        let at_limit = NewClient {
            overtime_rate: Some(MAX_AMOUNT),
            ..named("Gama")
        };
        assert_eq!(create_client(&conn, at_limit).unwrap().overtime_rate, MAX_AMOUNT);
    }

    #[test]
    fn test_deactivate_hides_client_from_search() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        let acme = create_client(&conn, named("ACME Ltda")).unwrap();
        create_client(&conn, named("Acme Filial")).unwrap();
        assert_eq!(search_clients(&conn, "acme").unwrap().len(), 2);

        deactivate_client(&conn, acme.id).unwrap();
        let found = search_clients(&conn, "ACME").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Acme Filial");
        assert!(!get_client(&conn, acme.id).unwrap().unwrap().active);
        assert!(matches!(deactivate_client(&conn, 999), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_auto_populate_matches_case_insensitively() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        create_client(&conn, named("ACME")).unwrap();
        seed_tickets(&conn, Period::new(3, 2024).unwrap(), &["acme ", "Beta", "Gamma", "Beta"]);

        let status = sync_status(&conn).unwrap();
        assert_eq!(status.missing_clients_count, 2);
        assert!(status.needs_sync);

        let created = auto_populate(&conn).unwrap();
        assert_eq!(created, vec!["Beta".to_string(), "Gamma".to_string()]);
        let beta = find_by_name(&conn, "Beta").unwrap().unwrap();
        assert_eq!(beta.notes.as_deref(), Some(AUTO_CREATED_NOTE));
        assert!(!sync_status(&conn).unwrap().needs_sync);
    }

    #[test]
    fn test_data_summary_orders_by_last_activity() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock();
        for name in ["ACME", "Beta", "Idle"] {
            create_client(&conn, named(name)).unwrap();
        }
        seed_tickets(&conn, Period::new(1, 2024).unwrap(), &["ACME", "Beta"]);
        seed_tickets(&conn, Period::new(2, 2024).unwrap(), &["Beta"]);

        let summary = data_summary(&conn).unwrap();
        let names: Vec<&str> = summary.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "ACME", "Idle"]);
        assert_eq!(summary[0].active_months, 2);
        assert_eq!(summary[0].total_hours, dec!(3.0));
        assert_eq!(summary[0].first_activity.as_deref(), Some("01/2024"));
        assert_eq!(summary[0].last_activity.as_deref(), Some("02/2024"));
        assert!(!summary[2].has_data);
    }
}
