// src/db.rs
use chrono::{Local, NaiveDateTime};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info, warn};

use crate::error::{io_context, AppError};

/// Bumped whenever `migrate_conn` learns a new step.
pub const SCHEMA_VERSION: i64 = 2;
const BACKUP_MARKER: &str = ".backup_";

pub struct Database {
    pub conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    io_context(e, format!("Failed to create database directory: {:?}", parent))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened SQLite database at {:?}", path);
        let db = Database {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let db = Database {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        db.initialize()?;
        Ok(db)
    }

    /// A panic while the guard was held leaves any open transaction rolled back,
    /// so a poisoned lock is taken over rather than failing every later request.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("SQLite connection mutex was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn initialize(&self) -> Result<(), AppError> {
        let conn = self.lock();

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            -- Billed customers and their contract
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                contact TEXT,
                sector TEXT,
                contract_hours TEXT NOT NULL DEFAULT '10.0',
                hourly_rate TEXT NOT NULL DEFAULT '100.0',
                overtime_rate TEXT NOT NULL DEFAULT '115.0',
                external_service_rate TEXT NOT NULL DEFAULT '88.0',
                created_at DATETIME,
                updated_at DATETIME
            );

            -- Helpdesk staff
            CREATE TABLE IF NOT EXISTS technicians (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                email TEXT,
                phone TEXT,
                department TEXT,
                monthly_hours_target TEXT NOT NULL DEFAULT '160.0',
                efficiency_target TEXT NOT NULL DEFAULT '85.0',
                active INTEGER NOT NULL DEFAULT 1,
                hire_date DATETIME,
                created_at DATETIME,
                updated_at DATETIME
            );

            -- One row per spreadsheet import
            CREATE TABLE IF NOT EXISTS upload_batches (
                batch_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                processing_month INTEGER NOT NULL,
                processing_year INTEGER NOT NULL,
                uploaded_at DATETIME NOT NULL
            );

            -- Imported tickets
            CREATE TABLE IF NOT EXISTS ticket_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id TEXT,
                client_name TEXT,
                subject TEXT,
                technician TEXT,
                primary_category TEXT,
                secondary_category TEXT,
                contact TEXT,
                arrival_date DATETIME,
                departure_date DATETIME,
                completion_date DATETIME,
                workstation TEXT,
                pause_reason TEXT,
                sector TEXT,
                status TEXT,
                ticket_type TEXT,
                service TEXT,
                description TEXT,
                business_hours INTEGER,
                external_service INTEGER,
                start_date DATETIME,
                end_date DATETIME,
                total_service_time TEXT NOT NULL DEFAULT '0',
                processing_month INTEGER NOT NULL,
                processing_year INTEGER NOT NULL,
                created_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ticket_period
                ON ticket_data (processing_year, processing_month);

            CREATE TABLE IF NOT EXISTS db_version (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version INTEGER NOT NULL,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;

        // Run migrations for existing databases (pass connection to avoid deadlock)
        Self::migrate_conn(&conn)?;

        Ok(())
    }

    fn migrate_conn(conn: &Connection) -> Result<(), AppError> {
        let current = Self::schema_version_conn(conn)?;
        if current >= SCHEMA_VERSION {
            debug!("Database schema is at version {}", current);
            return Ok(());
        }

        // Version 1: contact details and soft delete on clients
        let client_columns = Self::table_columns(conn, "clients")?;
        for (column, ddl) in [
            ("email", "ALTER TABLE clients ADD COLUMN email TEXT"),
            ("phone", "ALTER TABLE clients ADD COLUMN phone TEXT"),
            (
                "whatsapp_contact",
                "ALTER TABLE clients ADD COLUMN whatsapp_contact TEXT",
            ),
            ("address", "ALTER TABLE clients ADD COLUMN address TEXT"),
            ("notes", "ALTER TABLE clients ADD COLUMN notes TEXT"),
            (
                "active",
                "ALTER TABLE clients ADD COLUMN active INTEGER NOT NULL DEFAULT 1",
            ),
        ] {
            if !client_columns.iter().any(|c| c == column) {
                conn.execute(ddl, [])?;
            }
        }

        // Version 2: tickets remember which upload they came from
        let ticket_columns = Self::table_columns(conn, "ticket_data")?;
        if !ticket_columns.iter().any(|c| c == "upload_batch_id") {
            conn.execute("ALTER TABLE ticket_data ADD COLUMN upload_batch_id TEXT", [])?;
        }
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ticket_batch ON ticket_data (upload_batch_id)",
            [],
        )?;

        conn.execute(
            "INSERT INTO db_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )?;
        info!(
            "Migrated database schema from version {} to {}",
            current, SCHEMA_VERSION
        );
        Ok(())
    }

    fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, AppError> {
        let columns = conn
            .prepare(&format!("PRAGMA table_info({})", table))?
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(columns)
    }

    fn schema_version_conn(conn: &Connection) -> Result<i64, AppError> {
        let version = conn
            .query_row(
                "SELECT version FROM db_version ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    pub fn schema_version(&self) -> Result<i64, AppError> {
        let conn = self.lock();
        Self::schema_version_conn(&conn)
    }

    /// Copies the live database next to itself as `<file>.backup_<timestamp>`.
    pub fn backup(&self) -> Result<PathBuf, AppError> {
        let path = self.path.as_ref().ok_or_else(|| {
            AppError::Config("In-memory databases cannot be backed up".to_string())
        })?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut backup_name = path.as_os_str().to_os_string();
        backup_name.push(format!("{}{}", BACKUP_MARKER, timestamp));
        let backup_path = PathBuf::from(backup_name);

        let conn = self.lock();
        conn.execute(
            "VACUUM INTO ?1",
            [backup_path.to_string_lossy().to_string()],
        )?;
        info!("Database backup written to {:?}", backup_path);
        Ok(backup_path)
    }

    pub fn file_size(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Modification time of the newest backup file, if any.
    pub fn last_backup(&self) -> Option<NaiveDateTime> {
        let path = self.path.as_ref()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = format!("{}{}", path.file_name()?.to_string_lossy(), BACKUP_MARKER);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not scan {:?} for backups: {}", dir, e);
                return None;
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .filter_map(|entry| entry.metadata().ok()?.modified().ok())
            .max()
            .map(|modified| chrono::DateTime::<Local>::from(modified).naive_local())
    }
}

// --- Column helpers ---

/// Money and hours are stored as decimal text to keep exact values.
pub fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn decimal_sql(value: &Decimal) -> String {
    value.normalize().to_string()
}
