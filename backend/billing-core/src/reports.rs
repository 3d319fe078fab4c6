// src/reports.rs
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::{
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::{info, warn};
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::billing;
use crate::db::Database;
use crate::error::{io_context, AppError};
use crate::models::Period;
use crate::pdf;

pub const DOWNLOAD_PREFIX: &str = "/api/download-pdf/reports";
const SUMMARY_LABEL: &str = "RESUMO_GERAL";

fn write_report(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| io_context(e, format!("creating reports dir {}", dir.display())))?;
    let path = dir.join(filename);
    fs::write(&path, bytes).map_err(|e| io_context(e, format!("writing {}", path.display())))?;
    Ok(path)
}

/// A rendered document, also saved under the reports directory.
#[derive(Debug)]
pub struct RenderedReport {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

pub fn client_invoice(
    db: &Database,
    dir: &Path,
    client_name: &str,
    period: Period,
    generated_at: NaiveDateTime,
) -> Result<RenderedReport, AppError> {
    let billing = {
        let conn = db.lock();
        billing::client_billing(&conn, client_name, period)?
    };
    let bytes = pdf::invoice_pdf(&billing, generated_at)?;
    let filename = pdf::invoice_filename(&billing.client_name, period);
    let path = write_report(dir, &filename, &bytes)?;
    info!("Invoice for {} ({}) written to {}", client_name, period, path.display());
    Ok(RenderedReport {
        filename,
        path,
        bytes,
    })
}

pub fn period_summary(
    db: &Database,
    dir: &Path,
    period: Period,
    generated_at: NaiveDateTime,
) -> Result<RenderedReport, AppError> {
    let billing = {
        let conn = db.lock();
        billing::period_billing(&conn, period)?
    };
    let bytes = pdf::summary_pdf(&billing, generated_at)?;
    let filename = pdf::summary_filename(period);
    let path = write_report(dir, &filename, &bytes)?;
    info!("Billing summary for {} written to {}", period, path.display());
    Ok(RenderedReport {
        filename,
        path,
        bytes,
    })
}

// --- Batch generation ---

#[derive(Debug, Serialize)]
pub struct GeneratedFile {
    pub client_name: String,
    pub file_path: String,
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub generated_files: usize,
    pub files: Vec<GeneratedFile>,
    pub errors: Vec<String>,
    pub message: String,
}

/// Renders one invoice per billed client plus the period summary.
/// Failures are collected per file instead of aborting the batch.
pub fn generate_all(
    db: &Database,
    dir: &Path,
    period: Period,
    generated_at: NaiveDateTime,
) -> Result<BatchOutcome, AppError> {
    let clients: Vec<String> = {
        let conn = db.lock();
        billing::period_billing(&conn, period)?
            .clients
            .into_iter()
            .map(|c| c.client_name)
            .collect()
    };
    if clients.is_empty() {
        return Err(AppError::NotFound(
            "Nenhum cliente encontrado para o período".to_string(),
        ));
    }

    let mut files = Vec::new();
    let mut errors = Vec::new();
    for client_name in clients {
        match client_invoice(db, dir, &client_name, period, generated_at) {
            Ok(report) => files.push(GeneratedFile {
                client_name,
                file_path: report.path.display().to_string(),
                file_size: report.bytes.len() as u64,
            }),
            Err(e) => {
                warn!("Invoice for {} failed: {}", client_name, e);
                errors.push(format!("Erro ao gerar PDF para {}: {}", client_name, e));
            }
        }
    }

    match period_summary(db, dir, period, generated_at) {
        Ok(report) => files.push(GeneratedFile {
            client_name: SUMMARY_LABEL.to_string(),
            file_path: report.path.display().to_string(),
            file_size: report.bytes.len() as u64,
        }),
        Err(e) => {
            warn!("Billing summary for {} failed: {}", period, e);
            errors.push(format!("Erro ao gerar relatório resumo: {}", e));
        }
    }

    Ok(BatchOutcome {
        success: true,
        generated_files: files.len(),
        message: format!("{} arquivos PDF gerados com sucesso", files.len()),
        files,
        errors,
    })
}

/// Builds a ZIP with the invoices of the selected clients.
pub fn selected_zip(
    db: &Database,
    dir: &Path,
    period: Period,
    clients: &[String],
    generated_at: NaiveDateTime,
) -> Result<Vec<u8>, AppError> {
    if clients.is_empty() {
        return Err(AppError::BadRequest("Nenhum cliente selecionado".to_string()));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut added = 0usize;
    for client_name in clients {
        match client_invoice(db, dir, client_name, period, generated_at) {
            Ok(report) => {
                zip.start_file(pdf::invoice_filename(client_name, period), options)?;
                zip.write_all(&report.bytes)
                    .map_err(|e| io_context(e, "writing invoice into zip"))?;
                added += 1;
            }
            Err(e) => warn!("Skipping {} in zip: {}", client_name, e),
        }
    }

    if added == 0 {
        return Err(AppError::Pdf("Nenhum PDF foi gerado com sucesso".to_string()));
    }
    info!("Zipped {} of {} selected invoices for {}", added, clients.len(), period);
    Ok(zip.finish()?.into_inner())
}

// --- Listing, download and cleanup ---

#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub filename: String,
    pub client_name: String,
    pub report_type: String,
    pub file_size: u64,
    pub created_at: NaiveDateTime,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct ReportListing {
    pub reports: Vec<ReportEntry>,
    pub total: usize,
    pub period: String,
}

fn client_from_filename(filename: &str) -> String {
    let stem = filename
        .trim_start_matches("fatura_")
        .trim_end_matches(".pdf");
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() >= 3 {
        parts[..parts.len() - 2].join(" ")
    } else {
        "Desconhecido".to_string()
    }
}

fn modified_at(meta: &fs::Metadata) -> NaiveDateTime {
    let time = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    DateTime::<Local>::from(time).naive_local()
}

/// PDF reports of a period, newest first. A missing directory lists nothing.
pub fn list_reports(dir: &Path, period: Period) -> Result<ReportListing, AppError> {
    let mut reports = Vec::new();
    let marker = format!("_{:02}_{}", period.month, period.year);

    if dir.exists() {
        let entries = fs::read_dir(dir)
            .map_err(|e| io_context(e, format!("reading {}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_context(e, "reading report entry"))?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !filename.ends_with(".pdf") || !filename.contains(&marker) {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| io_context(e, format!("stat {}", filename)))?;

            let (report_type, client_name) = if filename.starts_with("resumo_") {
                ("summary", "Resumo Geral".to_string())
            } else if filename.starts_with("fatura_") {
                ("client", client_from_filename(&filename))
            } else {
                ("client", "Desconhecido".to_string())
            };

            reports.push(ReportEntry {
                download_url: format!("{}/{}", DOWNLOAD_PREFIX, filename),
                client_name,
                report_type: report_type.to_string(),
                file_size: meta.len(),
                created_at: modified_at(&meta),
                filename,
            });
        }
    }

    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(ReportListing {
        total: reports.len(),
        reports,
        period: period.label(),
    })
}

/// Resolves a download request to a file directly inside `dir`.
pub fn resolve_download(dir: &Path, filename: &str) -> Result<PathBuf, AppError> {
    let is_plain_name = !filename.is_empty()
        && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename)
        && !filename.contains(['/', '\\'])
        && filename != ".."
        && filename != ".";
    if !is_plain_name {
        warn!("Rejected report download path '{}'", filename);
        return Err(AppError::BadRequest("Nome de arquivo inválido".to_string()));
    }

    let path = dir.join(filename);
    if !path.is_file() {
        return Err(AppError::NotFound("Arquivo não encontrado".to_string()));
    }
    Ok(path)
}

#[derive(Debug, Serialize)]
pub struct CleanupOutcome {
    pub message: String,
    pub removed: usize,
}

/// Removes PDFs whose modification time is older than `max_age` relative to `now`.
pub fn cleanup_reports(dir: &Path, max_age: Duration, now: SystemTime) -> Result<CleanupOutcome, AppError> {
    if !dir.exists() {
        return Ok(CleanupOutcome {
            message: "Diretório de relatórios não existe".to_string(),
            removed: 0,
        });
    }

    let mut removed = 0;
    let entries =
        fs::read_dir(dir).map_err(|e| io_context(e, format!("reading {}", dir.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age > max_age {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    info!("Report cleanup removed {} files from {}", removed, dir.display());
    Ok(CleanupOutcome {
        message: format!("{} relatórios antigos removidos", removed),
        removed,
    })
}

pub fn count_reports(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("pdf"))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_store;
    use crate::models::{NewClient, TicketFields};
    use crate::ticket_store::{self, NewBatch};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::io::Read;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn march() -> Period {
        Period::new(3, 2024).unwrap()
    }

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock();
            for name in ["ACME", "Beta Ltda"] {
                client_store::create_client(
                    &conn,
                    NewClient {
                        name: Some(name.to_string()),
                        ..Default::default()
                    },
                )
                .unwrap();
            }
            let tickets: Vec<TicketFields> = ["ACME", "Beta Ltda"]
                .iter()
                .map(|name| TicketFields {
                    ticket_id: Some("1".to_string()),
                    client_name: Some(name.to_string()),
                    total_service_time: dec!(2),
                    ..Default::default()
                })
                .collect();
            let batch = NewBatch {
                batch_id: "b1".to_string(),
                filename: "marco.xlsx".to_string(),
                uploaded_at: now(),
            };
            ticket_store::replace_period(&conn, march(), &batch, &tickets).unwrap();
        }
        db
    }

    #[test]
    fn test_generate_all_writes_invoices_and_summary() {
        let db = seeded_db();
        let dir = tempfile::tempdir().unwrap();
        let outcome = generate_all(&db, dir.path(), march(), now()).unwrap();

        assert_eq!(outcome.generated_files, 3);
        assert!(outcome.errors.is_empty());
        assert!(dir.path().join("fatura_Beta_Ltda_03_2024.pdf").is_file());
        assert!(dir.path().join("resumo_faturamento_03_2024.pdf").is_file());

        let listing = list_reports(dir.path(), march()).unwrap();
        assert_eq!(listing.total, 3);
        let beta = listing
            .reports
            .iter()
            .find(|r| r.filename == "fatura_Beta_Ltda_03_2024.pdf")
            .unwrap();
        assert_eq!(beta.client_name, "Beta Ltda");
        assert_eq!(beta.download_url, "/api/download-pdf/reports/fatura_Beta_Ltda_03_2024.pdf");
        assert!(list_reports(dir.path(), Period::new(4, 2024).unwrap())
            .unwrap()
            .reports
            .is_empty());
    }

    #[test]
    fn test_generate_all_without_clients_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            generate_all(&db, dir.path(), march(), now()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_selected_zip_skips_unknown_clients() {
        let db = seeded_db();
        let dir = tempfile::tempdir().unwrap();
        let clients = vec!["ACME".to_string(), "Ninguém".to_string()];
        let bytes = selected_zip(&db, dir.path(), march(), &clients, now()).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);
        let mut file = archive.by_name("fatura_ACME_03_2024.pdf").unwrap();
        let mut head = [0u8; 4];
        file.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"%PDF");
    }

    #[test]
    fn test_selected_zip_errors() {
        let db = seeded_db();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            selected_zip(&db, dir.path(), march(), &[], now()),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            selected_zip(&db, dir.path(), march(), &["Ninguém".to_string()], now()),
            Err(AppError::Pdf(_))
        ));
    }

    #[test]
    fn test_resolve_download_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fatura_ACME_03_2024.pdf"), b"%PDF").unwrap();

        assert!(resolve_download(dir.path(), "fatura_ACME_03_2024.pdf").is_ok());
        for bad in ["../app.db", "..", "sub/file.pdf", "..\\x.pdf", ""] {
            assert!(
                matches!(resolve_download(dir.path(), bad), Err(AppError::BadRequest(_))),
                "{}",
                bad
            );
        }
        assert!(matches!(
            resolve_download(dir.path(), "missing.pdf"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_removes_only_old_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.pdf"), b"%PDF").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();
        let month = Duration::from_secs(30 * 24 * 60 * 60);

        let outcome = cleanup_reports(dir.path(), month, SystemTime::now()).unwrap();
        assert_eq!(outcome.removed, 0);
        assert_eq!(count_reports(dir.path()), 1);

        let later = SystemTime::now() + Duration::from_secs(31 * 24 * 60 * 60);
        let outcome = cleanup_reports(dir.path(), month, later).unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(count_reports(dir.path()), 0);
        assert!(dir.path().join("notes.txt").exists());

        let missing = dir.path().join("nope");
        assert_eq!(cleanup_reports(&missing, month, later).unwrap().removed, 0);
    }
}
