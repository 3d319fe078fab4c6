// src/main.rs

use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PeriodResponse {
    month: u32,
    year: i32,
    label: String,
    total_tickets: i64,
    total_clients: i64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    month: u32,
    year: i32,
    batch_id: String,
    processed_records: usize,
    new_clients: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BillingSummary {
    total_clients: usize,
    total_value: f64,
    total_hours: f64,
}

#[derive(Debug, Deserialize)]
struct PeriodBilling {
    summary: BillingSummary,
}

/// Usage: billing-test-client [base_url] [spreadsheet.xlsx]
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let base_url = args
        .next()
        .unwrap_or_else(|| "http://localhost:5000".to_string());
    let upload_path = args.next();
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {}", health.status);

    // Test 2: Optional upload
    if let Some(path) = upload_path {
        println!("\n🔍 Uploading {}...", path);
        let bytes = tokio::fs::read(&path).await?;
        let filename = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.xlsx".to_string());
        let form = multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(filename));
        let response = client
            .post(format!("{}/api/upload", base_url))
            .multipart(form)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            println!("❌ Upload failed ({}): {}", response.status(), response.text().await?);
            return Ok(());
        }
        let upload = response.json::<UploadResponse>().await?;
        println!(
            "✅ Imported {} tickets into {:02}/{} (batch {}, {} new clients)",
            upload.processed_records,
            upload.month,
            upload.year,
            upload.batch_id,
            upload.new_clients.len()
        );
    }

    // Test 3: Periods
    println!("\n🔍 Listing periods...");
    let periods = client
        .get(format!("{}/api/periods", base_url))
        .send()
        .await?
        .json::<Vec<PeriodResponse>>()
        .await?;
    for period in &periods {
        println!(
            " - {}: {} tickets, {} clients",
            period.label, period.total_tickets, period.total_clients
        );
    }

    let Some(latest) = periods.first() else {
        println!("\n⚠️ No periods loaded yet. Pass a spreadsheet path to upload one.");
        return Ok(());
    };

    // Test 4: Billing for the newest period
    println!("\n🔍 Billing for {}...", latest.label);
    let billing = client
        .get(format!("{}/api/billing/{}/{}", base_url, latest.month, latest.year))
        .send()
        .await?
        .json::<PeriodBilling>()
        .await?;
    println!(
        "{} clients, {:.2}h, R$ {:.2}",
        billing.summary.total_clients, billing.summary.total_hours, billing.summary.total_value
    );

    // Test 5: Summary PDF
    println!("\n🔍 Requesting summary PDF...");
    let response = client
        .get(format!(
            "{}/api/generate-summary-pdf/{}/{}",
            base_url, latest.month, latest.year
        ))
        .send()
        .await?;
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let status = response.status();
    let bytes = response.bytes().await?;
    println!("Summary PDF: {} ({} bytes, {})", status, bytes.len(), disposition);

    // Test 6: System info
    println!("\n🔍 System info...");
    let info = client
        .get(format!("{}/api/system-info", base_url))
        .send()
        .await?
        .json::<Value>()
        .await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    Ok(())
}
