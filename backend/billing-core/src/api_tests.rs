// src/api_tests.rs

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::routes::{build_router, AppState};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use http_body_util::BodyExt;
    use rust_xlsxwriter::Workbook;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----billing-test-boundary";

    fn setup() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_path: dir.path().join("app.db"),
            reports_dir: dir.path().join("reports"),
            host: "127.0.0.1".to_string(),
            port: 0,
            tls: None,
            max_upload_bytes: 5 * 1024 * 1024,
        };
        let db = Database::open(&config.database_path).unwrap();
        let state = AppState {
            db: Arc::new(db),
            config: Arc::new(config),
        };
        (build_router(state), dir)
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let body = match body {
            Some(v) => Body::from(serde_json::to_string(&v).unwrap()),
            None => Body::empty(),
        };
        let response = send(router, builder.body(body).unwrap()).await;
        let status = response.status();
        let bytes = body_bytes(response).await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn multipart_upload(filename: &str, bytes: &[u8], month: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
        if let Some(month) = month {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"month\"\r\n\r\n{}\r\n",
                    BOUNDARY, month
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn march_export() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let rows = [
            ["Ticket", "Cliente", "Técnico", "Assunto", "Data de finalização", "Atendimento externo?", "Tempo total de atendimento"],
            ["501", "ACME", "Ana", "Troca de toner", "05/03/2024 14:00", "Não", "1:30"],
            ["502", "ACME", "Bruno", "Servidor fora do ar", "12/03/2024 09:15", "Sim", "10:00"],
            ["503", "Beta Ltda", "Ana", "VPN", "20/03/2024 16:40", "Não", "0:45"],
        ];
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                sheet.write_string(r as u32, c as u16, *value).unwrap();
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _dir) = setup();
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_non_excel_upload_is_rejected() {
        let (router, _dir) = setup();
        let response = send(&router, multipart_upload("chamados.csv", b"a,b,c\n1,2,3\n", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body["error"].as_str().unwrap().contains(".xlsx"));
    }

    #[tokio::test]
    async fn test_corrupt_workbook_is_rejected() {
        let (router, _dir) = setup();
        let response = send(&router, multipart_upload("chamados.xlsx", b"not a zip", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_month_is_rejected() {
        let (router, _dir) = setup();
        let (status, body) = call(&router, "GET", "/api/billing/13/2024", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(&router, "GET", "/api/heatmap-data/0/2024", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_statistics_for_empty_period_is_not_found() {
        let (router, _dir) = setup();
        let (status, body) = call(&router, "GET", "/api/statistics/3/2024", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Nenhum dado encontrado para o período especificado");
    }

    #[tokio::test]
    async fn test_client_create_update_round_trip() {
        let (router, _dir) = setup();
        let (status, created) = call(
            &router,
            "POST",
            "/api/clients",
            Some(json!({ "name": "Padaria Central", "contract_hours": 20, "hourly_rate": "120.50" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["client"]["id"].as_i64().unwrap();
        assert_eq!(created["client"]["contract_hours"], 20.0);
        assert_eq!(created["client"]["overtime_rate"], 115.0);

        let (status, _) = call(&router, "POST", "/api/clients", Some(json!({ "name": "Padaria Central" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, updated) = call(
            &router,
            "PUT",
            &format!("/api/clients/{}", id),
            Some(json!({ "overtime_rate": 150, "email": "contato@padaria.com.br" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["client"]["overtime_rate"], 150.0);

        let (status, fetched) = call(&router, "GET", &format!("/api/clients/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["client"]["email"], "contato@padaria.com.br");
        assert_eq!(fetched["client"]["hourly_rate"], 120.5);

        let (status, found) = call(&router, "GET", "/api/clients/search?q=padaria", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["count"], 1);

        let (status, _) = call(&router, "GET", "/api/clients/search", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&router, "GET", "/api/clients/9999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_then_bill_and_download_invoice() {
        let (router, dir) = setup();
        let response = send(&router, multipart_upload("marco.xlsx", &march_export(), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let outcome: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(outcome["month"], 3);
        assert_eq!(outcome["year"], 2024);
        assert_eq!(outcome["processed_records"], 3);

        let (status, periods) = call(&router, "GET", "/api/periods", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(periods[0]["label"], "03/2024");

        // ACME: 11.5h against a 10h contract, one external service.
        let (status, bill) = call(&router, "GET", "/api/client-billing/ACME/3/2024", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bill["overtime_hours"], 1.5);
        assert_eq!(bill["external_services"], 1);
        assert_eq!(bill["total_value"], 1260.5);

        let (status, _) = call(&router, "GET", "/api/client-billing/Ninguem/3/2024", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::builder()
            .uri("/api/generate-pdf/Beta%20Ltda/3/2024")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"fatura_Beta_Ltda_03_2024.pdf\""
        );
        assert!(body_bytes(response).await.starts_with(b"%PDF"));
        assert!(dir.path().join("reports/fatura_Beta_Ltda_03_2024.pdf").is_file());

        let (status, listing) = call(&router, "GET", "/api/list-reports/3/2024", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["total"], 1);

        let request = Request::builder()
            .uri("/api/download-pdf/reports/fatura_Beta_Ltda_03_2024.pdf")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::OK);

        let (status, _) = call(&router, "GET", "/api/download-pdf/reports/..%2Fapp.db", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_month_override_and_batch_admin() {
        let (router, _dir) = setup();
        let response = send(&router, multipart_upload("marco.xlsx", &march_export(), Some("4"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let outcome: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(outcome["month"], 4);
        let batch_id = outcome["batch_id"].as_str().unwrap().to_string();

        let (status, batches) = call(&router, "GET", "/api/admin/upload-batches/4/2024", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(batches["batches"][0]["batch_id"], batch_id.as_str());
        assert_eq!(batches["batches"][0]["clients"], json!(["ACME", "Beta Ltda"]));

        let (status, deleted) =
            call(&router, "DELETE", &format!("/api/admin/delete-batch/{}", batch_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["deleted_records"], 3);

        let (status, _) =
            call(&router, "DELETE", &format!("/api/admin/delete-batch/{}", batch_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&router, "DELETE", "/api/admin/delete-period/4/2024", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_out_of_range_values_are_rejected_and_server_keeps_serving() {
        let (router, _dir) = setup();
        let response = send(&router, multipart_upload("marco.xlsx", &march_export(), None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let (status, client) = call(&router, "GET", "/api/clients/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(client["client"]["name"], "ACME");

        let (status, _) = call(
            &router,
            "PUT",
            "/api/clients/1",
            Some(json!({ "hourly_rate": "70000000000000000000000000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (c, value) in ["Cliente", "Data de finalização", "Tempo total de atendimento"]
            .iter()
            .enumerate()
        {
            sheet.write_string(0, c as u16, *value).unwrap();
        }
        sheet.write_string(1, 0, "ACME").unwrap();
        sheet.write_string(1, 1, "30/03/2024 10:00").unwrap();
        sheet.write_number(1, 2, 1e30).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();
        let response = send(&router, multipart_upload("enorme.xlsx", &bytes, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, bill) = call(&router, "GET", "/api/billing/3/2024", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bill["summary"]["total_clients"], 2);
        let (status, periods) = call(&router, "GET", "/api/periods", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(periods[0]["total_tickets"], 3);
    }

    #[tokio::test]
    async fn test_selected_zip_requires_clients() {
        let (router, _dir) = setup();
        let (status, body) = call(
            &router,
            "POST",
            "/api/generate-selected-zip/3/2024",
            Some(json!({ "clients": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Nenhum cliente selecionado");
    }
}
