// src/ingest_tests.rs

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::error::AppError;
    use crate::ingest::*;
    use crate::models::{Period, TicketFields};
    use crate::{client_store, ticket_store};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use rust_decimal::Decimal;
    use rust_xlsxwriter::{Format, Workbook};

    const HEADERS: [&str; 8] = [
        "Ticket",
        "Cliente",
        "Técnico",
        " Categoria primária ",
        "Data de finalização",
        "Atendimento externo?",
        "Tempo total de atendimento",
        "Coluna desconhecida",
    ];

    // Builds an export with one row per entry: (ticket, client, tech, category, completed, external, time)
    fn export_bytes(rows: &[(&str, &str, &str, &str, &str, &str, &str)]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in HEADERS.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (i, row) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            let extra = if row.0.is_empty() { "" } else { "ignorado" };
            let values = [row.0, row.1, row.2, row.3, row.4, row.5, row.6, extra];
            for (col, value) in values.iter().enumerate() {
                if !value.is_empty() {
                    sheet.write_string(r, col as u16, *value).unwrap();
                }
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_convert_time_to_hours_formats() {
        let hours = |text: &str| convert_time_to_hours(text).unwrap();
        assert_eq!(hours("1:30"), dec!(1.5));
        assert_eq!(hours("0:45:00"), dec!(0.75));
        assert_eq!(hours("2:00:36"), dec!(2.01));
        assert_eq!(hours("2.5"), dec!(2.5));
        assert_eq!(hours("3,25"), dec!(3.25));
        assert_eq!(hours("aprox. 4 horas"), dec!(4));
        assert_eq!(hours("sem registro"), dec!(0));
        assert_eq!(hours(""), dec!(0));
    }

    #[test]
    fn test_minutes_keep_full_precision() {
        let third = convert_time_to_hours("0:20").unwrap();
        assert!(third > dec!(0.3333));
        assert_eq!((third * dec!(3)).round_dp(2), dec!(1));
    }

    #[test]
    fn test_overflowing_time_text_is_an_error() {
        let text = format!("{}:59", Decimal::MAX);
        assert!(matches!(convert_time_to_hours(&text), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_convert_to_boolean_values() {
        for yes in ["Sim", "yes", "TRUE", "1", "verdadeiro", " sim "] {
            assert_eq!(convert_to_boolean(yes), Some(true), "{}", yes);
        }
        for no in ["Não", "nao", "no", "false", "0", "Falso"] {
            assert_eq!(convert_to_boolean(no), Some(false), "{}", no);
        }
        assert_eq!(convert_to_boolean("talvez"), None);
    }

    #[test]
    fn test_excel_serial_dates() {
        let dt = excel_serial_to_datetime(45366.5).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(dt.time().to_string(), "12:00:00");
        assert!(excel_serial_to_datetime(-1.0).is_none());
    }

    #[test]
    fn test_parse_date_text_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date_text("15/03/2024 10:30").unwrap().date(), expected);
        assert_eq!(parse_date_text("2024-03-15T08:00:00").unwrap().date(), expected);
        assert_eq!(parse_date_text("2024-03-15").unwrap().date(), expected);
        assert!(parse_date_text("março").is_none());
    }

    #[test]
    fn test_parse_workbook_maps_known_headers() {
        let bytes = export_bytes(&[
            ("101", " ACME ", "Ana", "Rede", "15/03/2024 10:00", "Sim", "1:30"),
            ("", "", "", "", "", "", ""),
            ("102", "Beta", "Bruno", "Hardware", "2024-03-20 16:00:00", "não", "2"),
        ]);
        let tickets = parse_workbook(&bytes).unwrap();

        assert_eq!(tickets.len(), 2);
        let first = &tickets[0];
        assert_eq!(first.ticket_id.as_deref(), Some("101"));
        assert_eq!(first.client_name.as_deref(), Some("ACME"));
        assert_eq!(first.primary_category.as_deref(), Some("Rede"));
        assert_eq!(first.external_service, Some(true));
        assert_eq!(first.total_service_time, dec!(1.5));
        assert_eq!(tickets[1].external_service, Some(false));
        assert_eq!(tickets[1].total_service_time, dec!(2));
    }

    #[test]
    fn test_parse_workbook_converts_typed_cells() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in HEADERS.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        let completed = Format::new().set_num_format("dd/mm/yyyy hh:mm");
        let duration = Format::new().set_num_format("[h]:mm");
        sheet.write_number(1, 0, 501.0).unwrap();
        sheet.write_string(1, 1, "ACME").unwrap();
        // 2024-03-15 10:30 as an Excel serial date
        sheet.write_number_with_format(1, 4, 45366.4375, &completed).unwrap();
        sheet.write_boolean(1, 5, true).unwrap();
        sheet.write_number_with_format(1, 6, 1.5 / 24.0, &duration).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let tickets = parse_workbook(&bytes).unwrap();
        assert_eq!(tickets.len(), 1);
        let ticket = &tickets[0];
        assert_eq!(ticket.ticket_id.as_deref(), Some("501"));
        assert_eq!(
            ticket.completion_date,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(10, 30, 0)
        );
        assert_eq!(ticket.external_service, Some(true));
        assert_eq!(ticket.total_service_time, dec!(1.5));
    }

    #[test]
    fn test_service_time_above_limit_names_the_row() {
        let bytes = export_bytes(&[
            ("1", "ACME", "Ana", "Rede", "10/03/2024", "", "1:00"),
            ("2", "ACME", "Ana", "Rede", "11/03/2024", "", "20000:00"),
        ]);
        match parse_workbook(&bytes) {
            Err(AppError::Spreadsheet(message)) => assert!(message.contains("linha 3"), "{}", message),
            other => panic!("expected a spreadsheet error, got {:?}", other),
        }

        let bytes = export_bytes(&[("1", "ACME", "Ana", "Rede", "10/03/2024", "", "10000")]);
        assert_eq!(parse_workbook(&bytes).unwrap()[0].total_service_time, dec!(10000));
    }

    #[test]
    fn test_non_spreadsheet_bytes_are_rejected() {
        let result = parse_workbook(b"definitely not a workbook");
        assert!(matches!(result, Err(AppError::Spreadsheet(_))));
    }

    #[test]
    fn test_period_inference_and_overrides() {
        let bytes = export_bytes(&[
            ("1", "ACME", "Ana", "Rede", "28/02/2024 10:00", "", "1"),
            ("2", "ACME", "Ana", "Rede", "02/03/2024 09:00", "", "1"),
        ]);
        let tickets = parse_workbook(&bytes).unwrap();
        assert_eq!(infer_period(&tickets), Some(Period::new(3, 2024).unwrap()));
        assert_eq!(
            resolve_period(&tickets, Some(1), None).unwrap(),
            Period::new(1, 2024).unwrap()
        );
        assert_eq!(
            resolve_period(&tickets, None, Some(2023)).unwrap(),
            Period::new(3, 2023).unwrap()
        );

        let undated = vec![TicketFields::default()];
        assert!(matches!(
            resolve_period(&undated, None, None),
            Err(AppError::BadRequest(_))
        ));
        assert!(resolve_period(&undated, Some(13), Some(2024)).is_err());
    }

    #[test]
    fn test_upload_statistics_rollups() {
        let bytes = export_bytes(&[
            ("1", "ACME", "Ana", "Rede", "01/03/2024", "Sim", "2"),
            ("2", "ACME", "Bruno", "Rede", "02/03/2024", "Não", "1:30"),
            ("3", "Beta", "Ana", "Hardware", "03/03/2024", "Sim", "0:30"),
        ]);
        let stats = upload_statistics(&parse_workbook(&bytes).unwrap()).unwrap();
        assert_eq!(stats.total_tickets, 3);
        assert_eq!(stats.unique_clients, 2);
        assert_eq!(stats.unique_technicians, 2);
        assert_eq!(stats.total_hours, dec!(4));
        assert_eq!(stats.hours_by_client["ACME"], dec!(3.5));
        assert_eq!(stats.external_services_by_technician["Ana"], 2);
        assert_eq!(stats.primary_categories["Rede"], 2);
        assert_eq!(stats.technician_details["Ana"].unique_clients, 2);
    }

    #[test]
    fn test_import_registers_clients_and_replaces_period() {
        let db = Database::open_in_memory().unwrap();
        let first = export_bytes(&[
            ("1", "ACME", "Ana", "Rede", "10/03/2024", "", "1"),
            ("2", "Beta", "Ana", "Rede", "11/03/2024", "", "1"),
        ]);
        let outcome = import_workbook(&db, &first, "marco.xlsx", None, None).unwrap();
        assert_eq!((outcome.month, outcome.year), (3, 2024));
        assert_eq!(outcome.processed_records, 2);
        assert_eq!(outcome.new_clients, vec!["ACME".to_string(), "Beta".to_string()]);
        assert_eq!(outcome.batch_id.len(), 16);

        let second = export_bytes(&[("3", "ACME", "Ana", "Rede", "12/03/2024", "", "4")]);
        let outcome = import_workbook(&db, &second, "marco_v2.xlsx", None, None).unwrap();
        assert!(outcome.new_clients.is_empty());

        let conn = db.lock();
        let march = Period::new(3, 2024).unwrap();
        let tickets = ticket_store::tickets_for_period(&conn, march).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].fields.ticket_id.as_deref(), Some("3"));
        assert_eq!(client_store::list_clients(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_client_registration_keeps_previous_import() {
        let db = Database::open_in_memory().unwrap();
        let first = export_bytes(&[("1", "ACME", "Ana", "Rede", "10/03/2024", "", "1")]);
        import_workbook(&db, &first, "marco.xlsx", None, None).unwrap();

        db.lock()
            .execute_batch(
                "CREATE TRIGGER refuse_clients BEFORE INSERT ON clients
                 BEGIN SELECT RAISE(ABORT, 'cadastro bloqueado'); END;",
            )
            .unwrap();

        let second = export_bytes(&[("2", "Gamma", "Ana", "Rede", "12/03/2024", "", "3")]);
        let result = import_workbook(&db, &second, "marco_v2.xlsx", None, None);
        assert!(matches!(result, Err(AppError::Database(_))));

        let conn = db.lock();
        let march = Period::new(3, 2024).unwrap();
        let tickets = ticket_store::tickets_for_period(&conn, march).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].fields.client_name.as_deref(), Some("ACME"));
        let batches = ticket_store::list_batches(&conn, Some(march)).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].filename, "marco.xlsx");
    }
}
