// src/pdf.rs
use chrono::NaiveDateTime;
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
    Point,
};
use rust_decimal::Decimal;
use std::io::BufWriter;

use crate::billing::{ClientBilling, PeriodBilling};
use crate::error::AppError;
use crate::models::Period;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN_LEFT: f32 = 15.0;
const MARGIN_RIGHT: f32 = 195.0;
const TOP_Y: f32 = 280.0;
const BOTTOM_Y: f32 = 20.0;

const SUBJECT_MAX_CHARS: usize = 30;
const CLIENT_NAME_MAX_CHARS: usize = 25;

// --- Formatting helpers ---

/// Brazilian currency format: `R$ 1.234,56`.
pub fn format_brl(value: Decimal) -> String {
    let rounded = value.round_dp(2);
    let plain = format!("{:.2}", rounded.abs());
    let (int_part, dec_part) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}R$ {},{}", sign, grouped, dec_part)
}

pub fn format_hours(hours: Decimal) -> String {
    format!("{:.2}h", hours.round_dp(2))
}

/// Cuts `text` to `max_chars` characters, appending `...` when something was cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Client names end up in file paths and `Content-Disposition` headers.
fn safe_name(client_name: &str) -> String {
    client_name
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | '"' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

pub fn invoice_filename(client_name: &str, period: Period) -> String {
    format!(
        "fatura_{}_{:02}_{}.pdf",
        safe_name(client_name),
        period.month,
        period.year
    )
}

pub fn summary_filename(period: Period) -> String {
    format!("resumo_faturamento_{:02}_{}.pdf", period.month, period.year)
}

pub fn selected_zip_filename(period: Period) -> String {
    format!("faturas_selecionadas_{:02}_{}.zip", period.month, period.year)
}

// --- Page writer ---

/// Writes text top-down and opens a new A4 page when the cursor reaches the bottom margin.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, AppError> {
        let (doc, page1, layer1) = PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let layer = doc.get_page(page1).get_layer(layer1);
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| AppError::Pdf(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| AppError::Pdf(e.to_string()))?;
        Ok(Self {
            doc,
            layer,
            font,
            bold,
            y: TOP_Y,
            pages: 1,
        })
    }

    fn text(&self, text: &str, size: f32, x: f32) {
        self.layer.use_text(text, size, Mm(x), Mm(self.y), &self.font);
    }

    fn bold_text(&self, text: &str, size: f32, x: f32) {
        self.layer.use_text(text, size, Mm(x), Mm(self.y), &self.bold);
    }

    fn row(&self, cells: &[(&str, f32)], size: f32, bold: bool) {
        for (text, x) in cells {
            if bold {
                self.bold_text(text, size, *x);
            } else {
                self.text(text, size, *x);
            }
        }
    }

    fn rule(&self) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(MARGIN_LEFT), Mm(self.y)), false),
                (Point::new(Mm(MARGIN_RIGHT), Mm(self.y)), false),
            ],
            is_closed: false,
        });
    }

    fn advance(&mut self, dy: f32) {
        self.y -= dy;
    }

    /// Returns true when a new page was started.
    fn ensure_space(&mut self, needed: f32) -> bool {
        if self.y - needed >= BOTTOM_Y {
            return false;
        }
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Layer {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = TOP_Y;
        true
    }

    fn section(&mut self, title: &str) {
        self.ensure_space(16.0);
        self.bold_text(title, 13.0, MARGIN_LEFT);
        self.advance(8.0);
    }

    fn finish(self) -> Result<Vec<u8>, AppError> {
        let mut writer = BufWriter::new(Vec::<u8>::new());
        self.doc
            .save(&mut writer)
            .map_err(|e| AppError::Pdf(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| AppError::Pdf(e.to_string()))
    }
}

fn generated_line(generated_at: NaiveDateTime) -> String {
    format!("Gerado em: {}", generated_at.format("%d/%m/%Y às %H:%M"))
}

// --- Client invoice ---

pub fn invoice_pdf(billing: &ClientBilling, generated_at: NaiveDateTime) -> Result<Vec<u8>, AppError> {
    let mut page = PageWriter::new(&format!("Fatura {}", billing.client_name))?;

    page.bold_text(
        &format!("Relatório de Faturamento - {}", billing.client_name),
        18.0,
        MARGIN_LEFT,
    );
    page.advance(9.0);
    page.text(
        &format!("Período: {:02}/{}", billing.month, billing.year),
        12.0,
        MARGIN_LEFT,
    );
    page.advance(6.0);
    page.text(&generated_line(generated_at), 10.0, MARGIN_LEFT);
    page.advance(5.0);
    page.rule();
    page.advance(10.0);

    // Executive summary
    page.section("Resumo Executivo");
    let summary = [
        ("Horas Contratuais", format_hours(billing.contract_hours)),
        ("Horas Utilizadas", format_hours(billing.total_hours)),
        ("Horas Excedentes", format_hours(billing.overtime_hours)),
        ("Atendimentos Externos", billing.external_services.to_string()),
    ];
    for (label, value) in &summary {
        page.row(&[(*label, MARGIN_LEFT), (value.as_str(), 110.0)], 10.0, false);
        page.advance(5.5);
    }
    page.advance(1.5);
    let total = format_brl(billing.total_value);
    page.row(
        &[("Valor Total a Pagar", MARGIN_LEFT), (total.as_str(), 110.0)],
        12.0,
        true,
    );
    page.advance(12.0);

    // Cost breakdown
    page.section("Detalhamento de Custos");
    let columns = [MARGIN_LEFT, 85.0, 120.0, 160.0];
    page.row(
        &[
            ("Descrição", columns[0]),
            ("Quantidade", columns[1]),
            ("Valor Unitário", columns[2]),
            ("Valor Total", columns[3]),
        ],
        9.0,
        true,
    );
    page.advance(2.5);
    page.rule();
    page.advance(5.0);

    let mut lines: Vec<[String; 4]> = Vec::new();
    if billing.used_contract_hours > Decimal::ZERO {
        lines.push([
            "Horas Contratuais".to_string(),
            format_hours(billing.used_contract_hours),
            format_brl(billing.rates.hourly_rate),
            format_brl(billing.contract_value),
        ]);
    }
    if billing.overtime_hours > Decimal::ZERO {
        lines.push([
            "Horas Excedentes".to_string(),
            format_hours(billing.overtime_hours),
            format_brl(billing.rates.overtime_rate),
            format_brl(billing.overtime_value),
        ]);
    }
    if billing.external_services > 0 {
        lines.push([
            "Atendimentos Externos".to_string(),
            billing.external_services.to_string(),
            format_brl(billing.rates.external_service_rate),
            format_brl(billing.external_services_value),
        ]);
    }
    for line in &lines {
        page.row(
            &[
                (line[0].as_str(), columns[0]),
                (line[1].as_str(), columns[1]),
                (line[2].as_str(), columns[2]),
                (line[3].as_str(), columns[3]),
            ],
            9.0,
            false,
        );
        page.advance(5.0);
    }
    page.row(
        &[("TOTAL:", columns[2]), (total.as_str(), columns[3])],
        10.0,
        true,
    );
    page.advance(12.0);

    // Tickets
    page.section("Lista de Chamados Atendidos");
    if billing.tickets.is_empty() {
        page.text("Nenhum chamado encontrado para este período.", 10.0, MARGIN_LEFT);
        page.advance(6.0);
    } else {
        let columns = [MARGIN_LEFT, 35.0, 100.0, 135.0, 163.0, 180.0];
        let header = |page: &mut PageWriter| {
            page.row(
                &[
                    ("Ticket", columns[0]),
                    ("Assunto", columns[1]),
                    ("Técnico", columns[2]),
                    ("Data Finalização", columns[3]),
                    ("Horas", columns[4]),
                    ("Externo", columns[5]),
                ],
                8.0,
                true,
            );
            page.advance(2.0);
            page.rule();
            page.advance(4.5);
        };
        header(&mut page);

        for ticket in &billing.tickets {
            if page.ensure_space(5.0) {
                header(&mut page);
            }
            let fields = &ticket.fields;
            let subject = truncate_with_ellipsis(
                fields.subject.as_deref().unwrap_or_default(),
                SUBJECT_MAX_CHARS,
            );
            let completed = fields
                .completion_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_default();
            let technician =
                truncate_with_ellipsis(fields.technician.as_deref().unwrap_or_default(), 18);
            let hours = format_hours(fields.total_service_time);
            let external = if fields.is_external() { "Sim" } else { "Não" };
            page.row(
                &[
                    (fields.ticket_id.as_deref().unwrap_or_default(), columns[0]),
                    (subject.as_str(), columns[1]),
                    (technician.as_str(), columns[2]),
                    (completed.as_str(), columns[3]),
                    (hours.as_str(), columns[4]),
                    (external, columns[5]),
                ],
                8.0,
                false,
            );
            page.advance(4.5);
        }
    }
    page.advance(10.0);

    // Footer
    page.ensure_space(40.0);
    page.bold_text("Observações:", 10.0, MARGIN_LEFT);
    page.advance(5.0);
    for note in [
        "- Este relatório foi gerado automaticamente pelo Sistema de Faturamento Helpdesk",
        "- Os valores apresentados referem-se aos atendimentos realizados no período especificado",
        "- Para dúvidas ou esclarecimentos, entre em contato conosco",
    ] {
        page.text(note, 9.0, MARGIN_LEFT);
        page.advance(4.5);
    }
    page.advance(3.0);
    page.text("Forma de Pagamento: Conforme contrato estabelecido", 9.0, MARGIN_LEFT);
    page.advance(4.5);
    page.text("Vencimento: Conforme condições contratuais", 9.0, MARGIN_LEFT);

    page.finish()
}

// --- Period summary ---

pub fn summary_pdf(billing: &PeriodBilling, generated_at: NaiveDateTime) -> Result<Vec<u8>, AppError> {
    let mut page = PageWriter::new("Resumo de Faturamento")?;

    page.bold_text(
        &format!("Resumo de Faturamento - {:02}/{}", billing.month, billing.year),
        18.0,
        MARGIN_LEFT,
    );
    page.advance(8.0);
    page.text(&generated_line(generated_at), 10.0, MARGIN_LEFT);
    page.advance(5.0);
    page.rule();
    page.advance(10.0);

    page.section("Resumo Geral do Período");
    let totals = [
        format!("Total de Clientes Faturados: {}", billing.summary.total_clients),
        format!("Faturamento Total: {}", format_brl(billing.summary.total_value)),
        format!("Total de Horas: {}", format_hours(billing.summary.total_hours)),
        format!(
            "Horas Excedentes: {}",
            format_hours(billing.summary.total_overtime_hours)
        ),
        format!(
            "Atendimentos Externos: {}",
            billing.summary.total_external_services
        ),
    ];
    for line in &totals {
        page.text(line, 10.0, MARGIN_LEFT);
        page.advance(5.5);
    }
    page.advance(8.0);

    page.section("Faturamento por Cliente");
    let columns = [MARGIN_LEFT, 80.0, 110.0, 140.0, 165.0];
    let header = |page: &mut PageWriter| {
        page.row(
            &[
                ("Cliente", columns[0]),
                ("Horas Utilizadas", columns[1]),
                ("Horas Excedentes", columns[2]),
                ("Atend. Externos", columns[3]),
                ("Valor Total", columns[4]),
            ],
            9.0,
            true,
        );
        page.advance(2.5);
        page.rule();
        page.advance(5.0);
    };
    header(&mut page);

    let mut clients: Vec<&ClientBilling> = billing.clients.iter().collect();
    clients.sort_by(|a, b| b.total_value.cmp(&a.total_value));
    for client in clients {
        if page.ensure_space(5.0) {
            header(&mut page);
        }
        let name = truncate_with_ellipsis(&client.client_name, CLIENT_NAME_MAX_CHARS);
        let hours = format_hours(client.total_hours);
        let overtime = format_hours(client.overtime_hours);
        let external = client.external_services.to_string();
        let value = format_brl(client.total_value);
        page.row(
            &[
                (name.as_str(), columns[0]),
                (hours.as_str(), columns[1]),
                (overtime.as_str(), columns[2]),
                (external.as_str(), columns[3]),
                (value.as_str(), columns[4]),
            ],
            9.0,
            false,
        );
        page.advance(5.0);
    }

    page.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{compute_billing, summarize};
    use crate::models::{Client, Ticket, TicketFields};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn generated_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn client(name: &str) -> Client {
        Client {
            id: 1,
            name: name.to_string(),
            contact: None,
            sector: None,
            email: None,
            phone: None,
            whatsapp_contact: None,
            address: None,
            notes: None,
            contract_hours: dec!(10),
            hourly_rate: dec!(100),
            overtime_rate: dec!(115),
            external_service_rate: dec!(88),
            active: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn tickets(count: usize) -> Vec<Ticket> {
        (0..count)
            .map(|i| Ticket {
                id: i as i64,
                fields: TicketFields {
                    ticket_id: Some(format!("{}", 1000 + i)),
                    client_name: Some("ACME".to_string()),
                    subject: Some("Impressora do financeiro não imprime em rede".to_string()),
                    technician: Some("Ana".to_string()),
                    total_service_time: dec!(0.75),
                    external_service: Some(i % 4 == 0),
                    completion_date: NaiveDate::from_ymd_opt(2024, 3, 1 + (i % 28) as u32)
                        .and_then(|d| d.and_hms_opt(17, 0, 0)),
                    ..Default::default()
                },
                processing_month: 3,
                processing_year: 2024,
                upload_batch_id: None,
                created_at: generated_at(),
            })
            .collect()
    }

    #[test]
    fn test_format_brl() {
        assert_eq!(format_brl(dec!(1234.56)), "R$ 1.234,56");
        assert_eq!(format_brl(dec!(0)), "R$ 0,00");
        assert_eq!(format_brl(dec!(88)), "R$ 88,00");
        assert_eq!(format_brl(dec!(1234567.891)), "R$ 1.234.567,89");
        assert_eq!(format_brl(dec!(-15.5)), "-R$ 15,50");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate_with_ellipsis("curto", 30), "curto");
        assert_eq!(truncate_with_ellipsis("ação ação", 4), "ação...");
    }

    #[test]
    fn test_report_filenames() {
        let march = Period::new(3, 2024).unwrap();
        assert_eq!(
            invoice_filename("Padaria São João/Centro", march),
            "fatura_Padaria_São_João_Centro_03_2024.pdf"
        );
        assert_eq!(
            invoice_filename("Loja \"Central\" \\ Sul", march),
            "fatura_Loja__Central____Sul_03_2024.pdf"
        );
        assert_eq!(summary_filename(march), "resumo_faturamento_03_2024.pdf");
        assert_eq!(selected_zip_filename(march), "faturas_selecionadas_03_2024.zip");
    }

    #[test]
    fn test_invoice_pdf_spans_pages_for_long_ticket_lists() {
        let march = Period::new(3, 2024).unwrap();
        let billing = compute_billing(&client("ACME"), march, tickets(150)).unwrap();
        let bytes = invoice_pdf(&billing, generated_at()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        let empty = compute_billing(&client("ACME"), march, Vec::new()).unwrap();
        assert!(invoice_pdf(&empty, generated_at()).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn test_summary_pdf_renders() {
        let march = Period::new(3, 2024).unwrap();
        let clients = vec![
            compute_billing(&client("ACME"), march, tickets(3)).unwrap(),
            compute_billing(
                &client("Cliente com um nome realmente muito comprido"),
                march,
                tickets(20),
            )
            .unwrap(),
        ];
        let summary = summarize(&clients).unwrap();
        let billing = PeriodBilling {
            month: 3,
            year: 2024,
            clients,
            summary,
        };
        let bytes = summary_pdf(&billing, generated_at()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
