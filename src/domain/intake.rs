use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::einvoice::EInvoiceSource;

pub const COL_REFERENCE: &str = "reference";
pub const COL_STATUS: &str = "status";
pub const COL_DATE: &str = "date";
pub const COL_VENDOR: &str = "vendor";
pub const COL_EMPLOYEE: &str = "employee";
pub const COL_CURRENCY: &str = "currency";
pub const COL_DEPARTMENT: &str = "department";
pub const COL_MEMO: &str = "memo";
pub const COL_INVOICE_NUMBER: &str = "invoice number";
pub const COL_ITEM: &str = "item";
pub const COL_ACCOUNT: &str = "account";
pub const COL_CATEGORY: &str = "category";
pub const COL_DESCRIPTION: &str = "description";
pub const COL_QUANTITY: &str = "quantity";
pub const COL_RATE: &str = "rate";
pub const COL_AMOUNT: &str = "amount";
pub const COL_COMPANY_NAME: &str = "company name";
pub const COL_EMAIL: &str = "email";
pub const COL_PHONE: &str = "phone";
pub const COL_SUBSIDIARY: &str = "subsidiary";
pub const COL_TIN: &str = "tin";
pub const COL_SST_NUMBER: &str = "sst number";
pub const COL_MSIC_CODE: &str = "msic code";
pub const COL_ADDRESS: &str = "address";
pub const COL_STATE: &str = "state";
pub const COL_COUNTRY: &str = "country";

pub const SYNCED_PREFIX: &str = "Synced";

/// Spreadsheet tabs the finance team fills in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntakeKind {
    PurchaseOrder,
    VendorBill,
    ExpenseReport,
    Vendor,
}

impl IntakeKind {
    pub const ALL: [IntakeKind; 4] = [
        IntakeKind::Vendor,
        IntakeKind::PurchaseOrder,
        IntakeKind::VendorBill,
        IntakeKind::ExpenseReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeKind::PurchaseOrder => "purchase_order",
            IntakeKind::VendorBill => "vendor_bill",
            IntakeKind::ExpenseReport => "expense_report",
            IntakeKind::Vendor => "vendor",
        }
    }

    pub fn netsuite_record_type(&self) -> &'static str {
        match self {
            IntakeKind::PurchaseOrder => "purchaseOrder",
            IntakeKind::VendorBill => "vendorBill",
            IntakeKind::ExpenseReport => "expenseReport",
            IntakeKind::Vendor => "vendor",
        }
    }

    pub fn external_id_prefix(&self) -> &'static str {
        match self {
            IntakeKind::PurchaseOrder => "PO",
            IntakeKind::VendorBill => "VB",
            IntakeKind::ExpenseReport => "ER",
            IntakeKind::Vendor => "VEN",
        }
    }

    pub fn is_transaction(&self) -> bool {
        !matches!(self, IntakeKind::Vendor)
    }
}

impl fmt::Display for IntakeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntakeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        IntakeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unsupported intake kind: {value}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based row number in the sheet, header included.
    pub row_number: u32,
    pub cells: Vec<String>,
}

/// A sheet range read with its first row as the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetTable {
    pub sheet: String,
    pub first_row: u32,
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
    index: HashMap<String, usize>,
}

impl SheetTable {
    /// `first_row` is the sheet row holding the header.
    pub fn new(sheet: impl Into<String>, first_row: u32, values: Vec<Vec<String>>) -> Self {
        let mut values = values.into_iter();
        let headers: Vec<String> = values.next().unwrap_or_default();
        let index = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| (normalize_header(header), idx))
            .collect();
        let rows = values
            .enumerate()
            .map(|(offset, mut cells)| {
                if cells.len() < headers.len() {
                    cells.resize(headers.len(), String::new());
                }
                SheetRow {
                    row_number: first_row + 1 + offset as u32,
                    cells,
                }
            })
            .collect();
        Self {
            sheet: sheet.into(),
            first_row,
            headers,
            rows,
            index,
        }
    }

    pub fn column(&self, header: &str) -> Option<usize> {
        self.index.get(&normalize_header(header)).copied()
    }

    pub fn cell<'a>(&self, row: &'a SheetRow, header: &str) -> Option<&'a str> {
        let idx = self.column(header)?;
        row.cells
            .get(idx)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub date: Option<NaiveDate>,
    pub counterparty: Option<String>,
    pub currency: Option<String>,
    pub department: Option<String>,
    pub memo: Option<String>,
    pub invoice_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeLine {
    pub row_number: u32,
    pub item: Option<String>,
    pub account: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub date: Option<NaiveDate>,
    pub quantity: Option<f64>,
    pub rate_cents: Option<i64>,
    pub amount_cents: Option<i64>,
}

impl IntakeLine {
    /// Explicit amount, or quantity × rate when only those are given.
    pub fn effective_amount_cents(&self) -> Result<Option<i64>, String> {
        if let Some(amount) = self.amount_cents {
            return Ok(Some(amount));
        }
        let Some(rate) = self.rate_cents else {
            return Ok(None);
        };
        let cents = (rate as f64 * self.quantity.unwrap_or(1.0)).round();
        if !cents.is_finite() || cents.abs() > MAX_AMOUNT_CENTS as f64 {
            return Err(format!("row {}: quantity × rate is out of range", self.row_number));
        }
        Ok(Some(cents as i64))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorIntake {
    pub company_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub currency: Option<String>,
    pub subsidiary: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub einvoice: EInvoiceSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntakePayload {
    Transaction {
        header: DocumentHeader,
        lines: Vec<IntakeLine>,
    },
    Vendor(VendorIntake),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntakeDocument {
    pub kind: IntakeKind,
    pub reference: String,
    pub row_numbers: Vec<u32>,
    pub payload: IntakePayload,
}

impl IntakeDocument {
    pub fn total_cents(&self) -> Result<i64, String> {
        let IntakePayload::Transaction { lines, .. } = &self.payload else {
            return Ok(0);
        };
        lines.iter().try_fold(0i64, |total, line| {
            let amount = line.effective_amount_cents()?.unwrap_or(0);
            total
                .checked_add(amount)
                .filter(|sum| sum.abs() <= MAX_AMOUNT_CENTS)
                .ok_or_else(|| format!("document total is out of range at row {}", line.row_number))
        })
    }
}

/// A document that could not be read from the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentError {
    pub reference: Option<String>,
    pub row_numbers: Vec<u32>,
    pub message: String,
}

/// Groups sheet rows into documents by their `Reference` column, keeping the order
/// in which references first appear. Rows already marked as synced are ignored.
pub fn group_documents(
    kind: IntakeKind,
    table: &SheetTable,
) -> Vec<Result<IntakeDocument, DocumentError>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&SheetRow>> = HashMap::new();
    let mut results = Vec::new();

    for row in &table.rows {
        if row.cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if table
            .cell(row, COL_STATUS)
            .is_some_and(|status| status.starts_with(SYNCED_PREFIX))
        {
            continue;
        }
        let Some(reference) = table.cell(row, COL_REFERENCE) else {
            results.push(Err(DocumentError {
                reference: None,
                row_numbers: vec![row.row_number],
                message: "missing reference".to_string(),
            }));
            continue;
        };
        let reference = reference.to_string();
        if !groups.contains_key(&reference) {
            order.push(reference.clone());
        }
        groups.entry(reference).or_default().push(row);
    }

    for reference in order {
        let rows = groups.remove(&reference).unwrap_or_default();
        let row_numbers: Vec<u32> = rows.iter().map(|row| row.row_number).collect();
        let parsed = match kind {
            IntakeKind::Vendor => parse_vendor(table, &rows),
            _ => parse_transaction(kind, table, &rows),
        };
        results.push(
            parsed
                .map(|payload| IntakeDocument {
                    kind,
                    reference: reference.clone(),
                    row_numbers: row_numbers.clone(),
                    payload,
                })
                .map_err(|message| DocumentError {
                    reference: Some(reference.clone()),
                    row_numbers,
                    message,
                }),
        );
    }

    results
}

fn parse_transaction(
    kind: IntakeKind,
    table: &SheetTable,
    rows: &[&SheetRow],
) -> Result<IntakePayload, String> {
    let first = rows.first().ok_or_else(|| "document has no rows".to_string())?;
    let counterparty_column = if kind == IntakeKind::ExpenseReport {
        COL_EMPLOYEE
    } else {
        COL_VENDOR
    };
    let header = DocumentHeader {
        date: optional(table.cell(first, COL_DATE), parse_sheet_date)
            .map_err(|err| format!("row {}: {err}", first.row_number))?,
        counterparty: owned(table.cell(first, counterparty_column)),
        currency: owned(table.cell(first, COL_CURRENCY)),
        department: owned(table.cell(first, COL_DEPARTMENT)),
        memo: owned(table.cell(first, COL_MEMO)),
        invoice_number: owned(table.cell(first, COL_INVOICE_NUMBER)),
    };

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let at_row = |err: String| format!("row {}: {err}", row.row_number);
        lines.push(IntakeLine {
            row_number: row.row_number,
            item: owned(table.cell(row, COL_ITEM)),
            account: owned(table.cell(row, COL_ACCOUNT)),
            category: owned(table.cell(row, COL_CATEGORY)),
            description: owned(table.cell(row, COL_DESCRIPTION)),
            department: owned(table.cell(row, COL_DEPARTMENT)),
            date: optional(table.cell(row, COL_DATE), parse_sheet_date).map_err(at_row)?,
            quantity: optional(table.cell(row, COL_QUANTITY), parse_quantity).map_err(at_row)?,
            rate_cents: optional(table.cell(row, COL_RATE), parse_amount_cents).map_err(at_row)?,
            amount_cents: optional(table.cell(row, COL_AMOUNT), parse_amount_cents)
                .map_err(at_row)?,
        });
    }

    Ok(IntakePayload::Transaction { header, lines })
}

fn parse_vendor(table: &SheetTable, rows: &[&SheetRow]) -> Result<IntakePayload, String> {
    let first = rows.first().ok_or_else(|| "document has no rows".to_string())?;
    let company_name = table
        .cell(first, COL_COMPANY_NAME)
        .ok_or_else(|| format!("row {}: missing company name", first.row_number))?
        .to_string();
    Ok(IntakePayload::Vendor(VendorIntake {
        company_name,
        email: owned(table.cell(first, COL_EMAIL)),
        phone: owned(table.cell(first, COL_PHONE)),
        currency: owned(table.cell(first, COL_CURRENCY)),
        subsidiary: owned(table.cell(first, COL_SUBSIDIARY)),
        state: owned(table.cell(first, COL_STATE)),
        country: owned(table.cell(first, COL_COUNTRY)),
        einvoice: EInvoiceSource {
            tin: owned(table.cell(first, COL_TIN)),
            sst_number: owned(table.cell(first, COL_SST_NUMBER)),
            msic_code: owned(table.cell(first, COL_MSIC_CODE)),
            address: owned(table.cell(first, COL_ADDRESS)),
            state_code: None,
            country_code: None,
        },
    }))
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn optional<T>(
    value: Option<&str>,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<Option<T>, String> {
    value.map(parse).transpose()
}

/// Largest money value a sheet cell or document may carry: 10 billion, in cents.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000;

const MAX_QUANTITY: f64 = 1_000_000_000.0;

/// Parses a spreadsheet money value into cents. Accepts an optional currency
/// prefix (`RM`, `MYR`, `$`), thousands separators, one decimal point and a
/// leading minus or accounting-style parentheses. Anything else is rejected.
pub fn parse_amount_cents(raw: &str) -> Result<i64, String> {
    let invalid = || format!("invalid amount: {raw}");
    let mut text = raw.trim();
    let mut negative = false;
    if let Some(inner) = text.strip_prefix('(').and_then(|rest| rest.strip_suffix(')')) {
        negative = true;
        text = inner.trim();
    }
    let mut take_sign = |text: &str| -> Result<String, String> {
        match text.strip_prefix('-') {
            Some(_) if negative => Err(invalid()),
            Some(rest) => {
                negative = true;
                Ok(rest.trim_start().to_string())
            }
            None => Ok(text.to_string()),
        }
    };
    let text = take_sign(text)?;

    let start = text
        .find(|c: char| c.is_ascii_digit() || c == '.' || c == '-')
        .ok_or_else(invalid)?;
    let (prefix, number) = text.split_at(start);
    let prefix = prefix.trim();
    if prefix.chars().count() > 3
        || !prefix
            .chars()
            .all(|c| c.is_alphabetic() || CURRENCY_SYMBOLS.contains(&c))
    {
        return Err(invalid());
    }
    let number = take_sign(number.trim())?;

    let (whole, fraction) = number.split_once('.').unwrap_or((number.as_str(), ""));
    let grouped_ok = !whole.starts_with(',')
        && !whole.ends_with(',')
        && !whole.contains(",,")
        && whole.chars().all(|c| c.is_ascii_digit() || c == ',');
    if !grouped_ok
        || !fraction.chars().all(|c| c.is_ascii_digit())
        || (whole.is_empty() && fraction.is_empty())
    {
        return Err(invalid());
    }

    let out_of_range = || format!("amount out of range: {raw}");
    let whole_digits: String = whole.chars().filter(|c| *c != ',').collect();
    let units: i64 = if whole_digits.is_empty() {
        0
    } else {
        whole_digits.parse().map_err(|_| out_of_range())?
    };
    let mut digits = fraction.bytes().map(|b| i64::from(b - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = i64::from(digits.next().is_some_and(|d| d >= 5));
    let cents = units
        .checked_mul(100)
        .and_then(|cents| cents.checked_add(tenths * 10 + hundredths + round_up))
        .filter(|cents| *cents <= MAX_AMOUNT_CENTS)
        .ok_or_else(out_of_range)?;
    Ok(if negative { -cents } else { cents })
}

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

fn parse_quantity(raw: &str) -> Result<f64, String> {
    let quantity = raw
        .trim()
        .replace(',', "")
        .parse::<f64>()
        .map_err(|_| format!("invalid quantity: {raw}"))?;
    if !quantity.is_finite() || quantity.abs() > MAX_QUANTITY {
        return Err(format!("invalid quantity: {raw}"));
    }
    Ok(quantity)
}

/// Accepts ISO dates, day-first slashed dates and Sheets serial day numbers.
pub fn parse_sheet_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
        return Ok(date);
    }
    // Serials start at 1954-10-03 so a bare year such as "2024" is not a date.
    if let Ok(serial) = trimmed.parse::<i64>() {
        if (20_000..=2_958_465).contains(&serial) {
            if let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) {
                return Ok(epoch + Duration::days(serial));
            }
        }
    }
    Err(format!("invalid date: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(row: &[&str]) -> Vec<String> {
        row.iter().map(|s| s.to_string()).collect()
    }

    fn po_table() -> SheetTable {
        SheetTable::new(
            "PO",
            1,
            vec![
                strings(&["Reference", "Date", "Vendor", "Currency", "Item", "Quantity", "Rate", "Amount", "Status"]),
                strings(&["PO-1", "2024-05-02", "Acme", "MYR", "Paper", "2", "10.50", "", ""]),
                strings(&["PO-2", "03/05/2024", "Beta", "MYR", "Ink", "1", "", "99", ""]),
                strings(&["PO-1", "", "", "", "Toner", "1", "", "1,200.00"]),
                strings(&["PO-3", "2024-05-04", "Gamma", "MYR", "Pens", "1", "", "5", "Synced 881"]),
                strings(&["", "", "", "", "", "", "", "", ""]),
            ],
        )
    }

    #[test]
    fn groups_rows_by_reference_in_first_seen_order() {
        let docs = group_documents(IntakeKind::PurchaseOrder, &po_table());

        assert_eq!(docs.len(), 2);
        let first = docs[0].as_ref().unwrap();
        assert_eq!(first.reference, "PO-1");
        assert_eq!(first.row_numbers, vec![2, 4]);
        assert_eq!(first.total_cents(), Ok(2_100 + 120_000));
        let IntakePayload::Transaction { header, lines } = &first.payload else {
            panic!("expected transaction payload");
        };
        assert_eq!(header.counterparty.as_deref(), Some("Acme"));
        assert_eq!(header.date, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].item.as_deref(), Some("Toner"));

        let second = docs[1].as_ref().unwrap();
        assert_eq!(second.reference, "PO-2");
        let IntakePayload::Transaction { header, .. } = &second.payload else {
            panic!("expected transaction payload");
        };
        assert_eq!(header.date, NaiveDate::from_ymd_opt(2024, 5, 3));
    }

    #[test]
    fn reports_unparseable_documents_with_their_rows() {
        let table = SheetTable::new(
            "Bills",
            1,
            vec![
                strings(&["Reference", "Vendor", "Amount"]),
                strings(&["VB-9", "Acme", "twelve"]),
                strings(&["", "Acme", "1"]),
            ],
        );

        let docs = group_documents(IntakeKind::VendorBill, &table);

        assert_eq!(docs.len(), 2);
        let missing = docs[0].as_ref().unwrap_err();
        assert_eq!(missing.row_numbers, vec![3]);
        assert_eq!(missing.reference, None);
        let invalid = docs[1].as_ref().unwrap_err();
        assert_eq!(invalid.reference.as_deref(), Some("VB-9"));
        assert!(invalid.message.contains("invalid amount"));
    }

    #[test]
    fn vendor_rows_require_company_name() {
        let table = SheetTable::new(
            "Vendors",
            1,
            vec![
                strings(&["Reference", "Company Name", "TIN", "Country"]),
                strings(&["VEN-1", "Acme Sdn Bhd", "C123", "Malaysia"]),
                strings(&["VEN-2", "", "", ""]),
            ],
        );

        let docs = group_documents(IntakeKind::Vendor, &table);

        let IntakePayload::Vendor(vendor) = &docs[0].as_ref().unwrap().payload else {
            panic!("expected vendor payload");
        };
        assert_eq!(vendor.company_name, "Acme Sdn Bhd");
        assert_eq!(vendor.einvoice.tin.as_deref(), Some("C123"));
        assert!(docs[1].is_err());
    }

    #[test]
    fn parses_sheet_amounts() {
        assert_eq!(parse_amount_cents("1,234.50"), Ok(123_450));
        assert_eq!(parse_amount_cents("RM 12"), Ok(1_200));
        assert_eq!(parse_amount_cents("(5.00)"), Ok(-500));
        assert_eq!(parse_amount_cents("-0.25"), Ok(-25));
        assert_eq!(parse_amount_cents("RM-5"), Ok(-500));
        assert_eq!(parse_amount_cents(".5"), Ok(50));
        assert_eq!(parse_amount_cents("0.125"), Ok(13));
        assert!(parse_amount_cents("1.2.3").is_err());
        assert!(parse_amount_cents("n/a").is_err());
        assert!(parse_amount_cents("12abc34").is_err());
        assert!(parse_amount_cents("1e5").is_err());
        assert!(parse_amount_cents("1,,000").is_err());
        assert!(parse_amount_cents("-(5)").is_err());
        assert!(parse_amount_cents("99999999999999999999").is_err());
        assert!(parse_amount_cents("10000000001").is_err());
        assert_eq!(parse_amount_cents("10,000,000,000"), Ok(MAX_AMOUNT_CENTS));
    }

    #[test]
    fn document_totals_report_overflow() {
        let line = |row_number, amount_cents| IntakeLine {
            row_number,
            amount_cents: Some(amount_cents),
            ..Default::default()
        };
        let document = IntakeDocument {
            kind: IntakeKind::PurchaseOrder,
            reference: "PO-9".into(),
            row_numbers: vec![2, 3],
            payload: IntakePayload::Transaction {
                header: DocumentHeader::default(),
                lines: vec![line(2, MAX_AMOUNT_CENTS), line(3, MAX_AMOUNT_CENTS)],
            },
        };

        let err = document.total_cents().unwrap_err();

        assert!(err.contains("row 3"));
    }

    #[test]
    fn quantities_must_be_finite() {
        let table = SheetTable::new(
            "PO",
            1,
            vec![
                strings(&["Reference", "Item", "Quantity", "Rate"]),
                strings(&["PO-1", "Paper", "inf", "1"]),
            ],
        );

        let docs = group_documents(IntakeKind::PurchaseOrder, &table);

        assert!(docs[0].as_ref().unwrap_err().message.contains("invalid quantity"));
    }

    #[test]
    fn parses_sheet_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(parse_sheet_date("2024-01-31"), Ok(expected));
        assert_eq!(parse_sheet_date("31/01/2024"), Ok(expected));
        assert_eq!(parse_sheet_date("45322"), Ok(expected));
        assert!(parse_sheet_date("Jan 31").is_err());
        assert!(parse_sheet_date("2024").is_err());
    }

    #[test]
    fn effective_amount_uses_rate_times_quantity() {
        let line = IntakeLine {
            quantity: Some(3.0),
            rate_cents: Some(250),
            ..Default::default()
        };
        assert_eq!(line.effective_amount_cents(), Ok(Some(750)));

        let huge = IntakeLine {
            quantity: Some(1_000_000.0),
            rate_cents: Some(MAX_AMOUNT_CENTS),
            ..Default::default()
        };
        assert!(huge.effective_amount_cents().is_err());
    }
}
