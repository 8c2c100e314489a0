//! Builds NetSuite REST record bodies from sheet documents.
//!
//! Every name on a sheet (vendor, item, department, ...) is resolved to an internal
//! id through the local reference cache, never through live NetSuite lookups.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
    domain::{
        einvoice::{alpha3_country_code, state_code_for, EInvoiceFields, DEFAULT_ADDRESS},
        environment::Environment,
        intake::{DocumentHeader, IntakeDocument, IntakeKind, IntakeLine, IntakePayload, VendorIntake},
        reference::{ReferenceKind, ReferenceRecord, VendorRef},
    },
    infrastructure::store::ReferenceStore,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("unknown {kind} '{value}'")]
    UnknownReference { kind: ReferenceKind, value: String },
    #[error("{kind} '{value}' is inactive in NetSuite")]
    InactiveReference { kind: ReferenceKind, value: String },
    #[error("row {row}: missing {field}")]
    MissingField { row: u32, field: &'static str },
    #[error("missing {0}")]
    MissingHeader(&'static str),
    #[error("document has no lines")]
    Empty,
    #[error("total must be positive, got {0}")]
    NonPositiveTotal(String),
    #[error("row {row}: quantity must be positive, got {value}")]
    NonPositiveQuantity { row: u32, value: String },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("{0} rows cannot be built as {1}")]
    WrongPayload(IntakeKind, &'static str),
    #[error("reference cache unavailable: {0}")]
    Store(String),
}

/// A record ready to send, plus what the ledger keeps about it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRecord {
    pub record_type: &'static str,
    pub body: Value,
    /// Set when the record already exists and must be updated instead of created.
    pub existing_id: Option<String>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub department: Option<String>,
    pub account: Option<String>,
    pub transaction_date: Option<NaiveDate>,
}

pub struct TransactionBuilder {
    references: Arc<dyn ReferenceStore>,
    environment: Environment,
}

impl TransactionBuilder {
    pub fn new(references: Arc<dyn ReferenceStore>, environment: Environment) -> Self {
        Self {
            references,
            environment,
        }
    }

    pub async fn build(&self, document: &IntakeDocument) -> Result<BuiltRecord, BuildError> {
        match (&document.payload, document.kind) {
            (IntakePayload::Vendor(vendor), IntakeKind::Vendor) => {
                self.vendor(document, vendor).await
            }
            (IntakePayload::Transaction { header, lines }, IntakeKind::PurchaseOrder) => {
                self.purchase_order(document, header, lines).await
            }
            (IntakePayload::Transaction { header, lines }, IntakeKind::VendorBill) => {
                self.vendor_bill(document, header, lines).await
            }
            (IntakePayload::Transaction { header, lines }, IntakeKind::ExpenseReport) => {
                self.expense_report(document, header, lines).await
            }
            (IntakePayload::Vendor(_), kind) => Err(BuildError::WrongPayload(kind, "a transaction")),
            (IntakePayload::Transaction { .. }, kind) => Err(BuildError::WrongPayload(kind, "a vendor")),
        }
    }

    async fn purchase_order(
        &self,
        document: &IntakeDocument,
        header: &DocumentHeader,
        lines: &[IntakeLine],
    ) -> Result<BuiltRecord, BuildError> {
        let total = check_lines(document, lines)?;
        let vendor = self.vendor_ref(header).await?;
        let department = self.optional(ReferenceKind::Department, header.department.as_deref()).await?;
        let currency = self.optional(ReferenceKind::Currency, header.currency.as_deref()).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let item_name = line.item.as_deref().ok_or(BuildError::MissingField {
                row: line.row_number,
                field: "item",
            })?;
            let item = self.resolve(ReferenceKind::Item, item_name).await?;
            items.push(self.item_line(line, &item, department.as_ref()).await?);
        }

        let mut body = self.transaction_body(document, header, &vendor, currency.as_ref(), department.as_ref());
        body.insert("item".into(), json!({ "items": items }));
        Ok(self.finish(document, header, body, total, currency, department, lines))
    }

    async fn vendor_bill(
        &self,
        document: &IntakeDocument,
        header: &DocumentHeader,
        lines: &[IntakeLine],
    ) -> Result<BuiltRecord, BuildError> {
        let total = check_lines(document, lines)?;
        let vendor = self.vendor_ref(header).await?;
        let department = self.optional(ReferenceKind::Department, header.department.as_deref()).await?;
        let currency = self.optional(ReferenceKind::Currency, header.currency.as_deref()).await?;

        let mut items = Vec::new();
        let mut expenses = Vec::new();
        for line in lines {
            if let Some(item_name) = line.item.as_deref() {
                let item = self.resolve(ReferenceKind::Item, item_name).await?;
                items.push(self.item_line(line, &item, department.as_ref()).await?);
            } else if let Some(account_name) = line.account.as_deref() {
                let account = self.resolve(ReferenceKind::Account, account_name).await?;
                let line_department = self
                    .line_department(line, department.as_ref())
                    .await?;
                let mut expense = Map::new();
                expense.insert("account".into(), id_ref(&account));
                expense.insert("amount".into(), money(line_amount(line)?));
                insert_text(&mut expense, "memo", line.description.as_deref());
                if let Some(dept) = line_department {
                    expense.insert("department".into(), id_ref(&dept));
                }
                expenses.push(Value::Object(expense));
            } else {
                return Err(BuildError::MissingField {
                    row: line.row_number,
                    field: "item or account",
                });
            }
        }

        let mut body = self.transaction_body(document, header, &vendor, currency.as_ref(), department.as_ref());
        body.insert(
            "tranId".into(),
            Value::String(
                header
                    .invoice_number
                    .clone()
                    .unwrap_or_else(|| document.reference.clone()),
            ),
        );
        if !items.is_empty() {
            body.insert("item".into(), json!({ "items": items }));
        }
        if !expenses.is_empty() {
            body.insert("expense".into(), json!({ "items": expenses }));
        }
        Ok(self.finish(document, header, body, total, currency, department, lines))
    }

    async fn expense_report(
        &self,
        document: &IntakeDocument,
        header: &DocumentHeader,
        lines: &[IntakeLine],
    ) -> Result<BuiltRecord, BuildError> {
        let total = check_lines(document, lines)?;
        let employee_name = header
            .counterparty
            .as_deref()
            .ok_or(BuildError::MissingHeader("employee"))?;
        let employee = self.resolve(ReferenceKind::Employee, employee_name).await?;
        let department = self.optional(ReferenceKind::Department, header.department.as_deref()).await?;
        let currency = self.optional(ReferenceKind::Currency, header.currency.as_deref()).await?;
        let tran_date = header.date.unwrap_or_else(|| Utc::now().date_naive());

        let mut expenses = Vec::with_capacity(lines.len());
        for line in lines {
            let category_name = line.category.as_deref().ok_or(BuildError::MissingField {
                row: line.row_number,
                field: "category",
            })?;
            let category = self.resolve(ReferenceKind::ExpenseCategory, category_name).await?;
            let mut expense = Map::new();
            expense.insert(
                "expenseDate".into(),
                Value::String(line.date.unwrap_or(tran_date).to_string()),
            );
            expense.insert("category".into(), id_ref(&category));
            expense.insert("amount".into(), money(line_amount(line)?));
            if let Some(currency) = &currency {
                expense.insert("currency".into(), id_ref(currency));
            }
            insert_text(&mut expense, "memo", line.description.as_deref());
            if let Some(dept) = self.line_department(line, department.as_ref()).await? {
                expense.insert("department".into(), id_ref(&dept));
            }
            expenses.push(Value::Object(expense));
        }

        let mut body = Map::new();
        body.insert("externalId".into(), Value::String(external_id(document)));
        body.insert("entity".into(), id_ref(&employee));
        body.insert("tranDate".into(), Value::String(tran_date.to_string()));
        if let Some(dept) = &department {
            body.insert("department".into(), id_ref(dept));
        }
        insert_text(&mut body, "memo", header.memo.as_deref());
        body.insert("expense".into(), json!({ "items": expenses }));
        Ok(self.finish(document, header, body, total, currency, department, lines))
    }

    async fn vendor(
        &self,
        document: &IntakeDocument,
        vendor: &VendorIntake,
    ) -> Result<BuiltRecord, BuildError> {
        let existing = self
            .references
            .find_by_name(ReferenceKind::Vendor, self.environment, &vendor.company_name)
            .await
            .map_err(store_error)?
            .filter(|record| record.name.eq_ignore_ascii_case(vendor.company_name.trim()));
        let currency = self.optional(ReferenceKind::Currency, vendor.currency.as_deref()).await?;
        let country = self.optional(ReferenceKind::Country, vendor.country.as_deref()).await?;

        let mut einvoice = vendor.einvoice.clone();
        if einvoice.state_code.is_none() {
            einvoice.state_code = vendor
                .state
                .as_deref()
                .and_then(state_code_for)
                .map(str::to_string);
        }
        if einvoice.country_code.is_none() {
            einvoice.country_code = country
                .as_ref()
                .and_then(|record| alpha3_country_code(&record.internal_id))
                .map(str::to_string);
        }
        // An update keeps what NetSuite already holds for every blank sheet cell.
        let cached = existing.as_ref().and_then(VendorRef::from_record);
        if let Some(cached) = &cached {
            einvoice = einvoice.with_fallback(&cached.einvoice);
        }
        let sheet_has_address =
            vendor.einvoice.address.is_some() || vendor.state.is_some() || vendor.country.is_some();

        let mut body = Map::new();
        body.insert("externalId".into(), Value::String(external_id(document)));
        body.insert("companyName".into(), Value::String(vendor.company_name.clone()));
        insert_text(&mut body, "email", vendor.email.as_deref());
        insert_text(&mut body, "phone", vendor.phone.as_deref());
        if let Some(currency) = &currency {
            body.insert("currency".into(), id_ref(currency));
        }
        if let Some(subsidiary) = vendor.subsidiary.as_deref() {
            body.insert("subsidiary".into(), json!({ "id": subsidiary }));
        }

        if cached.is_none() || sheet_has_address {
            let mut address = Map::new();
            address.insert(
                "addr1".into(),
                Value::String(
                    einvoice
                        .address
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
                ),
            );
            insert_text(&mut address, "state", vendor.state.as_deref());
            address.insert(
                "country".into(),
                json!({ "id": country.as_ref().map(|c| c.internal_id.as_str()).unwrap_or("MY") }),
            );
            body.insert(
                "addressBook".into(),
                json!({ "items": [{
                    "defaultBilling": true,
                    "defaultShipping": true,
                    "addressBookAddress": address,
                }] }),
            );
        }
        EInvoiceFields::resolve(&einvoice).apply_to_entity(&mut body);

        Ok(BuiltRecord {
            record_type: IntakeKind::Vendor.netsuite_record_type(),
            body: Value::Object(body),
            existing_id: existing.map(|record| record.internal_id),
            amount_cents: 0,
            currency: currency.map(|record| record.name),
            department: None,
            account: None,
            transaction_date: None,
        })
    }

    async fn item_line(
        &self,
        line: &IntakeLine,
        item: &ReferenceRecord,
        department: Option<&ReferenceRecord>,
    ) -> Result<Value, BuildError> {
        let amount = line_amount(line)?;
        let quantity = line.quantity.unwrap_or(1.0);
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(BuildError::NonPositiveQuantity {
                row: line.row_number,
                value: quantity.to_string(),
            });
        }
        let rate = line
            .rate_cents
            .unwrap_or_else(|| (amount as f64 / quantity).round() as i64);
        let mut entry = Map::new();
        entry.insert("item".into(), id_ref(item));
        insert_text(&mut entry, "description", line.description.as_deref());
        entry.insert("quantity".into(), json!(quantity));
        entry.insert("rate".into(), money(rate));
        entry.insert("amount".into(), money(amount));
        if let Some(dept) = self.line_department(line, department).await? {
            entry.insert("department".into(), id_ref(&dept));
        }
        Ok(Value::Object(entry))
    }

    fn transaction_body(
        &self,
        document: &IntakeDocument,
        header: &DocumentHeader,
        vendor: &VendorRef,
        currency: Option<&ReferenceRecord>,
        department: Option<&ReferenceRecord>,
    ) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("externalId".into(), Value::String(external_id(document)));
        body.insert("entity".into(), json!({ "id": vendor.internal_id }));
        body.insert(
            "tranDate".into(),
            Value::String(
                header
                    .date
                    .unwrap_or_else(|| Utc::now().date_naive())
                    .to_string(),
            ),
        );
        match currency {
            Some(currency) => {
                body.insert("currency".into(), id_ref(currency));
            }
            None => {
                if let Some(id) = &vendor.currency_id {
                    body.insert("currency".into(), json!({ "id": id }));
                }
            }
        }
        if let Some(dept) = department {
            body.insert("department".into(), id_ref(dept));
        }
        insert_text(&mut body, "memo", header.memo.as_deref());
        EInvoiceFields::resolve(&vendor.einvoice).apply_to_transaction(&mut body);
        body
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        document: &IntakeDocument,
        header: &DocumentHeader,
        body: Map<String, Value>,
        total: i64,
        currency: Option<ReferenceRecord>,
        department: Option<ReferenceRecord>,
        lines: &[IntakeLine],
    ) -> BuiltRecord {
        let account = lines
            .iter()
            .find_map(|line| line.account.clone().or_else(|| line.category.clone()));
        BuiltRecord {
            record_type: document.kind.netsuite_record_type(),
            body: Value::Object(body),
            existing_id: None,
            amount_cents: total,
            currency: currency
                .and_then(|record| record.code)
                .or_else(|| header.currency.clone()),
            department: department.map(|record| record.name),
            account,
            transaction_date: header.date,
        }
    }

    async fn vendor_ref(&self, header: &DocumentHeader) -> Result<VendorRef, BuildError> {
        let name = header
            .counterparty
            .as_deref()
            .ok_or(BuildError::MissingHeader("vendor"))?;
        let record = self.resolve(ReferenceKind::Vendor, name).await?;
        VendorRef::from_record(&record).ok_or_else(|| BuildError::UnknownReference {
            kind: ReferenceKind::Vendor,
            value: name.to_string(),
        })
    }

    async fn line_department(
        &self,
        line: &IntakeLine,
        fallback: Option<&ReferenceRecord>,
    ) -> Result<Option<ReferenceRecord>, BuildError> {
        match line.department.as_deref() {
            Some(name) => self.resolve(ReferenceKind::Department, name).await.map(Some),
            None => Ok(fallback.cloned()),
        }
    }

    async fn optional(
        &self,
        kind: ReferenceKind,
        value: Option<&str>,
    ) -> Result<Option<ReferenceRecord>, BuildError> {
        match value {
            Some(value) => self.resolve(kind, value).await.map(Some),
            None => Ok(None),
        }
    }

    async fn resolve(&self, kind: ReferenceKind, value: &str) -> Result<ReferenceRecord, BuildError> {
        let record = self
            .references
            .find_by_name(kind, self.environment, value)
            .await
            .map_err(store_error)?
            .ok_or_else(|| BuildError::UnknownReference {
                kind,
                value: value.to_string(),
            })?;
        if record.is_inactive {
            return Err(BuildError::InactiveReference {
                kind,
                value: value.to_string(),
            });
        }
        Ok(record)
    }
}

/// `{prefix}-{reference}`, so a retried push hits the same NetSuite record.
pub fn external_id(document: &IntakeDocument) -> String {
    format!("{}-{}", document.kind.external_id_prefix(), document.reference)
}

fn check_lines(document: &IntakeDocument, lines: &[IntakeLine]) -> Result<i64, BuildError> {
    if lines.is_empty() {
        return Err(BuildError::Empty);
    }
    let total = document.total_cents().map_err(BuildError::InvalidAmount)?;
    if total <= 0 {
        return Err(BuildError::NonPositiveTotal(format_cents(total)));
    }
    Ok(total)
}

fn line_amount(line: &IntakeLine) -> Result<i64, BuildError> {
    line.effective_amount_cents()
        .map_err(BuildError::InvalidAmount)?
        .ok_or(BuildError::MissingField {
        row: line.row_number,
        field: "amount",
    })
}

fn id_ref(record: &ReferenceRecord) -> Value {
    json!({ "id": record.internal_id })
}

fn money(cents: i64) -> Value {
    json!(cents as f64 / 100.0)
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{}.{:02}", cents.abs() / 100, cents.abs() % 100)
}

fn insert_text(body: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        body.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn store_error(err: anyhow::Error) -> BuildError {
    BuildError::Store(format!("{err:#}"))
}
