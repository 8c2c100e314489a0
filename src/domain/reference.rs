use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    einvoice::{self, EInvoiceSource},
    environment::Environment,
};

/// NetSuite lists mirrored into the local cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Vendor,
    Employee,
    Item,
    Department,
    Account,
    Currency,
    Country,
    MsicCode,
    ExpenseCategory,
}

const VENDOR_COLUMNS: &[&str] = &[
    "id",
    "entityid",
    "companyname",
    "email",
    "phone",
    "currency",
    "subsidiary",
    "isinactive",
    einvoice::ENTITY_TIN,
    einvoice::ENTITY_SST_NUMBER,
    einvoice::ENTITY_MSIC_CODE,
    einvoice::ENTITY_ADDRESS,
    einvoice::ENTITY_STATE_CODE,
    einvoice::ENTITY_COUNTRY_CODE,
];

impl ReferenceKind {
    /// Sync order: currencies and countries first so later lists can resolve
    /// against them.
    pub const ALL: [ReferenceKind; 9] = [
        ReferenceKind::Currency,
        ReferenceKind::Country,
        ReferenceKind::MsicCode,
        ReferenceKind::Department,
        ReferenceKind::Account,
        ReferenceKind::ExpenseCategory,
        ReferenceKind::Item,
        ReferenceKind::Employee,
        ReferenceKind::Vendor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Vendor => "vendor",
            ReferenceKind::Employee => "employee",
            ReferenceKind::Item => "item",
            ReferenceKind::Department => "department",
            ReferenceKind::Account => "account",
            ReferenceKind::Currency => "currency",
            ReferenceKind::Country => "country",
            ReferenceKind::MsicCode => "msic_code",
            ReferenceKind::ExpenseCategory => "expense_category",
        }
    }

    pub fn suiteql_table(&self) -> &'static str {
        match self {
            ReferenceKind::Vendor => "vendor",
            ReferenceKind::Employee => "employee",
            ReferenceKind::Item => "item",
            ReferenceKind::Department => "department",
            ReferenceKind::Account => "account",
            ReferenceKind::Currency => "currency",
            ReferenceKind::Country => "country",
            ReferenceKind::MsicCode => "customrecord_einv_msic",
            ReferenceKind::ExpenseCategory => "expensecategory",
        }
    }

    pub fn suiteql_columns(&self) -> &'static [&'static str] {
        match self {
            ReferenceKind::Vendor => VENDOR_COLUMNS,
            ReferenceKind::Employee => &[
                "id",
                "entityid",
                "firstname",
                "lastname",
                "email",
                "department",
                "subsidiary",
                "isinactive",
            ],
            ReferenceKind::Item => &["id", "itemid", "displayname", "itemtype", "isinactive"],
            ReferenceKind::Department => &["id", "name", "fullname", "parent", "isinactive"],
            ReferenceKind::Account => &["id", "acctnumber", "acctname", "accttype", "isinactive"],
            ReferenceKind::Currency => &["id", "symbol", "name", "isinactive"],
            ReferenceKind::Country => &["id", "name"],
            ReferenceKind::MsicCode => &["id", "name", "custrecord_einv_msic_description", "isinactive"],
            ReferenceKind::ExpenseCategory => &["id", "name", "expenseacct", "isinactive"],
        }
    }

    pub fn key_column(&self) -> &'static str {
        "id"
    }

    /// Country ids are ISO codes; every other list is keyed by a numeric internal id.
    pub fn numeric_key(&self) -> bool {
        !matches!(self, ReferenceKind::Country)
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        ReferenceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unsupported reference kind: {value}"))
    }
}

/// One cached NetSuite list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub kind: ReferenceKind,
    pub is_sandbox: bool,
    pub internal_id: String,
    pub name: String,
    pub code: Option<String>,
    pub is_inactive: bool,
    pub attributes: Map<String, Value>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowMappingError {
    #[error("{kind} row is not a JSON object")]
    NotAnObject { kind: ReferenceKind },
    #[error("{kind} row has no id")]
    MissingId { kind: ReferenceKind },
}

impl ReferenceRecord {
    pub fn from_suiteql_row(
        kind: ReferenceKind,
        env: Environment,
        row: &Value,
    ) -> Result<Self, RowMappingError> {
        let Some(object) = row.as_object() else {
            return Err(RowMappingError::NotAnObject { kind });
        };
        let mut attributes = object.clone();
        attributes.remove("links");

        let internal_id = take_text(&mut attributes, kind.key_column())
            .ok_or(RowMappingError::MissingId { kind })?;
        let is_inactive = attributes
            .remove("isinactive")
            .map(|value| flag(&value))
            .unwrap_or(false);

        let (name, code) = match kind {
            ReferenceKind::Vendor => {
                let code = text(&attributes, "entityid");
                (first_text(&attributes, &["companyname", "entityid"]), code)
            }
            ReferenceKind::Employee => {
                let full = [text(&attributes, "firstname"), text(&attributes, "lastname")]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                let code = text(&attributes, "entityid");
                let name = if full.is_empty() { code.clone() } else { Some(full) };
                (name, code)
            }
            ReferenceKind::Item => (
                first_text(&attributes, &["displayname", "itemid"]),
                text(&attributes, "itemid"),
            ),
            ReferenceKind::Department => (
                first_text(&attributes, &["fullname", "name"]),
                text(&attributes, "name"),
            ),
            ReferenceKind::Account => (
                first_text(&attributes, &["acctname", "acctnumber"]),
                text(&attributes, "acctnumber"),
            ),
            ReferenceKind::Currency => (
                first_text(&attributes, &["name", "symbol"]),
                text(&attributes, "symbol"),
            ),
            ReferenceKind::Country => (text(&attributes, "name"), Some(internal_id.clone())),
            ReferenceKind::MsicCode => (
                first_text(&attributes, &["custrecord_einv_msic_description", "name"]),
                text(&attributes, "name"),
            ),
            ReferenceKind::ExpenseCategory => (text(&attributes, "name"), None),
        };

        Ok(Self {
            kind,
            is_sandbox: env.is_sandbox(),
            name: name.unwrap_or_else(|| internal_id.clone()),
            internal_id,
            code,
            is_inactive,
            attributes,
            synced_at: Utc::now(),
        })
    }

    pub fn environment(&self) -> Environment {
        Environment::from_sandbox_flag(self.is_sandbox)
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        text(&self.attributes, key)
    }
}

/// Vendor fields the transaction builders need.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRef {
    pub internal_id: String,
    pub name: String,
    pub currency_id: Option<String>,
    pub subsidiary_id: Option<String>,
    pub einvoice: EInvoiceSource,
}

impl VendorRef {
    pub fn from_record(record: &ReferenceRecord) -> Option<Self> {
        if record.kind != ReferenceKind::Vendor {
            return None;
        }
        Some(Self {
            internal_id: record.internal_id.clone(),
            name: record.name.clone(),
            currency_id: record.attribute("currency"),
            subsidiary_id: record.attribute("subsidiary"),
            einvoice: EInvoiceSource {
                tin: record.attribute(einvoice::ENTITY_TIN),
                sst_number: record.attribute(einvoice::ENTITY_SST_NUMBER),
                msic_code: record.attribute(einvoice::ENTITY_MSIC_CODE),
                address: record.attribute(einvoice::ENTITY_ADDRESS),
                state_code: record.attribute(einvoice::ENTITY_STATE_CODE),
                country_code: record.attribute(einvoice::ENTITY_COUNTRY_CODE),
            },
        })
    }
}

// SuiteQL returns most scalars as strings, but numbers and booleans do show up.
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn take_text(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    let value = text(map, key);
    map.remove(key);
    value
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(map, key))
}

fn flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim(), "T" | "t" | "true" | "Y"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_vendor_row_with_einvoice_attributes() {
        let row = json!({
            "links": [],
            "id": "1042",
            "entityid": "V-1042",
            "companyname": "Acme Supplies Sdn Bhd",
            "currency": "1",
            "isinactive": "F",
            "custentity_einv_tin": "C1234567890"
        });

        let record =
            ReferenceRecord::from_suiteql_row(ReferenceKind::Vendor, Environment::Sandbox, &row)
                .unwrap();

        assert_eq!(record.internal_id, "1042");
        assert_eq!(record.name, "Acme Supplies Sdn Bhd");
        assert_eq!(record.code.as_deref(), Some("V-1042"));
        assert!(record.is_sandbox);
        assert!(!record.is_inactive);
        assert!(!record.attributes.contains_key("links"));

        let vendor = VendorRef::from_record(&record).unwrap();
        assert_eq!(vendor.currency_id.as_deref(), Some("1"));
        assert_eq!(vendor.einvoice.tin.as_deref(), Some("C1234567890"));
        assert_eq!(vendor.einvoice.sst_number, None);
    }

    #[test]
    fn employee_name_joins_first_and_last() {
        let row = json!({"id": 7, "entityid": "E007", "firstname": "Siti", "lastname": "Aminah", "isinactive": true});

        let record = ReferenceRecord::from_suiteql_row(
            ReferenceKind::Employee,
            Environment::Production,
            &row,
        )
        .unwrap();

        assert_eq!(record.internal_id, "7");
        assert_eq!(record.name, "Siti Aminah");
        assert!(record.is_inactive);
        assert!(!record.is_sandbox);
    }

    #[test]
    fn country_uses_iso_id_as_code() {
        let row = json!({"id": "MY", "name": "Malaysia"});

        let record =
            ReferenceRecord::from_suiteql_row(ReferenceKind::Country, Environment::Sandbox, &row)
                .unwrap();

        assert_eq!(record.code.as_deref(), Some("MY"));
        assert_eq!(record.name, "Malaysia");
        assert!(!ReferenceKind::Country.numeric_key());
    }

    #[test]
    fn rejects_rows_without_id() {
        let err = ReferenceRecord::from_suiteql_row(
            ReferenceKind::Item,
            Environment::Sandbox,
            &json!({"itemid": "X"}),
        )
        .unwrap_err();

        assert_eq!(err, RowMappingError::MissingId { kind: ReferenceKind::Item });
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!("msic-code".parse::<ReferenceKind>(), Ok(ReferenceKind::MsicCode));
        assert_eq!("Vendor".parse::<ReferenceKind>(), Ok(ReferenceKind::Vendor));
        assert!("subsidiary".parse::<ReferenceKind>().is_err());
    }
}
