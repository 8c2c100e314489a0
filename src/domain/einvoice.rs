//! Malaysian e-invoicing custom fields carried on NetSuite vendor and transaction
//! records. LHDN requires every field to be present, so blanks fall back to the
//! values reserved for "general public" / "not applicable".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TIN: &str = "EI00000000010";
pub const DEFAULT_SST_NUMBER: &str = "NA";
pub const DEFAULT_MSIC_CODE: &str = "00000";
pub const DEFAULT_ADDRESS: &str = "NA";
pub const DEFAULT_STATE_CODE: &str = "17";
pub const DEFAULT_COUNTRY_CODE: &str = "MYS";

pub const ENTITY_TIN: &str = "custentity_einv_tin";
pub const ENTITY_SST_NUMBER: &str = "custentity_einv_sst_no";
pub const ENTITY_MSIC_CODE: &str = "custentity_einv_msic_code";
pub const ENTITY_ADDRESS: &str = "custentity_einv_address";
pub const ENTITY_STATE_CODE: &str = "custentity_einv_state_code";
pub const ENTITY_COUNTRY_CODE: &str = "custentity_einv_country_code";

pub const BODY_TIN: &str = "custbody_einv_supplier_tin";
pub const BODY_SST_NUMBER: &str = "custbody_einv_supplier_sst_no";
pub const BODY_MSIC_CODE: &str = "custbody_einv_supplier_msic_code";
pub const BODY_ADDRESS: &str = "custbody_einv_supplier_address";
pub const BODY_STATE_CODE: &str = "custbody_einv_supplier_state_code";
pub const BODY_COUNTRY_CODE: &str = "custbody_einv_supplier_country_code";

/// Raw values as found on the source record; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EInvoiceSource {
    pub tin: Option<String>,
    pub sst_number: Option<String>,
    pub msic_code: Option<String>,
    pub address: Option<String>,
    pub state_code: Option<String>,
    pub country_code: Option<String>,
}

impl EInvoiceSource {
    /// Fills every missing value from `fallback`.
    pub fn with_fallback(self, fallback: &EInvoiceSource) -> Self {
        let keep = |value: Option<String>, other: &Option<String>| {
            value
                .filter(|v| !v.trim().is_empty())
                .or_else(|| other.clone())
        };
        Self {
            tin: keep(self.tin, &fallback.tin),
            sst_number: keep(self.sst_number, &fallback.sst_number),
            msic_code: keep(self.msic_code, &fallback.msic_code),
            address: keep(self.address, &fallback.address),
            state_code: keep(self.state_code, &fallback.state_code),
            country_code: keep(self.country_code, &fallback.country_code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EInvoiceFields {
    pub tin: String,
    pub sst_number: String,
    pub msic_code: String,
    pub address: String,
    pub state_code: String,
    pub country_code: String,
}

impl Default for EInvoiceFields {
    fn default() -> Self {
        Self {
            tin: DEFAULT_TIN.to_string(),
            sst_number: DEFAULT_SST_NUMBER.to_string(),
            msic_code: DEFAULT_MSIC_CODE.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            state_code: DEFAULT_STATE_CODE.to_string(),
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

impl EInvoiceFields {
    pub fn resolve(source: &EInvoiceSource) -> Self {
        let defaults = Self::default();
        Self {
            tin: pick(&source.tin, defaults.tin),
            sst_number: pick(&source.sst_number, defaults.sst_number),
            msic_code: pick(&source.msic_code, defaults.msic_code),
            address: pick(&source.address, defaults.address),
            state_code: pick(&source.state_code, defaults.state_code),
            country_code: pick(&source.country_code, defaults.country_code),
        }
    }

    pub fn apply_to_entity(&self, body: &mut Map<String, Value>) {
        self.apply(
            body,
            [
                ENTITY_TIN,
                ENTITY_SST_NUMBER,
                ENTITY_MSIC_CODE,
                ENTITY_ADDRESS,
                ENTITY_STATE_CODE,
                ENTITY_COUNTRY_CODE,
            ],
        );
    }

    pub fn apply_to_transaction(&self, body: &mut Map<String, Value>) {
        self.apply(
            body,
            [
                BODY_TIN,
                BODY_SST_NUMBER,
                BODY_MSIC_CODE,
                BODY_ADDRESS,
                BODY_STATE_CODE,
                BODY_COUNTRY_CODE,
            ],
        );
    }

    // Values already present on the body win over the resolved ones.
    fn apply(&self, body: &mut Map<String, Value>, ids: [&str; 6]) {
        let values = [
            &self.tin,
            &self.sst_number,
            &self.msic_code,
            &self.address,
            &self.state_code,
            &self.country_code,
        ];
        for (id, value) in ids.into_iter().zip(values) {
            body.entry(id.to_string())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
}

fn pick(value: &Option<String>, fallback: String) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback,
    }
}

/// LHDN state code for a Malaysian state name. Unknown names map to `None`.
pub fn state_code_for(name: &str) -> Option<&'static str> {
    let normalized = name.trim().to_ascii_lowercase();
    let code = match normalized.as_str() {
        "johor" => "01",
        "kedah" => "02",
        "kelantan" => "03",
        "melaka" | "malacca" => "04",
        "negeri sembilan" => "05",
        "pahang" => "06",
        "pulau pinang" | "penang" => "07",
        "perak" => "08",
        "perlis" => "09",
        "selangor" => "10",
        "terengganu" => "11",
        "sabah" => "12",
        "sarawak" => "13",
        "wilayah persekutuan kuala lumpur" | "kuala lumpur" => "14",
        "wilayah persekutuan labuan" | "labuan" => "15",
        "wilayah persekutuan putrajaya" | "putrajaya" => "16",
        _ => return None,
    };
    Some(code)
}

/// ISO 3166 alpha-3 code for the alpha-2 ids NetSuite uses on its country list.
pub fn alpha3_country_code(alpha2: &str) -> Option<&'static str> {
    let code = match alpha2.trim().to_ascii_uppercase().as_str() {
        "MY" => "MYS",
        "SG" => "SGP",
        "ID" => "IDN",
        "TH" => "THA",
        "PH" => "PHL",
        "VN" => "VNM",
        "BN" => "BRN",
        "CN" => "CHN",
        "HK" => "HKG",
        "TW" => "TWN",
        "JP" => "JPN",
        "KR" => "KOR",
        "IN" => "IND",
        "AU" => "AUS",
        "NZ" => "NZL",
        "US" => "USA",
        "CA" => "CAN",
        "GB" => "GBR",
        "DE" => "DEU",
        "FR" => "FRA",
        "NL" => "NLD",
        "IE" => "IRL",
        "CH" => "CHE",
        "AE" => "ARE",
        _ => return None,
    };
    Some(code)
}
