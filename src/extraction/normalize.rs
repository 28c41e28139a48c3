//! Deterministic clean-up of model output before anything is persisted.
//!
//! Every rejected field is nulled and reported as a [`ValidationError`];
//! none of these rejections is fatal.

use crate::models::{CompanyEnrichment, CompanyFields, CompanySize, ContactChannel, ExtractedSite, ProjectFields};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_CONFIDENCE: f64 = 0.7;
pub const MIN_FOUNDED_YEAR: i64 = 1800;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("vat_number {0:?} does not have 11 digits")]
    VatNumber(String),
    #[error("tax_code {0:?} is neither 11 nor 16 characters")]
    TaxCode(String),
    #[error("email {0:?} has no @")]
    Email(String),
    #[error("confidence_score {0} is not a number in [0, 1]")]
    Confidence(String),
    #[error("project_amount {0} is not a number")]
    Amount(String),
    #[error("company_size {0:?} is not a known size")]
    CompanySize(String),
    #[error("founded_year {0} is outside the plausible range")]
    FoundedYear(String),
    #[error("employees {0} is not a non-negative integer")]
    Employees(String),
    #[error("{0} is not a list")]
    NotAList(&'static str),
    #[error("{0} is not an object")]
    NotAnObject(&'static str),
}

/// A normalized value plus the rejections collected on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub value: T,
    pub rejections: Vec<ValidationError>,
}

/// Reads a text field; numbers are accepted as their decimal text, blanks count as absent.
pub fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn normalize_vat_number(raw: &str) -> Result<String, ValidationError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 {
        Ok(digits)
    } else {
        Err(ValidationError::VatNumber(raw.to_string()))
    }
}

pub fn normalize_tax_code(raw: &str) -> Result<String, ValidationError> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    match code.chars().count() {
        11 | 16 => Ok(code),
        _ => Err(ValidationError::TaxCode(raw.to_string())),
    }
}

/// Keeps digits and a leading `+`; returns `None` when nothing dialable is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start();
    let mut phone = String::new();
    if trimmed.starts_with('+') {
        phone.push('+');
    }
    phone.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));

    (phone.len() > usize::from(phone.starts_with('+'))).then_some(phone)
}

pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    if raw.contains('@') {
        Ok(raw.to_string())
    } else {
        Err(ValidationError::Email(raw.to_string()))
    }
}

/// Only JSON numbers in [0, 1] are accepted; anything else yields the default.
pub fn normalize_confidence(value: Option<&Value>) -> Result<f64, ValidationError> {
    match value {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(score) if (0.0..=1.0).contains(&score) => Ok(score),
            _ => Err(ValidationError::Confidence(n.to_string())),
        },
        Some(other) => Err(ValidationError::Confidence(other.to_string())),
        None => Ok(DEFAULT_CONFIDENCE),
    }
}

/// Strips currency symbols and separators, then reads the leading decimal number.
pub fn normalize_amount(value: &Value) -> Result<Option<f64>, ValidationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| ValidationError::Amount(n.to_string())),
        Value::String(s) => {
            if s.trim().is_empty() {
                return Ok(None);
            }
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            parse_float_prefix(&cleaned)
                .map(Some)
                .ok_or_else(|| ValidationError::Amount(value.to_string()))
        }
        other => Err(ValidationError::Amount(other.to_string())),
    }
}

fn parse_float_prefix(s: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;

    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() {
            seen_digit = true;
            end = i + 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            end = i + 1;
        } else {
            break;
        }
    }

    if !seen_digit {
        return None;
    }
    s[..end].trim_end_matches('.').parse().ok()
}

/// Reads an integer the lenient way: numbers are truncated, strings use their leading digits.
fn integer_prefix(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.strip_prefix('+').unwrap_or(s)),
            };
            let leading: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
            let parsed: i64 = leading.parse().ok()?;
            Some(if negative { -parsed } else { parsed })
        }
        _ => None,
    }
}

pub fn normalize_company(map: &Map<String, Value>) -> Normalized<CompanyFields> {
    let mut rejections = Vec::new();

    let mut validated = |raw: Option<String>, check: fn(&str) -> Result<String, ValidationError>| {
        raw.and_then(|raw| match check(&raw) {
            Ok(value) => Some(value),
            Err(rejection) => {
                rejections.push(rejection);
                None
            }
        })
    };

    let vat_number = validated(text_field(map, "vat_number"), normalize_vat_number);
    let tax_code = validated(text_field(map, "tax_code"), normalize_tax_code);
    let email = validated(text_field(map, "email"), normalize_email);

    let company = CompanyFields {
        company_name: text_field(map, "company_name"),
        legal_name: text_field(map, "legal_name"),
        vat_number,
        tax_code,
        phone_number: text_field(map, "phone_number").and_then(|p| normalize_phone(&p)),
        mobile_number: text_field(map, "mobile_number").and_then(|p| normalize_phone(&p)),
        email,
        website: text_field(map, "website"),
        address: text_field(map, "address"),
        city: text_field(map, "city"),
        province: text_field(map, "province"),
        postal_code: text_field(map, "postal_code"),
    };

    Normalized {
        value: company,
        rejections,
    }
}

/// Turns the vision model's JSON into a clean [`ExtractedSite`].
pub fn normalize_extraction(map: &Map<String, Value>) -> Normalized<ExtractedSite> {
    let Normalized {
        value: company,
        mut rejections,
    } = normalize_company(map);

    let confidence_score = normalize_confidence(map.get("confidence_score")).unwrap_or_else(|rejection| {
        rejections.push(rejection);
        DEFAULT_CONFIDENCE
    });

    let project_amount = match map.get("project_amount") {
        Some(value) => normalize_amount(value).unwrap_or_else(|rejection| {
            rejections.push(rejection);
            None
        }),
        None => None,
    };

    let site = ExtractedSite {
        raw_text: text_field(map, "raw_text"),
        company,
        project: ProjectFields {
            construction_type: text_field(map, "construction_type"),
            construction_description: text_field(map, "construction_description"),
            project_name: text_field(map, "project_name"),
            project_amount,
        },
        confidence_score,
    };

    Normalized {
        value: site,
        rejections,
    }
}

/// Normalizes a web-search lookup result. `current_year` bounds the founding year.
pub fn normalize_enrichment(map: &Map<String, Value>, current_year: i32) -> Normalized<CompanyEnrichment> {
    let mut rejections = Vec::new();
    let found = map.get("found").and_then(Value::as_bool).unwrap_or(false);

    if !found {
        return Normalized {
            value: CompanyEnrichment::default(),
            rejections,
        };
    }

    let company_size = text_field(map, "company_size").and_then(|label| {
        let size = CompanySize::from_label(&label);
        if size.is_none() {
            rejections.push(ValidationError::CompanySize(label));
        }
        size
    });

    let founded_year = match map.get("founded_year") {
        None | Some(Value::Null) => None,
        Some(value) => match integer_prefix(value) {
            Some(year) if (MIN_FOUNDED_YEAR..=i64::from(current_year)).contains(&year) => {
                i32::try_from(year).ok()
            }
            _ => {
                rejections.push(ValidationError::FoundedYear(value.to_string()));
                None
            }
        },
    };

    let employees = match map.get("employees") {
        None | Some(Value::Null) => None,
        Some(value) => match integer_prefix(value).and_then(|n| u32::try_from(n).ok()) {
            Some(count) => Some(count),
            None => {
                rejections.push(ValidationError::Employees(value.to_string()));
                None
            }
        },
    };

    let certifications = string_list(map, "certifications", &mut rejections);
    let corrections_made = string_list(map, "corrections_made", &mut rejections);

    let additional_contacts = match map.get("additional_contacts") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<ContactChannel>(item.clone()).ok())
            .collect(),
        Some(_) => {
            rejections.push(ValidationError::NotAList("additional_contacts"));
            Vec::new()
        }
    };

    let social_media = match map.get("social_media") {
        Some(Value::Object(links)) => links
            .iter()
            .filter_map(|(network, url)| match url {
                Value::String(url) if !url.trim().is_empty() => {
                    Some((network.clone(), url.trim().to_string()))
                }
                _ => None,
            })
            .collect(),
        None | Some(Value::Null) => BTreeMap::new(),
        Some(_) => {
            rejections.push(ValidationError::NotAnObject("social_media"));
            BTreeMap::new()
        }
    };

    let confidence_score = match map.get("confidence_score") {
        None | Some(Value::Null) => None,
        value => match normalize_confidence(value) {
            Ok(score) => Some(score),
            Err(rejection) => {
                rejections.push(rejection);
                None
            }
        },
    };

    let corrected_data = match map.get("corrected_data") {
        Some(Value::Object(corrected)) => {
            let normalized = normalize_company(corrected);
            rejections.extend(normalized.rejections);
            Some(normalized.value)
        }
        _ => None,
    };

    let enrichment = CompanyEnrichment {
        found,
        description: text_field(map, "description"),
        company_size,
        founded_year,
        employees,
        sector: text_field(map, "sector"),
        certifications,
        additional_contacts,
        social_media,
        corrections_made,
        confidence_score,
        corrected_data,
    };

    Normalized {
        value: enrichment,
        rejections,
    }
}

fn string_list(
    map: &Map<String, Value>,
    key: &'static str,
    rejections: &mut Vec<ValidationError>,
) -> Vec<String> {
    match map.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(_) => {
            rejections.push(ValidationError::NotAList(key));
            Vec::new()
        }
    }
}
