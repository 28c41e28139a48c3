use serde_json::{json, Map, Value};
use site_extractor::extraction::json::extract_json_object;
use site_extractor::extraction::normalize::{
    normalize_enrichment, normalize_extraction, DEFAULT_CONFIDENCE,
};
use site_extractor::extraction::ValidationError;
use site_extractor::CompanySize;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

#[test]
fn test_signboard_reply_wrapped_in_prose() {
    let reply = "Ecco i dati estratti dal cartello:\n```json\n{\n  \"company_name\": \"Edilnord Spa\",\n  \"vat_number\": \"IT 123 456 789 01\",\n  \"phone_number\": \"+39 02 1234 567\",\n  \"email\": \"info@edilnord.it\",\n  \"project_amount\": \"€ 850000.00\",\n  \"confidence_score\": 0.93\n}\n```\nFammi sapere se serve altro.";

    let map = extract_json_object(reply).unwrap();
    let normalized = normalize_extraction(&map);
    let site = normalized.value;

    assert!(normalized.rejections.is_empty());
    assert_eq!(site.company.company_name.as_deref(), Some("Edilnord Spa"));
    assert_eq!(site.company.vat_number.as_deref(), Some("12345678901"));
    assert_eq!(site.company.phone_number.as_deref(), Some("+39021234567"));
    assert_eq!(site.company.email.as_deref(), Some("info@edilnord.it"));
    assert_eq!(site.project.project_amount, Some(850000.0));
    assert_eq!(site.confidence_score, 0.93);
}

#[test]
fn test_bad_fields_are_nulled_not_fatal() {
    let map = object(json!({
        "company_name": "Rossi Srl",
        "vat_number": "IT123",
        "email": "info at rossi.it",
        "tax_code": "rssmra80a01l736",
        "confidence_score": "alta",
        "project_amount": "da definire"
    }));

    let normalized = normalize_extraction(&map);
    let site = normalized.value;

    assert_eq!(site.company.company_name.as_deref(), Some("Rossi Srl"));
    assert_eq!(site.company.vat_number, None);
    assert_eq!(site.company.email, None);
    assert_eq!(site.company.tax_code, None);
    assert_eq!(site.project.project_amount, None);
    assert_eq!(site.confidence_score, DEFAULT_CONFIDENCE);

    assert!(normalized
        .rejections
        .contains(&ValidationError::VatNumber("IT123".into())));
    assert!(normalized
        .rejections
        .iter()
        .any(|r| matches!(r, ValidationError::Confidence(_))));
    assert!(normalized
        .rejections
        .iter()
        .any(|r| matches!(r, ValidationError::Amount(_))));
}

#[test]
fn test_missing_confidence_uses_default() {
    let normalized = normalize_extraction(&object(json!({ "company_name": "Bianchi" })));
    assert_eq!(normalized.value.confidence_score, DEFAULT_CONFIDENCE);
    assert!(normalized.rejections.is_empty());
}

#[test]
fn test_enrichment_keeps_plausible_fields_only() {
    let map = object(json!({
        "found": true,
        "company_size": "media",
        "founded_year": "fondata nel 2150",
        "employees": "120 dipendenti",
        "certifications": ["ISO 9001", "SOA OG1"],
        "confidence_score": 0.8,
        "corrected_data": { "vat_number": "IT 98765432109" }
    }));

    let normalized = normalize_enrichment(&map, 2024);
    let enrichment = normalized.value;

    assert!(enrichment.found);
    assert_eq!(enrichment.company_size, Some(CompanySize::Medium));
    assert_eq!(enrichment.founded_year, None);
    assert_eq!(enrichment.employees, Some(120));
    assert_eq!(enrichment.certifications, vec!["ISO 9001", "SOA OG1"]);
    assert_eq!(
        enrichment
            .corrected_data
            .and_then(|c| c.vat_number),
        Some("98765432109".to_string())
    );
    assert!(normalized
        .rejections
        .iter()
        .any(|r| matches!(r, ValidationError::FoundedYear(_))));
}
