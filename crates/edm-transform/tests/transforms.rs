//! Tests for semantic coercion.

use edm_model::{CellValue, SemanticType};
use edm_transform::phone::{is_e164, to_e164};
use edm_transform::{is_canonical, transform_value};
use proptest::prelude::*;

#[test]
fn npi_values_pass_checksum() {
    let outcome =
        transform_value(SemanticType::Npi, &CellValue::text(" 1234567893 ")).expect("valid npi");
    assert_eq!(outcome.value, CellValue::text("1234567893"));
    assert!(is_canonical(SemanticType::Npi, &outcome.value));

    let failure = transform_value(SemanticType::Npi, &CellValue::text("1234567890")).unwrap_err();
    assert_eq!(failure.rule, "npi.checksum");
}

#[test]
fn numeric_npi_cells_are_accepted() {
    let outcome = transform_value(SemanticType::Npi, &CellValue::Number(1_234_567_893.0))
        .expect("numeric npi");
    assert_eq!(outcome.value, CellValue::text("1234567893"));
}

#[test]
fn integers_beyond_exact_range_are_rejected() {
    let largest = transform_value(SemanticType::Integer, &CellValue::text("9,007,199,254,740,991"))
        .expect("largest exact integer");
    assert_eq!(largest.value, CellValue::Number(9_007_199_254_740_991.0));
    assert!(is_canonical(SemanticType::Integer, &largest.value));

    let failure = transform_value(SemanticType::Integer, &CellValue::text("9007199254740993"))
        .unwrap_err();
    assert_eq!(failure.rule, "integer.range");
    let failure = transform_value(SemanticType::Integer, &CellValue::text("-9223372036854775808"))
        .unwrap_err();
    assert_eq!(failure.rule, "integer.range");

    let wide = CellValue::Number(1e16);
    assert!(!is_canonical(SemanticType::Integer, &wide));
    assert_eq!(
        transform_value(SemanticType::Integer, &wide).unwrap_err().rule,
        "integer.range"
    );
}

#[test]
fn booleans_from_flags() {
    let outcome = transform_value(SemanticType::Boolean, &CellValue::Number(1.0)).expect("flag");
    assert_eq!(outcome.value, CellValue::Bool(true));
    assert!(transform_value(SemanticType::Boolean, &CellValue::text("maybe")).is_err());
}

proptest! {
    #[test]
    fn normalized_north_american_numbers_are_e164(
        area in 200u32..1000,
        exchange in 0u32..1000,
        line in 0u32..10000,
    ) {
        let raw = format!("({area:03}) {exchange:03}-{line:04}");
        let normalized = to_e164(&raw).expect("ten digit number");
        prop_assert!(is_e164(&normalized));
        prop_assert_eq!(normalized.len(), 12);
    }

    #[test]
    fn date_output_is_always_canonical(y in 1900i32..2100, m in 1u32..13, d in 1u32..29) {
        let raw = format!("{m:02}/{d:02}/{y}");
        let outcome = transform_value(SemanticType::Date, &CellValue::text(raw)).expect("date");
        prop_assert!(is_canonical(SemanticType::Date, &outcome.value));
    }
}
