//! Identifier extraction over free text and structured fields.

use proptest::prelude::*;
use triage_core::{
    case::Case,
    extractor::{extract, normalize_phone},
};

#[test]
fn structured_fields_win_over_the_narrative() {
    let mut case = Case::new("C-1");
    case.description = "Device 490154203237518 was reported, customer on 0798765432.".into();
    case.structured.imei = Some("35-693803-564380-9".into());
    case.structured.phone = Some("712 345 678".into());

    let out = extract(&case);
    assert_eq!(out.identifiers.imei.as_deref(), Some("356938035643809"));
    assert_eq!(out.identifiers.phone.as_deref(), Some("0712345678"));
    assert_eq!(out.phones, vec!["0798765432"]);
}

#[test]
fn narrative_fills_the_gaps() {
    let mut case = Case::new("C-2");
    case.subject = "Scam call".into();
    case.description = "The scammer called from 0712345678 and then 0798765432.".into();
    case.conversations = vec![
        "Customer: the suspect is John Kamau, he had my IMEI 356938035643809".into(),
        "   ".into(),
    ];

    let out = extract(&case);
    assert_eq!(out.identifiers.phone.as_deref(), Some("0712345678"));
    assert_eq!(out.identifiers.imei.as_deref(), Some("356938035643809"));
    assert_eq!(out.phones.len(), 2);
    assert_eq!(out.suspect_name.as_deref(), Some("John Kamau"));
}

#[test]
fn empty_case_extracts_nothing() {
    let out = extract(&Case::new("C-3"));
    assert_eq!(out.identifiers.count(), 0);
    assert!(!out.identifiers.has_lookup_key());
    assert!(out.phones.is_empty());
    assert!(out.suspect_name.is_none());
}

proptest! {
    #[test]
    fn normalized_phones_are_canonical(raw in "\\PC{0,24}") {
        if let Some(phone) = normalize_phone(&raw) {
            prop_assert!(phone.chars().all(|c| c.is_ascii_digit()));
            prop_assert!(phone.len() == 9 || phone.len() == 10);
            prop_assert_eq!(normalize_phone(&phone), Some(phone.clone()));
        }
    }

    #[test]
    fn nine_digit_subscriber_numbers_gain_a_zero(n in 100_000_000u32..1_000_000_000) {
        prop_assert_eq!(normalize_phone(&n.to_string()), Some(format!("0{n}")));
    }

    #[test]
    fn extraction_never_panics(subject in "\\PC{0,80}", description in "\\PC{0,200}") {
        let mut case = Case::new("C-P");
        case.subject = subject;
        case.description = description;
        let out = extract(&case);
        prop_assert!(out.phones.iter().all(|p| normalize_phone(p).as_deref() == Some(p.as_str())));
    }
}
