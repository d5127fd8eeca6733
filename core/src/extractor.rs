//! Identifier extraction and normalization.
//!
//! RULE: Nothing here may fail. Anything that does not parse degrades to
//! None or an empty list so the pipeline is never blocked by bad text.

use crate::case::{Case, StructuredFields};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static RE_PHONE_WITH_ZERO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b0[17]\d{8}\b").ok());
static RE_PHONE_WITHOUT_ZERO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[17]\d{8}\b").ok());
static RE_IMEI: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{15}\b").ok());

/// Capitalized word run following a suspect keyword.
static RE_NAME_AFTER_KEYWORD: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i:suspect|fraudster|scammer)(?:'s name)?(?:\s+is)?[:\s]+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){0,2})").ok()
});
static RE_NAME_INTRODUCED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i:introduced\s+(?:himself|herself|themselves)?\s*as|named?|called)\s+([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)?)").ok()
});

/// Capitalized tokens that follow the keywords but are not names.
const NON_NAME_TOKENS: &[&str] = &[
    "Customer", "Client", "Person", "Manager", "Agent", "Unknown", "The", "This", "That",
    "Called", "Said", "Claimed", "Number", "Phone", "Sent", "Asked", "Told", "Has", "Was",
];

/// Normalized identifiers for one case. Every field has already been
/// through normalization; stages may use them as query parameters as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentifierSet {
    pub imei:           Option<String>,
    pub loan_id:        Option<String>,
    pub account_number: Option<String>,
    pub device_id:      Option<String>,
    pub customer_id:    Option<String>,
    pub account_id:     Option<String>,
    pub phone:          Option<String>,
}

impl IdentifierSet {
    /// Build from raw fields, normalizing each one.
    pub fn from_raw(raw: &StructuredFields) -> Self {
        Self {
            imei:           raw.imei.as_deref().and_then(normalize_imei),
            loan_id:        raw.loan_id.as_deref().and_then(normalize_id),
            account_number: raw.account_number.as_deref().and_then(normalize_id),
            device_id:      raw.device_id.as_deref().and_then(normalize_id),
            customer_id:    raw.customer_id.as_deref().and_then(normalize_id),
            account_id:     raw.account_id.as_deref().and_then(normalize_id),
            phone:          raw.phone.as_deref().and_then(normalize_phone),
        }
    }

    /// Fill empty fields from `other` (raw values, normalized on the way in).
    /// Present fields are never overwritten.
    pub fn fill_missing(&mut self, other: &StructuredFields) {
        let incoming = Self::from_raw(other);
        fill(&mut self.imei, incoming.imei);
        fill(&mut self.loan_id, incoming.loan_id);
        fill(&mut self.account_number, incoming.account_number);
        fill(&mut self.device_id, incoming.device_id);
        fill(&mut self.customer_id, incoming.customer_id);
        fill(&mut self.account_id, incoming.account_id);
        fill(&mut self.phone, incoming.phone);
    }

    pub fn has_device_identifier(&self) -> bool {
        self.imei.is_some() || self.device_id.is_some()
    }

    /// True if at least one field can drive the basic lookup.
    pub fn has_lookup_key(&self) -> bool {
        self.imei.is_some()
            || self.loan_id.is_some()
            || self.account_number.is_some()
            || self.device_id.is_some()
            || self.customer_id.is_some()
            || self.account_id.is_some()
    }

    pub fn count(&self) -> usize {
        [
            &self.imei, &self.loan_id, &self.account_number, &self.device_id,
            &self.customer_id, &self.account_id, &self.phone,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Everything pulled out of a case before planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Extraction {
    pub identifiers:    IdentifierSet,
    /// Every canonical phone number seen in the narrative, deduplicated.
    pub phones:         Vec<String>,
    pub suspect_name:   Option<String>,
}

/// Extract identifiers from a case: structured fields pass through,
/// free text fills the gaps.
pub fn extract(case: &Case) -> Extraction {
    let narrative = case.narrative();
    let mut identifiers = IdentifierSet::from_raw(&case.structured);
    let phones = extract_phone_numbers(&narrative);

    if identifiers.phone.is_none() {
        identifiers.phone = phones.first().cloned();
    }
    if identifiers.imei.is_none() {
        identifiers.imei = find_first(&RE_IMEI, &narrative).and_then(|s| normalize_imei(&s));
    }

    let suspect_name = extract_suspect_name(&narrative);
    log::debug!(
        "case {}: {} identifiers, {} phones, suspect name {}",
        case.case_id,
        identifiers.count(),
        phones.len(),
        if suspect_name.is_some() { "found" } else { "absent" },
    );

    Extraction { identifiers, phones, suspect_name }
}

/// Strip non-digits; a 9-digit number without a leading zero gets one.
/// Only 9- or 10-digit results are accepted.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 9 && !digits.starts_with('0') {
        digits.insert(0, '0');
    }
    matches!(digits.len(), 9 | 10).then_some(digits)
}

/// Phone numbers in free text, canonicalized, in order of appearance.
pub fn extract_phone_numbers(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&RE_PHONE_WITH_ZERO, &RE_PHONE_WITHOUT_ZERO] {
        if let Some(re) = re.as_ref() {
            found.extend(re.find_iter(text).map(|m| (m.start(), m.as_str().to_string())));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut phones: Vec<String> = Vec::new();
    for (_, raw) in found {
        if let Some(phone) = normalize_phone(&raw) {
            if !phones.contains(&phone) {
                phones.push(phone);
            }
        }
    }
    phones
}

/// Name of the suspect if the narrative introduces one near a keyword.
pub fn extract_suspect_name(text: &str) -> Option<String> {
    for re in [&RE_NAME_AFTER_KEYWORD, &RE_NAME_INTRODUCED] {
        let Some(re) = re.as_ref() else { continue };
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(1) else { continue };
            let words: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .take_while(|w| !NON_NAME_TOKENS.contains(w))
                .collect();
            let name = words.join(" ");
            if name.len() > 2 {
                return Some(name);
            }
        }
    }
    None
}

fn find_first(re: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    re.as_ref()?.find(text).map(|m| m.as_str().to_string())
}

/// Trim and drop internal whitespace; empty becomes None.
fn normalize_id(raw: &str) -> Option<String> {
    let id: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    (!id.is_empty()).then_some(id)
}

/// Digits only, 14 to 16 of them.
fn normalize_imei(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (14..=16).contains(&digits.len()).then_some(digits)
}
