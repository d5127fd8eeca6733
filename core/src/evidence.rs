//! Typed views over evidence-store rows.
//!
//! Rows come from a warehouse with loose typing (ids may be numbers,
//! flags may be 0/1), so every reader here is tolerant: a column that is
//! missing or of the wrong shape reads as None.
//!
//! Column contract (snake_case):
//!   basic_lookup: loan_id, account_id, account_number, customer_id,
//!                 device_id, imei, device_model, loan_status, product,
//!                 fulfillment_date, principal_amount
//!   risk_signal:  snapshot_date, fraud_score, tamper_score, tamper_reason,
//!                 zero_credit_days, risk_segment, days_since_last_tamper
//!   historical:   case_id, subject, status, created_at, reason, sub_reason
//!   behavioral:   cash_loan_taken, cash_loan_amount,
//!                 reset_pin_from_new_device, days_since_pin_reset,
//!                 linked_suspicious_device, unique_installations

use crate::types::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountProfile {
    pub loan_id:          Option<String>,
    pub account_id:       Option<String>,
    pub account_number:   Option<String>,
    pub customer_id:      Option<String>,
    pub device_id:        Option<String>,
    pub imei:             Option<String>,
    pub device_model:     Option<String>,
    pub loan_status:      Option<String>,
    pub product:          Option<String>,
    pub fulfillment_date: Option<String>,
    pub principal_amount: Option<f64>,
}

impl AccountProfile {
    pub fn from_row(row: &Row) -> Self {
        Self {
            loan_id:          text(row, "loan_id"),
            account_id:       text(row, "account_id"),
            account_number:   text(row, "account_number"),
            customer_id:      text(row, "customer_id"),
            device_id:        text(row, "device_id"),
            imei:             text(row, "imei"),
            device_model:     text(row, "device_model"),
            loan_status:      text(row, "loan_status"),
            product:          text(row, "product"),
            fulfillment_date: text(row, "fulfillment_date"),
            principal_amount: number(row, "principal_amount"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskSignals {
    pub snapshot_date:          Option<String>,
    pub fraud_score:            Option<f64>,
    pub tamper_score:           Option<f64>,
    pub tamper_reason:          Option<String>,
    pub zero_credit_days:       Option<i64>,
    pub risk_segment:           Option<String>,
    pub days_since_last_tamper: Option<i64>,
}

impl RiskSignals {
    pub fn from_row(row: &Row) -> Self {
        Self {
            snapshot_date:          text(row, "snapshot_date"),
            fraud_score:            number(row, "fraud_score"),
            tamper_score:           number(row, "tamper_score"),
            tamper_reason:          text(row, "tamper_reason"),
            zero_credit_days:       integer(row, "zero_credit_days"),
            risk_segment:           text(row, "risk_segment"),
            days_since_last_tamper: integer(row, "days_since_last_tamper"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoricalCase {
    pub case_id:    Option<String>,
    pub subject:    Option<String>,
    pub status:     Option<String>,
    pub created_at: Option<String>,
    pub reason:     Option<String>,
    pub sub_reason: Option<String>,
}

impl HistoricalCase {
    pub fn from_row(row: &Row) -> Self {
        Self {
            case_id:    text(row, "case_id"),
            subject:    text(row, "subject"),
            status:     text(row, "status"),
            created_at: text(row, "created_at"),
            reason:     text(row, "reason"),
            sub_reason: text(row, "sub_reason"),
        }
    }

    /// Prior case filed under a fraud reason.
    pub fn is_fraud_related(&self) -> bool {
        [&self.reason, &self.sub_reason, &self.subject]
            .into_iter()
            .flatten()
            .any(|s| s.to_ascii_lowercase().contains("fraud"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BehavioralSnapshot {
    pub cash_loan_taken:           Option<bool>,
    pub cash_loan_amount:          Option<f64>,
    pub reset_pin_from_new_device: Option<bool>,
    pub days_since_pin_reset:      Option<i64>,
    pub linked_suspicious_device:  Option<bool>,
    pub unique_installations:      Option<i64>,
}

impl BehavioralSnapshot {
    pub fn from_row(row: &Row) -> Self {
        Self {
            cash_loan_taken:           flag(row, "cash_loan_taken"),
            cash_loan_amount:          number(row, "cash_loan_amount"),
            reset_pin_from_new_device: flag(row, "reset_pin_from_new_device"),
            days_since_pin_reset:      integer(row, "days_since_pin_reset"),
            linked_suspicious_device:  flag(row, "linked_suspicious_device"),
            unique_installations:      integer(row, "unique_installations"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn pin_reset_from_new_device(&self) -> bool {
        self.reset_pin_from_new_device.unwrap_or(false)
    }

    pub fn linked_to_suspicious_device(&self) -> bool {
        self.linked_suspicious_device.unwrap_or(false)
    }
}

// ── Tolerant column readers ────────────────────────────────────────────────

fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(row: &Row, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn integer(row: &Row, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Nearest integer, or None when it does not fit an i64.
fn whole(f: f64) -> Option<i64> {
    let r = f.round();
    (r.is_finite() && r >= i64::MIN as f64 && r < i64::MAX as f64).then_some(r as i64)
}

fn flag(row: &Row, key: &str) -> Option<bool> {
    match row.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn numeric_ids_read_as_text() {
        let p = AccountProfile::from_row(&row(json!({ "account_id": 4411, "imei": "  " })));
        assert_eq!(p.account_id.as_deref(), Some("4411"));
        assert_eq!(p.imei, None);
    }

    #[test]
    fn flags_accept_warehouse_encodings() {
        let b = BehavioralSnapshot::from_row(&row(json!({
            "reset_pin_from_new_device": 1,
            "linked_suspicious_device": "0",
            "cash_loan_taken": true,
        })));
        assert!(b.pin_reset_from_new_device());
        assert!(!b.linked_to_suspicious_device());
        assert_eq!(b.cash_loan_taken, Some(true));
    }

    #[test]
    fn out_of_range_counts_read_as_none() {
        let r = RiskSignals::from_row(&row(json!({
            "zero_credit_days": 3.6,
            "days_since_last_tamper": 1e300,
        })));
        assert_eq!(r.zero_credit_days, Some(4));
        assert_eq!(r.days_since_last_tamper, None);

        let b = BehavioralSnapshot::from_row(&row(json!({ "unique_installations": -1e19 })));
        assert_eq!(b.unique_installations, None);
    }

    #[test]
    fn empty_row_is_empty_snapshot() {
        assert!(RiskSignals::from_row(&Row::new()).is_empty());
        assert!(BehavioralSnapshot::from_row(&Row::new()).is_empty());
    }

    #[test]
    fn fraud_related_history() {
        let h = HistoricalCase { reason: Some("Customer Fraud".into()), ..Default::default() };
        assert!(h.is_fraud_related());
        assert!(!HistoricalCase::default().is_fraud_related());
    }
}
