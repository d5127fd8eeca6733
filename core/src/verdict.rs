//! The final classification of a case and its vocabulary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    #[serde(alias = "Likely fraud", alias = "likely_fraud")]
    FraudLikely,
    #[serde(alias = "Not fraud")]
    NotFraud,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FraudLikely => "fraud_likely",
            Self::NotFraud    => "not_fraud",
        }
    }
}

/// The fixed set of allegations a fraud-likely verdict may carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Allegation {
    CashPayments,
    HackingAndTampering,
    IdentityTheft,
    CashLoanFraud,
    HardwareTheftLostAndFound,
    HardwareTheftDsr,
    Resale,
    StolenStock,
}

impl Allegation {
    pub const ALL: [Allegation; 8] = [
        Self::CashPayments,
        Self::HackingAndTampering,
        Self::IdentityTheft,
        Self::CashLoanFraud,
        Self::HardwareTheftLostAndFound,
        Self::HardwareTheftDsr,
        Self::Resale,
        Self::StolenStock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CashPayments              => "cash_payments",
            Self::HackingAndTampering       => "hacking_and_tampering",
            Self::IdentityTheft             => "identity_theft",
            Self::CashLoanFraud             => "cash_loan_fraud",
            Self::HardwareTheftLostAndFound => "hardware_theft_lost_and_found",
            Self::HardwareTheftDsr          => "hardware_theft_dsr",
            Self::Resale                    => "resale",
            Self::StolenStock               => "stolen_stock",
        }
    }

    /// Label as it appears in the ticket system.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CashPayments              => "Cash Payments",
            Self::HackingAndTampering       => "Hacking & Tampering",
            Self::IdentityTheft             => "Identity Theft",
            Self::CashLoanFraud             => "Cash Loan Fraud",
            Self::HardwareTheftLostAndFound => "Hardware theft (Lost & Found)",
            Self::HardwareTheftDsr          => "Hardware theft DSR",
            Self::Resale                    => "Resale",
            Self::StolenStock               => "Stolen stock",
        }
    }

    /// Accepts either the snake_case code or the ticket-system label,
    /// ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        Self::ALL.into_iter().find(|a| {
            a.as_str().eq_ignore_ascii_case(wanted) || a.label().eq_ignore_ascii_case(wanted)
        })
    }
}

/// Top-level reason bucket, selected by who the suspect is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuspectCategory {
    InternalStaff,
    ExternalParty,
    Customer,
    Unknown,
}

impl SuspectCategory {
    /// Map the classifier's free-form suspect type onto a category.
    pub fn classify(suspect_type: Option<&str>) -> Self {
        let Some(raw) = suspect_type else { return Self::Unknown };
        let t = raw.trim().to_ascii_lowercase();
        if t.is_empty() {
            Self::Unknown
        } else if t == "dsr" || t.contains("internal") || t.contains("staff") || t.contains("agent") {
            Self::InternalStaff
        } else if t.contains("external") || t.contains("noncustomer") || t.contains("third") {
            Self::ExternalParty
        } else if t.contains("customer") {
            Self::Customer
        } else {
            Self::Unknown
        }
    }
}

/// Operational next step, a pure function of confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTier {
    FieldInvestigation,
    ReInvestigate,
    NoAction,
}

impl OutcomeTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FieldInvestigation => "field investigation",
            Self::ReInvestigate      => "re-investigate",
            Self::NoAction           => "no action",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuspectDescriptor {
    pub category: Option<SuspectCategory>,
    pub name:     Option<String>,
    /// Canonical phone number, or None if it did not normalize.
    pub phone:    Option<String>,
}

/// Risk flags after evidence has been reconciled with the classifier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskFlags {
    pub account_takeover:     bool,
    pub fraud_ring:           bool,
    pub payment_evasion:      bool,
    pub repeat_offender:      bool,
    pub critical_fraud_score: bool,
    pub critical_tamper:      bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub status:              VerdictStatus,
    pub confidence:          f64,
    /// Some iff status is FraudLikely.
    pub allegation:          Option<Allegation>,
    pub suspect:             SuspectDescriptor,
    pub reason:              String,
    pub sub_reason:          String,
    pub outcome_tier:        OutcomeTier,
    pub risk_flags:          RiskFlags,
    pub evidence:            Vec<String>,
    pub recommended_actions: Vec<String>,
    pub summary:             String,
    /// Customer-visible note, already screened for identifying data.
    pub public_note:         String,
    /// Human-readable record of every rule that overrode the classifier.
    pub overrides:           Vec<String>,
}

impl Verdict {
    pub fn is_fraud_likely(&self) -> bool {
        self.status == VerdictStatus::FraudLikely
    }
}

/// Projection of a verdict onto the ticket system's fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketUpdate {
    pub fraud_status:   Option<String>,
    pub case_outcome:   String,
    pub allegation:     Option<String>,
    pub reason:         String,
    pub sub_reason:     String,
    pub account_number: Option<String>,
    pub suspect_type:   Option<SuspectCategory>,
    pub suspect_name:   Option<String>,
    pub suspect_phone:  Option<String>,
    /// Audit block appended below the existing case details.
    pub case_details:   String,
    pub public_comment: String,
}
