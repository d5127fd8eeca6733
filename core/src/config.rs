//! Immutable lookup tables and thresholds.
//!
//! RULE: Loaded once at startup, wrapped in Arc, and handed explicitly to
//! every component that needs it. Nothing reads these as globals.

use crate::{
    executor::StageName,
    planner::{FraudType, Route},
    verdict::{Allegation, OutcomeTier, SuspectCategory},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeCutPoints {
    /// Confidence at or above this goes to field investigation.
    pub field_investigation: f64,
    /// Confidence at or above this (and below the above) is re-investigated.
    pub re_investigate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub fraud_score_critical:     f64,
    pub tamper_score_critical:    f64,
    pub zero_credit_days_evasion: i64,
    pub repeat_offender_cases:    usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationLimits {
    pub description:      usize,
    pub case_details:     usize,
    pub conversations:    usize,
    pub historical_cases: usize,
    pub historical_subject: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTimeouts {
    pub case_fetch_ms:     u64,
    pub stage_query_ms:    u64,
    pub planning_ms:       u64,
    pub classification_ms: u64,
    pub ticket_update_ms:  u64,
}

impl CallTimeouts {
    pub fn case_fetch(&self)     -> Duration { Duration::from_millis(self.case_fetch_ms) }
    pub fn stage_query(&self)    -> Duration { Duration::from_millis(self.stage_query_ms) }
    pub fn planning(&self)       -> Duration { Duration::from_millis(self.planning_ms) }
    pub fn classification(&self) -> Duration { Duration::from_millis(self.classification_ms) }
    pub fn ticket_update(&self)  -> Duration { Duration::from_millis(self.ticket_update_ms) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    pub outcome:                 OutcomeCutPoints,
    pub thresholds:              RiskThresholds,
    /// Allegations a fraud-likely verdict may carry.
    pub allegations:             Vec<Allegation>,
    pub allegation_sub_reasons:  HashMap<Allegation, String>,
    pub default_sub_reason:      String,
    pub reason_buckets:          HashMap<SuspectCategory, String>,
    /// Spelling fixes applied to reasons before they leave the engine.
    pub reason_standardization:  HashMap<String, String>,
    /// Optional stages each route runs (basic lookup is implied).
    pub routes:                  HashMap<Route, Vec<StageName>>,
    /// Estimated cost of each stage, used for cost-avoided accounting.
    pub stage_costs_ms:          HashMap<StageName, u64>,
    /// Fraud types that justify the most expensive stage on their own.
    pub expensive_stage_fraud_types: Vec<FraudType>,
    /// Lowercase phrases that justify the most expensive stage.
    pub strong_keywords:         Vec<String>,
    /// Device models the risk-signal stage has data for.
    pub risk_signal_models:      Vec<String>,
    pub truncation:              TruncationLimits,
    pub timeouts:                CallTimeouts,
    pub workers:                 usize,
    pub fallback_public_note:    String,
}

impl TriageConfig {
    /// Load from `{data_dir}/triage/triage_config.json`.
    /// In tests, use TriageConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/triage/triage_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: TriageConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        log::debug!("Loaded triage config from {path}");
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let OutcomeCutPoints { field_investigation: hi, re_investigate: lo } = self.outcome;
        if !(0.0..=1.0).contains(&hi) || !(0.0..=1.0).contains(&lo) || lo > hi {
            anyhow::bail!("outcome cut points must satisfy 0 <= re_investigate <= field_investigation <= 1");
        }
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        let t = &self.timeouts;
        if [t.case_fetch_ms, t.stage_query_ms, t.planning_ms, t.classification_ms, t.ticket_update_ms]
            .contains(&0)
        {
            anyhow::bail!("every call timeout must be non-zero");
        }
        if self.allegations.is_empty() {
            anyhow::bail!("allegation set must not be empty");
        }
        Ok(())
    }

    /// Outcome tier from confidence alone. Any tier the classifier
    /// suggested is ignored.
    pub fn outcome_tier(&self, confidence: f64) -> OutcomeTier {
        if confidence >= self.outcome.field_investigation {
            OutcomeTier::FieldInvestigation
        } else if confidence >= self.outcome.re_investigate {
            OutcomeTier::ReInvestigate
        } else {
            OutcomeTier::NoAction
        }
    }

    pub fn stage_cost_ms(&self, stage: StageName) -> u64 {
        self.stage_costs_ms.get(&stage).copied().unwrap_or(0)
    }

    /// The single most expensive optional stage per the cost table.
    /// Ties resolve to the later stage in execution order.
    pub fn expensive_stage(&self) -> StageName {
        StageName::OPTIONAL
            .into_iter()
            .max_by_key(|s| self.stage_cost_ms(*s))
            .unwrap_or(StageName::Behavioral)
    }

    pub fn route_stages(&self, route: Route) -> &[StageName] {
        self.routes.get(&route).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn sub_reason(&self, allegation: Option<Allegation>) -> String {
        allegation
            .and_then(|a| self.allegation_sub_reasons.get(&a))
            .cloned()
            .unwrap_or_else(|| self.default_sub_reason.clone())
    }

    pub fn reason(&self, category: SuspectCategory) -> String {
        let raw = self
            .reason_buckets
            .get(&category)
            .cloned()
            .unwrap_or_else(|| "Suspected Fraud".to_string());
        self.reason_standardization.get(&raw).cloned().unwrap_or(raw)
    }

    pub fn supports_risk_signals(&self, device_model: &str) -> bool {
        self.risk_signal_models
            .iter()
            .any(|m| m.eq_ignore_ascii_case(device_model.trim()))
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        use Allegation::*;
        use StageName::*;

        let allegation_sub_reasons = [
            (CashLoanFraud,             "Cash Payments"),
            (CashPayments,              "Cash Payments"),
            (IdentityTheft,             "Identity theft"),
            (HackingAndTampering,       "Hacking and tampering"),
            (HardwareTheftLostAndFound, "Hardware theft"),
            (HardwareTheftDsr,          "Hardware theft"),
            (Resale,                    "Resale"),
            (StolenStock,               "Hardware theft"),
        ]
        .into_iter()
        .map(|(a, s)| (a, s.to_string()))
        .collect();

        let reason_buckets = [
            (SuspectCategory::InternalStaff, "DSR fraud"),
            (SuspectCategory::ExternalParty, "External/Noncustomer fraud"),
            (SuspectCategory::Customer,      "Customer fraud"),
            (SuspectCategory::Unknown,       "Suspected Fraud"),
        ]
        .into_iter()
        .map(|(c, r)| (c, r.to_string()))
        .collect();

        let reason_standardization = [
            ("Cash loan fraud", "Cash Loan Fraud"),
            ("Customer fraud",  "Customer Fraud"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let routes = [
            (Route::DeviceTamperingStandard, vec![RiskSignal, Historical]),
            (Route::AccountTakeoverFull,     vec![Historical, Behavioral]),
            (Route::CashLoanComprehensive,   vec![RiskSignal, Historical, Behavioral]),
            (Route::PaymentFraudBasic,       vec![RiskSignal, Historical]),
            (Route::ExternalScamQuick,       vec![Historical]),
            (Route::QuickLookup,             vec![Historical]),
        ]
        .into_iter()
        .collect();

        let stage_costs_ms = [
            (BasicLookup, 100),
            (RiskSignal,  200),
            (Historical,  50),
            (Behavioral,  3500),
        ]
        .into_iter()
        .collect();

        Self {
            outcome: OutcomeCutPoints { field_investigation: 0.70, re_investigate: 0.55 },
            thresholds: RiskThresholds {
                fraud_score_critical:     0.70,
                tamper_score_critical:    0.90,
                zero_credit_days_evasion: 30,
                repeat_offender_cases:    3,
            },
            allegations: Allegation::ALL.to_vec(),
            allegation_sub_reasons,
            default_sub_reason: "Cash Payments".to_string(),
            reason_buckets,
            reason_standardization,
            routes,
            stage_costs_ms,
            expensive_stage_fraud_types: vec![FraudType::AccountTakeover, FraudType::NetworkFraud],
            strong_keywords: [
                "unauthorized login",
                "unauthorised login",
                "pin reset",
                "reset pin",
                "reset my pin",
                "multiple devices",
                "hacked account",
                "sim swap",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            risk_signal_models: [
                "M-KOPA X2", "M-KOPA X20", "M-KOPA X3", "M-KOPA X30",
                "M-KOPA S34", "M-KOPA M10", "M-KOPA 6", "M-KOPA 6000",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            truncation: TruncationLimits {
                description:        1000,
                case_details:       1000,
                conversations:      500,
                historical_cases:   5,
                historical_subject: 60,
            },
            timeouts: CallTimeouts {
                case_fetch_ms:     30_000,
                stage_query_ms:    20_000,
                planning_ms:       60_000,
                classification_ms: 90_000,
                ticket_update_ms:  30_000,
            },
            workers: 4,
            fallback_public_note:
                "Thank you for reporting this. Our fraud team has reviewed the case and will follow up with the next steps."
                    .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        TriageConfig::default().validate().unwrap();
    }

    #[test]
    fn behavioral_is_the_expensive_stage() {
        assert_eq!(TriageConfig::default().expensive_stage(), StageName::Behavioral);
    }

    #[test]
    fn reasons_are_standardized() {
        let config = TriageConfig::default();
        assert_eq!(config.reason(SuspectCategory::Customer), "Customer Fraud");
        assert_eq!(config.reason(SuspectCategory::InternalStaff), "DSR fraud");
    }

    #[test]
    fn unmapped_allegation_falls_back() {
        let mut config = TriageConfig::default();
        config.allegation_sub_reasons.remove(&Allegation::Resale);
        assert_eq!(config.sub_reason(Some(Allegation::Resale)), "Cash Payments");
        assert_eq!(config.sub_reason(None), "Cash Payments");
    }

    #[test]
    fn inverted_cut_points_are_rejected() {
        let mut config = TriageConfig::default();
        config.outcome.re_investigate = 0.9;
        assert!(config.validate().is_err());
    }
}
