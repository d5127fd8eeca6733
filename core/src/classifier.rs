//! Classifier adapter: the boundary to the classification service.
//!
//! Outbound: builds planning and classification requests, truncating
//! free text to the configured limits.
//! Inbound: strips presentation wrapping off the raw answer and validates
//! it against a strict schema. A failure here is MalformedResponse and is
//! never papered over with defaults.

use crate::{
    aggregator::EvidenceBundle,
    case::{Case, StructuredFields},
    config::TriageConfig,
    error::{TriageError, TriageResult},
    evidence::{AccountProfile, BehavioralSnapshot, HistoricalCase, RiskSignals},
    executor::StageName,
    extractor::{Extraction, IdentifierSet},
    planner::{FraudType, RiskTier, Route, StagePlan},
    verdict::{Allegation, VerdictStatus},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

pub const PLANNING_SERVICE: &str = "planning";
pub const CLASSIFICATION_SERVICE: &str = "classification";

// ── Requests ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteOption {
    pub route:  Route,
    pub stages: Vec<StageName>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanningRequest {
    pub case_id:       String,
    pub subject:       String,
    pub description:   String,
    pub case_details:  String,
    pub conversations: String,
    pub known_identifiers: IdentifierSet,
    pub fraud_types:   Vec<FraudType>,
    pub routes:        Vec<RouteOption>,
}

/// A worked example shipped with every classification request.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CalibrationExample {
    pub label:       &'static str,
    pub description: &'static str,
    pub signals:     &'static str,
    pub expected:    &'static str,
}

pub const CALIBRATION_EXAMPLES: [CalibrationExample; 5] = [
    CalibrationExample {
        label:       "external_scam",
        description: "Fake lender page on social media; the customer reported it before paying",
        signals:     "no risk signals, no behavioral data, no prior cases",
        expected:    "fraud_likely 0.92, cash_loan_fraud, external suspect",
    },
    CalibrationExample {
        label:       "device_tampering",
        description: "Lock disabled and the device misbehaves",
        signals:     "fraud score 0.72, tamper score 0.85, 45 zero-credit days, 2 prior cases",
        expected:    "fraud_likely 0.88, hacking_and_tampering, customer suspect",
    },
    CalibrationExample {
        label:       "account_takeover",
        description: "PIN reset the customer never asked for",
        signals:     "no risk signals; PIN reset from a new device, linked to a suspicious device",
        expected:    "fraud_likely 0.95, identity_theft, external suspect, fraud ring",
    },
    CalibrationExample {
        label:       "wrong_escalation",
        description: "Manager following up on a routine screening",
        signals:     "low risk scores, no behavioral flags, account in good standing",
        expected:    "not_fraud 0.92, no action",
    },
    CalibrationExample {
        label:       "payment_evasion",
        description: "Device problems and the customer has stopped paying",
        signals:     "tamper score 0.65, 55 zero-credit days, 1 prior case",
        expected:    "fraud_likely 0.78, hacking_and_tampering, re-investigate",
    },
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassificationRequest {
    pub case_id:         String,
    pub subject:         String,
    pub case_details:    String,
    pub conversations:   String,
    pub fraud_type:      FraudType,
    pub risk_tier:       RiskTier,
    pub identifiers:     IdentifierSet,
    /// Phone numbers seen in the narrative, canonical form.
    pub phones_seen:     Vec<String>,
    pub suspect_name_hint: Option<String>,
    pub account_profile: Option<AccountProfile>,
    pub risk_signals:    Option<RiskSignals>,
    pub historical_case_count: usize,
    pub historical_cases: Vec<HistoricalCase>,
    pub behavioral:      Option<BehavioralSnapshot>,
    pub stages_executed: Vec<StageName>,
    pub allegations:     Vec<Allegation>,
    pub calibration:     Vec<CalibrationExample>,
}

// ── Responses ─────────────────────────────────────────────────────────────

/// A validated planning answer. Field names follow the service's schema.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PlanResponse {
    #[serde(default)]
    pub identifiers_extracted: Option<StructuredFields>,
    pub fraud_type:          FraudType,
    pub risk_level:          RiskTier,
    pub investigation_route: Route,
    #[serde(alias = "execute_stage_3_dfrs")]
    pub execute_risk_signal: bool,
    #[serde(alias = "execute_stage_4_history")]
    pub execute_historical:  bool,
    #[serde(alias = "execute_stage_5_behavioral")]
    pub execute_behavioral:  bool,
    pub confidence:          f64,
    #[serde(default)]
    pub reasoning:           String,
    #[serde(default)]
    pub key_concerns:        Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RiskFactorClaims {
    #[serde(default)]
    pub dfrs_fraud_score:            Option<f64>,
    #[serde(default)]
    pub dfrs_tamper_score:           Option<f64>,
    #[serde(default)]
    pub behavioral_account_takeover: bool,
    #[serde(default)]
    pub behavioral_fraud_ring:       bool,
    #[serde(default)]
    pub repeat_offender:             bool,
    #[serde(default)]
    pub payment_evasion:             bool,
}

/// A validated classification answer, before the rule engine sees it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VerdictResponse {
    pub fraud_status:           VerdictStatus,
    pub confidence:             f64,
    #[serde(default)]
    pub primary_allegation:     Option<String>,
    #[serde(default)]
    pub suspect_type:           Option<String>,
    #[serde(default)]
    pub suspect_name:           Option<String>,
    #[serde(default)]
    pub suspect_number:         Option<String>,
    /// Suggested outcome; the rule engine ignores it.
    #[serde(default)]
    pub case_outcome:           Option<String>,
    #[serde(default)]
    pub investigation_summary:  Option<String>,
    #[serde(default)]
    pub public_note:            Option<String>,
    #[serde(default)]
    pub key_evidence:           Vec<String>,
    #[serde(default)]
    pub risk_factors:           RiskFactorClaims,
    #[serde(default)]
    pub recommended_next_steps: Vec<String>,
}

// ── Adapter ───────────────────────────────────────────────────────────────

pub struct ClassifierAdapter {
    config: Arc<TriageConfig>,
}

impl ClassifierAdapter {
    pub fn new(config: Arc<TriageConfig>) -> Self {
        Self { config }
    }

    pub fn planning_request(&self, case: &Case, ids: &IdentifierSet) -> PlanningRequest {
        let limits = &self.config.truncation;
        let routes = Route::ALL
            .into_iter()
            .filter_map(|route| {
                let stages = self.config.routes.get(&route)?.clone();
                Some(RouteOption { route, stages })
            })
            .collect();

        PlanningRequest {
            case_id:       case.case_id.clone(),
            subject:       case.subject.clone(),
            description:   truncate_head(&case.description, limits.description),
            case_details:  truncate_head(&case.case_details, limits.case_details),
            conversations: truncate_head(&case.conversation_text(), limits.conversations),
            known_identifiers: ids.clone(),
            fraud_types:   FraudType::ALL.to_vec(),
            routes,
        }
    }

    pub fn classification_request(
        &self,
        case: &Case,
        extraction: &Extraction,
        plan: &StagePlan,
        bundle: &EvidenceBundle,
    ) -> ClassificationRequest {
        let limits = &self.config.truncation;
        let historical_cases = bundle
            .historical_cases
            .iter()
            .take(limits.historical_cases)
            .map(|c| HistoricalCase {
                subject: c.subject.as_deref().map(|s| truncate_head(s, limits.historical_subject)),
                ..c.clone()
            })
            .collect();

        ClassificationRequest {
            case_id:         case.case_id.clone(),
            subject:         case.subject.clone(),
            case_details:    truncate_head(&case.case_details, limits.case_details),
            conversations:   truncate_head(&case.conversation_text(), limits.conversations),
            fraud_type:      plan.fraud_type,
            risk_tier:       plan.risk_tier,
            identifiers:     extraction.identifiers.clone(),
            phones_seen:     extraction.phones.clone(),
            suspect_name_hint: extraction.suspect_name.clone(),
            account_profile: bundle.has_account().then(|| bundle.account_profile.clone()),
            risk_signals:    bundle.has_risk_signals().then(|| bundle.risk_signals.clone()),
            historical_case_count: bundle.historical_cases.len(),
            historical_cases,
            behavioral:      bundle.has_behavioral().then(|| bundle.behavioral.clone()),
            stages_executed: bundle.execution_log.stages_executed(),
            allegations:     self.config.allegations.clone(),
            calibration:     CALIBRATION_EXAMPLES.to_vec(),
        }
    }

    pub fn parse_plan(&self, raw: &str) -> TriageResult<PlanResponse> {
        let plan: PlanResponse = parse_strict(PLANNING_SERVICE, raw)?;
        check_confidence(PLANNING_SERVICE, plan.confidence)?;
        Ok(plan)
    }

    pub fn parse_verdict(&self, raw: &str) -> TriageResult<VerdictResponse> {
        let verdict: VerdictResponse = parse_strict(CLASSIFICATION_SERVICE, raw)?;
        check_confidence(CLASSIFICATION_SERVICE, verdict.confidence)?;
        for (name, score) in [
            ("dfrs_fraud_score", verdict.risk_factors.dfrs_fraud_score),
            ("dfrs_tamper_score", verdict.risk_factors.dfrs_tamper_score),
        ] {
            if let Some(s) = score {
                if !(0.0..=1.0).contains(&s) {
                    return Err(TriageError::malformed(
                        CLASSIFICATION_SERVICE,
                        format!("{name} {s} outside [0, 1]"),
                    ));
                }
            }
        }
        Ok(verdict)
    }
}

fn parse_strict<T: DeserializeOwned>(service: &str, raw: &str) -> TriageResult<T> {
    let body = strip_formatting(raw)
        .ok_or_else(|| TriageError::malformed(service, "no JSON object in response"))?;
    serde_json::from_str(body).map_err(|e| {
        log::warn!("{service} response rejected: {e}");
        TriageError::malformed(service, e.to_string())
    })
}

fn check_confidence(service: &str, confidence: f64) -> TriageResult<()> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(TriageError::malformed(service, format!("confidence {confidence} outside [0, 1]")))
    }
}

/// Drop code fences and any prose around the outermost JSON object.
pub fn strip_formatting(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_head(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ClassifierAdapter {
        ClassifierAdapter::new(Arc::new(TriageConfig::default()))
    }

    const PLAN: &str = r#"{
        "identifiers_extracted": {"IMEI": "356789012345678", "LoanID": null},
        "fraud_type": "device_tampering",
        "risk_level": "high",
        "investigation_route": "device_tampering_standard",
        "execute_stage_3_dfrs": true,
        "execute_stage_4_history": true,
        "execute_stage_5_behavioral": false,
        "confidence": 0.85,
        "reasoning": "lock bypass reported",
        "estimated_time_ms": 350
    }"#;

    #[test]
    fn fenced_plan_parses() {
        let raw = format!("Here is the plan:\n```json\n{PLAN}\n```\n");
        let plan = adapter().parse_plan(&raw).unwrap();
        assert_eq!(plan.fraud_type, FraudType::DeviceTampering);
        assert_eq!(plan.investigation_route, Route::DeviceTamperingStandard);
        assert!(plan.execute_risk_signal && !plan.execute_behavioral);
        let ids = plan.identifiers_extracted.unwrap();
        assert_eq!(ids.imei.as_deref(), Some("356789012345678"));
        assert_eq!(ids.loan_id, None);
    }

    #[test]
    fn unknown_route_is_malformed() {
        let raw = PLAN.replace("device_tampering_standard", "full_sweep");
        let err = adapter().parse_plan(&raw).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn stage_flag_must_be_boolean() {
        let raw = PLAN.replace("\"execute_stage_3_dfrs\": true", "\"execute_stage_3_dfrs\": \"yes\"");
        assert!(adapter().parse_plan(&raw).is_err());
    }

    #[test]
    fn prose_only_is_malformed() {
        let err = adapter().parse_verdict("I could not decide.").unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn verdict_confidence_out_of_range_is_malformed() {
        let raw = r#"{"fraud_status": "Likely fraud", "confidence": 1.4}"#;
        let err = adapter().parse_verdict(raw).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[test]
    fn verdict_minimal_fields_parse() {
        let raw = r#"{"fraud_status": "Not fraud", "confidence": 0.9, "primary_allegation": null}"#;
        let v = adapter().parse_verdict(raw).unwrap();
        assert_eq!(v.fraud_status, VerdictStatus::NotFraud);
        assert!(v.key_evidence.is_empty());
        assert!(!v.risk_factors.behavioral_fraud_ring);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_head("héllo wörld", 4), "héll");
        assert_eq!(truncate_head("short", 100), "short");
        assert_eq!(truncate_head("", 3), "");
    }

    #[test]
    fn classification_request_trims_history() {
        let config = TriageConfig::default();
        let mut bundle = EvidenceBundle::default();
        bundle.historical_cases = (0..8)
            .map(|i| HistoricalCase {
                case_id: Some(format!("T-{i}")),
                subject: Some("x".repeat(200)),
                ..Default::default()
            })
            .collect();
        let plan = StagePlan {
            risk_signal: false,
            historical: true,
            behavioral: false,
            fraud_type: FraudType::Unknown,
            risk_tier: RiskTier::Low,
            route: Route::QuickLookup,
            rationale: String::new(),
            confidence: 0.5,
            key_concerns: vec![],
            suggested_identifiers: StructuredFields::default(),
            overrides: vec![],
        };
        let req = adapter().classification_request(
            &Case::new("C-1"),
            &Extraction::default(),
            &plan,
            &bundle,
        );
        assert_eq!(req.historical_case_count, 8);
        assert_eq!(req.historical_cases.len(), config.truncation.historical_cases);
        let subject = req.historical_cases[0].subject.clone().unwrap_or_default();
        assert_eq!(subject.chars().count(), config.truncation.historical_subject);
        assert!(req.account_profile.is_none());
        assert_eq!(req.calibration.len(), 5);
    }
}
