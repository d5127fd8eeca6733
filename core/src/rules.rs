//! Rule engine: the deterministic layer between classifier and ticket.
//!
//! RULES (applied in this order, each override recorded on the verdict):
//!   1. Confidence must lie in [0, 1].
//!   2. fraud_likely needs an allegation from the configured set;
//!      not_fraud never carries one.
//!   3. Suspect phone is normalized or dropped.
//!   4. Reason comes from the suspect category, sub-reason from the
//!      allegation. Both are standardized through config.
//!   5. Outcome tier comes from confidence alone.
//!   6. Risk flags the evidence proves are set even if the classifier
//!      missed them.
//!   7. The public note is screened for identifying data and replaced
//!      with the fallback note on any hit.
//!
//! Breaking rule 1 or 2 is a ValidationViolation: the case goes to
//! manual review instead of reaching the ticket.

use crate::{
    aggregator::EvidenceBundle,
    case::Case,
    classifier::VerdictResponse,
    config::TriageConfig,
    error::{TriageError, TriageResult},
    extractor::normalize_phone,
    verdict::{
        Allegation, OutcomeTier, RiskFlags, SuspectCategory, SuspectDescriptor, TicketUpdate,
        Verdict, VerdictStatus,
    },
};
use regex::Regex;
use std::sync::{Arc, LazyLock};

// ── Public-note blocklist ─────────────────────────────────────────────────

/// Long digit runs: account numbers, IMEIs, unformatted phones.
static RE_DIGIT_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d{6,}").ok());
/// Phones written with separators, e.g. 0712 345 678 or 712-345-678.
static RE_SPACED_PHONE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b0?[17]\d{2}[\s-]\d{3}[\s-]\d{3}\b").ok());
/// Scores: bare decimals and percentages.
static RE_SCORE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:\b0?\.\d+\b)|(?:\b\d{1,3}(?:\.\d+)?\s?%)").ok());
/// Prefixed identifiers such as ACC-123456 or LN20931.
static RE_PREFIXED_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]{2,5}-?\d{4,}\b").ok());

fn matches(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|r| r.is_match(text))
}

/// Name of the first blocklist rule the note breaks, if any.
pub fn screen_public_note(note: &str, sensitive: &[String]) -> Option<&'static str> {
    if matches(&RE_DIGIT_RUN, note) || matches(&RE_PREFIXED_ID, note) {
        return Some("identifier");
    }
    if matches(&RE_SPACED_PHONE, note) {
        return Some("phone number");
    }
    if matches(&RE_SCORE, note) {
        return Some("score");
    }
    let lowered = note.to_lowercase();
    sensitive
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| s.chars().count() >= 3)
        .any(|s| lowered.contains(&s))
        .then_some("named value")
}

pub struct RuleEngine {
    config: Arc<TriageConfig>,
}

impl RuleEngine {
    pub fn new(config: Arc<TriageConfig>) -> Self {
        Self { config }
    }

    pub fn apply(
        &self,
        case_id: &str,
        response: VerdictResponse,
        bundle: &EvidenceBundle,
    ) -> TriageResult<Verdict> {
        let mut overrides = Vec::new();

        // 1
        let confidence = response.confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(TriageError::ValidationViolation(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        // 2
        let raw_allegation = response
            .primary_allegation
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        let allegation = match response.fraud_status {
            VerdictStatus::FraudLikely => Some(self.allegation(raw_allegation)?),
            VerdictStatus::NotFraud => {
                if let Some(raw) = raw_allegation {
                    overrides.push(format!("allegation '{raw}' dropped: not_fraud carries none"));
                }
                None
            }
        };

        // 3
        let suspect_name = response
            .suspect_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let suspect_phone = match response.suspect_number.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let phone = normalize_phone(raw);
                if phone.is_none() {
                    overrides.push(format!("suspect phone '{raw}' dropped: not a valid number"));
                }
                phone
            }
            _ => None,
        };
        let category = response
            .suspect_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|t| SuspectCategory::classify(Some(t)));

        // 4
        let reason = self.config.reason(category.unwrap_or(SuspectCategory::Unknown));
        let sub_reason = self.config.sub_reason(allegation);

        // 5
        let outcome_tier = self.config.outcome_tier(confidence);
        if let Some(suggested) = response.case_outcome.as_deref().and_then(suggested_tier) {
            if suggested != outcome_tier {
                overrides.push(format!(
                    "outcome '{}' replaced by '{}' from confidence {confidence:.2}",
                    suggested.label(),
                    outcome_tier.label()
                ));
            }
        }

        // 6
        let mut evidence = response.key_evidence.clone();
        let risk_flags = self.risk_flags(&response, bundle, &mut evidence, &mut overrides);

        // 7
        let mut sensitive: Vec<String> = [
            suspect_name.clone(),
            suspect_phone.clone(),
            response.suspect_number.clone(),
            bundle.account_profile.account_number.clone(),
            bundle.account_profile.account_id.clone(),
            bundle.account_profile.customer_id.clone(),
            bundle.account_profile.loan_id.clone(),
            bundle.account_profile.imei.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if let Some(name) = &suspect_name {
            sensitive.extend(name.split_whitespace().map(str::to_string));
        }
        let note = response.public_note.as_deref().map(str::trim).unwrap_or("");
        let public_note = if note.is_empty() {
            overrides.push("public note missing: fallback used".to_string());
            self.config.fallback_public_note.clone()
        } else if let Some(rule) = screen_public_note(note, &sensitive) {
            overrides.push(format!("public note replaced: contained {rule}"));
            self.config.fallback_public_note.clone()
        } else {
            note.to_string()
        };

        let mut recommended_actions = response.recommended_next_steps.clone();
        if recommended_actions.is_empty() {
            recommended_actions.push(default_action(outcome_tier).to_string());
        }

        for o in &overrides {
            log::info!("case {case_id}: rule override: {o}");
        }

        Ok(Verdict {
            status: response.fraud_status,
            confidence,
            allegation,
            suspect: SuspectDescriptor { category, name: suspect_name, phone: suspect_phone },
            reason,
            sub_reason,
            outcome_tier,
            risk_flags,
            evidence,
            recommended_actions,
            summary: response.investigation_summary.clone().unwrap_or_default(),
            public_note,
            overrides,
        })
    }

    fn allegation(&self, raw: Option<&str>) -> TriageResult<Allegation> {
        let raw = raw.ok_or_else(|| {
            TriageError::ValidationViolation("fraud_likely verdict without an allegation".into())
        })?;
        Allegation::parse(raw)
            .filter(|a| self.config.allegations.contains(a))
            .ok_or_else(|| {
                TriageError::ValidationViolation(format!("allegation '{raw}' is not in the allowed set"))
            })
    }

    fn risk_flags(
        &self,
        response: &VerdictResponse,
        bundle: &EvidenceBundle,
        evidence: &mut Vec<String>,
        overrides: &mut Vec<String>,
    ) -> RiskFlags {
        let t = &self.config.thresholds;
        let claims = &response.risk_factors;
        let signals = &bundle.risk_signals;

        let fraud_score = signals.fraud_score.or(claims.dfrs_fraud_score);
        let tamper_score = signals.tamper_score.or(claims.dfrs_tamper_score);
        let history = bundle.fraud_related_history();

        let proven = [
            (
                "account_takeover",
                claims.behavioral_account_takeover,
                bundle.behavioral.pin_reset_from_new_device(),
                "PIN reset from a new device".to_string(),
            ),
            (
                "fraud_ring",
                claims.behavioral_fraud_ring,
                bundle.behavioral.linked_to_suspicious_device(),
                "account linked to a suspicious device".to_string(),
            ),
            (
                "payment_evasion",
                claims.payment_evasion,
                signals.zero_credit_days.is_some_and(|d| d > t.zero_credit_days_evasion),
                format!(
                    "{} consecutive zero-credit days",
                    signals.zero_credit_days.unwrap_or_default()
                ),
            ),
            (
                "repeat_offender",
                claims.repeat_offender,
                history >= t.repeat_offender_cases,
                format!("{history} prior fraud-related cases"),
            ),
        ];

        let mut flags = [false; 4];
        for (i, (name, claimed, shown, line)) in proven.into_iter().enumerate() {
            flags[i] = claimed || shown;
            if shown && !claimed {
                overrides.push(format!("{name} set from evidence"));
                evidence.push(format!("Evidence store: {line}"));
            }
        }

        RiskFlags {
            account_takeover:     flags[0],
            fraud_ring:           flags[1],
            payment_evasion:      flags[2],
            repeat_offender:      flags[3],
            critical_fraud_score: fraud_score.is_some_and(|s| s >= t.fraud_score_critical),
            critical_tamper:      tamper_score.is_some_and(|s| s >= t.tamper_score_critical),
        }
    }

    /// Project a verdict onto ticket fields. The audit block is appended
    /// below whatever case details the ticket already holds.
    pub fn ticket_update(
        &self,
        case: &Case,
        verdict: &Verdict,
        bundle: &EvidenceBundle,
        investigated_at: &str,
    ) -> TicketUpdate {
        let mut audit = vec![
            format!("[Automated triage {investigated_at}]"),
            format!("Status: {} (confidence {:.2})", verdict.status.as_str(), verdict.confidence),
            format!("Outcome: {}", verdict.outcome_tier.label()),
        ];
        if let Some(a) = verdict.allegation {
            audit.push(format!("Allegation: {}", a.label()));
        }
        if !verdict.summary.is_empty() {
            audit.push(format!("Summary: {}", verdict.summary));
        }
        if !verdict.evidence.is_empty() {
            audit.push("Evidence:".to_string());
            audit.extend(verdict.evidence.iter().map(|e| format!("- {e}")));
        }
        audit.push("Recommended:".to_string());
        audit.extend(verdict.recommended_actions.iter().map(|a| format!("- {a}")));
        let stages = bundle.execution_log.stages_executed();
        audit.push(format!(
            "Stages: {}",
            stages.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));

        let existing = case.case_details.trim();
        let case_details = if existing.is_empty() {
            audit.join("\n")
        } else {
            format!("{existing}\n\n{}", audit.join("\n"))
        };

        TicketUpdate {
            fraud_status:   Some(ticket_status(verdict.status).to_string()),
            case_outcome:   verdict.outcome_tier.label().to_string(),
            allegation:     verdict.allegation.map(|a| a.label().to_string()),
            reason:         verdict.reason.clone(),
            sub_reason:     verdict.sub_reason.clone(),
            account_number: bundle.account_profile.account_number.clone(),
            suspect_type:   verdict.suspect.category,
            suspect_name:   verdict.suspect.name.clone(),
            suspect_phone:  verdict.suspect.phone.clone(),
            case_details,
            public_comment: verdict.public_note.clone(),
        }
    }
}

fn ticket_status(status: VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::FraudLikely => "Likely fraud",
        VerdictStatus::NotFraud    => "Not fraud",
    }
}

fn suggested_tier(raw: &str) -> Option<OutcomeTier> {
    let t = raw.to_ascii_lowercase();
    if t.contains("field") {
        Some(OutcomeTier::FieldInvestigation)
    } else if t.contains("re-invest") || t.contains("reinvest") {
        Some(OutcomeTier::ReInvestigate)
    } else if t.contains("no action") {
        Some(OutcomeTier::NoAction)
    } else {
        None
    }
}

fn default_action(tier: OutcomeTier) -> &'static str {
    match tier {
        OutcomeTier::FieldInvestigation => "Assign to a field investigator",
        OutcomeTier::ReInvestigate      => "Gather more evidence and re-investigate",
        OutcomeTier::NoAction           => "Close the case with no further action",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RiskFactorClaims;

    fn response(status: VerdictStatus, confidence: f64, allegation: Option<&str>) -> VerdictResponse {
        VerdictResponse {
            fraud_status: status,
            confidence,
            primary_allegation: allegation.map(String::from),
            suspect_type: None,
            suspect_name: None,
            suspect_number: None,
            case_outcome: None,
            investigation_summary: None,
            public_note: Some("Thank you for reporting. The case is under review.".into()),
            key_evidence: vec![],
            risk_factors: RiskFactorClaims::default(),
            recommended_next_steps: vec![],
        }
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(TriageConfig::default()))
    }

    #[test]
    fn fraud_likely_without_allegation_is_a_violation() {
        let err = engine()
            .apply("C", response(VerdictStatus::FraudLikely, 0.8, None), &EvidenceBundle::default())
            .unwrap_err();
        assert_eq!(err.kind(), "validation_violation");
    }

    #[test]
    fn unknown_allegation_is_a_violation() {
        let err = engine()
            .apply(
                "C",
                response(VerdictStatus::FraudLikely, 0.8, Some("Confirmed fraud")),
                &EvidenceBundle::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "validation_violation");
    }

    #[test]
    fn not_fraud_drops_allegation() {
        let v = engine()
            .apply(
                "C",
                response(VerdictStatus::NotFraud, 0.9, Some("Resale")),
                &EvidenceBundle::default(),
            )
            .unwrap();
        assert_eq!(v.allegation, None);
        assert!(v.overrides.iter().any(|o| o.contains("dropped")));
    }

    #[test]
    fn outcome_tier_ignores_suggestion() {
        let mut r = response(VerdictStatus::FraudLikely, 0.60, Some("Hacking & Tampering"));
        r.case_outcome = Some("Awaiting field Investigation".into());
        let v = engine().apply("C", r, &EvidenceBundle::default()).unwrap();
        assert_eq!(v.outcome_tier, OutcomeTier::ReInvestigate);
        assert_eq!(v.sub_reason, "Hacking and tampering");
    }

    #[test]
    fn screen_catches_identifying_data() {
        let names = vec!["John Kamau".to_string()];
        assert_eq!(screen_public_note("Account 12345678 was flagged", &[]), Some("identifier"));
        assert_eq!(screen_public_note("Call 0712 345 678", &[]), Some("phone number"));
        assert_eq!(screen_public_note("Risk at 85%", &[]), Some("score"));
        assert_eq!(screen_public_note("Score of 0.91", &[]), Some("score"));
        assert_eq!(screen_public_note("We spoke to john kamau", &names), Some("named value"));
        assert_eq!(screen_public_note("Thank you, the case is under review.", &names), None);
    }

    #[test]
    fn evidence_forces_takeover_flag() {
        let mut bundle = EvidenceBundle::default();
        bundle.behavioral.reset_pin_from_new_device = Some(true);
        let v = engine()
            .apply("C", response(VerdictStatus::FraudLikely, 0.9, Some("identity_theft")), &bundle)
            .unwrap();
        assert!(v.risk_flags.account_takeover);
        assert!(v.evidence.iter().any(|e| e.contains("PIN reset")));
    }
}
