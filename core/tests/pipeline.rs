//! End-to-end investigations against in-memory collaborators.

mod common;

use common::{tampering_case, Harness};
use std::time::Duration;
use triage_core::{
    case::Case,
    config::TriageConfig,
    executor::{StageName, StageStatus, REASON_NOT_PLANNED, REASON_NO_ACCOUNT},
    outcome::{Phase, TerminalState},
    testkit::{plan_reply, verdict_reply, Fault},
    verdict::{Allegation, OutcomeTier, VerdictStatus},
    InvestigateOptions,
};

fn run(h: &Harness, case_id: &str) -> triage_core::outcome::InvestigationOutcome {
    h.engine.investigate(case_id, InvestigateOptions::default())
}

#[test]
fn tampering_case_reaches_a_verdict() {
    let h = Harness::new();
    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::Success);
    let verdict = outcome.verdict.as_ref().unwrap();
    assert_eq!(verdict.status, VerdictStatus::FraudLikely);
    assert_eq!(verdict.allegation, Some(Allegation::HackingAndTampering));
    assert_eq!(verdict.outcome_tier, OutcomeTier::FieldInvestigation);
    assert!(outcome.ticket_update.is_some());
    assert!(outcome.error.is_none());
    assert_eq!(h.classifier.plan_calls(), 1);
    assert_eq!(h.classifier.classify_calls(), 1);
    assert_eq!(h.cache.count().unwrap(), 1);
}

#[test]
fn skipped_expensive_stage_is_counted_as_cost_avoided() {
    let h = Harness::new();
    let outcome = run(&h, "C-1001");

    let log = &outcome.evidence.as_ref().unwrap().execution_log;
    assert_eq!(log.status_of(StageName::Behavioral), Some(StageStatus::Skipped));
    assert_eq!(log.cost_avoided_ms, 3500);
    assert_eq!(h.evidence.query_count(StageName::Behavioral), 0);
    assert_eq!(h.cache.cost_avoided_total_ms().unwrap(), 3500);
}

#[test]
fn sessions_are_released_after_the_run() {
    let h = Harness::new();
    run(&h, "C-1001");
    assert!(h.evidence.sessions_opened() >= 1);
    assert_eq!(h.evidence.open_sessions(), 0);
}

#[test]
fn classification_sees_the_resolved_account() {
    let h = Harness::new();
    run(&h, "C-1001");
    let request = h.classifier.last_request().unwrap();
    let account = request.account_profile.unwrap();
    assert_eq!(account.account_number.as_deref(), Some(common::ACCOUNT));
    assert!(request.stages_executed.contains(&StageName::BasicLookup));
}

#[test]
fn pin_reset_from_a_new_device_flags_account_takeover() {
    let h = Harness::new();
    let mut case = tampering_case("C-4004");
    case.subject = "PIN reset not requested".into();
    case.description =
        "Customer got a new phone last week and then saw a PIN reset they never asked for.".into();
    h.cases.insert(case);
    h.evidence.add_row(
        StageName::Behavioral,
        serde_json::json!({
            "account_number": common::ACCOUNT,
            "reset_pin_from_new_device": 1,
            "days_since_pin_reset": 2,
        }),
    );
    h.classifier.set_plan(plan_reply("account_takeover", "account_takeover_full", true, true, false));
    let mut verdict = verdict_reply("fraud_likely", 0.78, Some("identity_theft"));
    verdict["risk_factors"] = serde_json::json!({ "behavioral_account_takeover": false });
    h.classifier.set_verdict(verdict);

    let outcome = run(&h, "C-4004");

    assert_eq!(outcome.state, TerminalState::Success);
    assert!(outcome.plan.as_ref().unwrap().behavioral);
    let log = &outcome.evidence.as_ref().unwrap().execution_log;
    assert_eq!(log.status_of(StageName::Behavioral), Some(StageStatus::Success));
    assert_eq!(log.cost_avoided_ms, 0);
    assert_eq!(h.evidence.query_count(StageName::Behavioral), 1);

    let verdict = outcome.verdict.as_ref().unwrap();
    assert!(verdict.risk_flags.account_takeover, "evidence wins over the classifier");
    assert!(verdict.overrides.iter().any(|o| o == "account_takeover set from evidence"));
    assert!(h.classifier.last_request().unwrap().behavioral.is_some());
    assert_eq!(h.cache.cost_avoided_total_ms().unwrap(), 0);
}

#[test]
fn social_media_scam_without_a_device_skips_device_stages() {
    let h = Harness::new();
    let mut case = Case::new("C-5005");
    case.subject = "Scammed on Facebook".into();
    case.description =
        "Customer paid a seller on Facebook for a phone that never arrived.".into();
    case.structured.account_number = Some(common::ACCOUNT.into());
    h.cases.insert(case);
    h.classifier.set_plan(plan_reply("external_scam", "external_scam_quick", true, true, true));
    h.classifier.set_verdict(verdict_reply("not_fraud", 0.2, None));

    let outcome = run(&h, "C-5005");

    assert_eq!(outcome.state, TerminalState::Success);
    let log = &outcome.evidence.as_ref().unwrap().execution_log;
    for stage in [StageName::RiskSignal, StageName::Behavioral] {
        let entry = log.entries.iter().find(|e| e.stage == stage).unwrap();
        assert_eq!(entry.status, StageStatus::Skipped);
        assert_eq!(entry.reason.as_deref(), Some(REASON_NOT_PLANNED));
        assert_eq!(h.evidence.query_count(stage), 0);
    }
    assert_eq!(h.evidence.query_count(StageName::Historical), 1);
    assert_eq!(log.cost_avoided_ms, 3500);
}

#[test]
fn unknown_device_ends_without_classification() {
    let h = Harness::new();
    let mut case = tampering_case("C-2002");
    case.structured.imei = Some("490154203237518".into());
    h.cases.insert(case);

    let outcome = run(&h, "C-2002");

    assert_eq!(outcome.state, TerminalState::NoAccount);
    assert!(outcome.verdict.is_none());
    assert_eq!(h.classifier.classify_calls(), 0);
    let log = &outcome.evidence.as_ref().unwrap().execution_log;
    for stage in StageName::OPTIONAL {
        let entry = log.entries.iter().find(|e| e.stage == stage).unwrap();
        assert_eq!(entry.status, StageStatus::Skipped);
        assert_eq!(entry.reason.as_deref(), Some(REASON_NO_ACCOUNT));
    }
    // no_account is a terminal answer and is cached
    assert_eq!(h.cache.count().unwrap(), 1);
}

#[test]
fn unparsable_verdict_is_a_classifier_error() {
    let h = Harness::new();
    h.classifier.set_verdict_text("I am fairly sure this is fraud.");

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::ClassifierError);
    let error = outcome.error.as_ref().unwrap();
    assert_eq!(error.phase, Phase::Classify);
    assert_eq!(error.kind, "malformed_response");
    assert!(outcome.evidence.is_some(), "evidence gathered so far is kept");
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[test]
fn fenced_verdict_is_accepted() {
    let h = Harness::new();
    let body = verdict_reply("not_fraud", 0.2, None).to_string();
    h.classifier.set_verdict_text(format!("```json\n{body}\n```"));

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::Success);
    let verdict = outcome.verdict.unwrap();
    assert_eq!(verdict.status, VerdictStatus::NotFraud);
    assert_eq!(verdict.allegation, None);
    assert_eq!(verdict.outcome_tier, OutcomeTier::NoAction);
}

#[test]
fn unparsable_plan_stops_before_the_evidence_store() {
    let h = Harness::new();
    h.classifier.set_plan_text("route: quick");

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::ClassifierError);
    assert!(outcome.plan.is_none());
    assert_eq!(h.evidence.sessions_opened(), 0);
    assert_eq!(h.classifier.classify_calls(), 0);
}

#[test]
fn basic_lookup_failure_aborts_the_case() {
    let h = Harness::new();
    h.evidence.fail(StageName::BasicLookup, Fault::Unavailable);

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::EvidenceStoreError);
    assert!(outcome.error.as_ref().unwrap().retryable);
    assert_eq!(h.classifier.classify_calls(), 0);
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[test]
fn optional_stage_failure_is_isolated() {
    let h = Harness::new();
    h.evidence.fail(StageName::Historical, Fault::Unavailable);

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::Success);
    let log = &outcome.evidence.as_ref().unwrap().execution_log;
    assert_eq!(log.status_of(StageName::Historical), Some(StageStatus::Failed));
    assert_eq!(log.status_of(StageName::RiskSignal), Some(StageStatus::NoData));
}

#[test]
fn missing_allegation_goes_to_manual_review() {
    let h = Harness::new();
    h.classifier.set_verdict(verdict_reply("fraud_likely", 0.9, None));

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::ManualReview);
    assert_eq!(outcome.error.as_ref().unwrap().kind, "validation_violation");
    assert!(outcome.verdict.is_none());
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[test]
fn slow_classifier_times_out() {
    let mut config = TriageConfig::default();
    config.timeouts.classification_ms = 50;
    let h = Harness::with_config(config);
    h.classifier.stall(Duration::from_millis(300));

    let outcome = run(&h, "C-1001");

    assert_eq!(outcome.state, TerminalState::Timeout);
    assert_eq!(outcome.error.as_ref().unwrap().kind, "timeout");
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[test]
fn missing_case_is_fatal() {
    let h = Harness::new();
    let outcome = run(&h, "C-404");
    assert_eq!(outcome.state, TerminalState::FatalError);
    assert_eq!(outcome.error.as_ref().unwrap().kind, "data_not_found");
    assert!(outcome.plan.is_none());
}

#[test]
fn refused_case_fetch_is_fatal() {
    let h = Harness::new();
    h.cases.fail("C-1001", Fault::Auth);
    let outcome = run(&h, "C-1001");
    assert_eq!(outcome.state, TerminalState::FatalError);
    assert_eq!(outcome.error.as_ref().unwrap().kind, "auth_error");
}

#[test]
fn second_run_is_served_from_cache() {
    let h = Harness::new();
    let first = run(&h, "C-1001");
    let second = run(&h, "C-1001");

    assert_eq!(second.state, TerminalState::Cached);
    let (a, b) = (first.verdict.unwrap(), second.verdict.unwrap());
    assert_eq!(a.status, b.status);
    assert_eq!(a.allegation, b.allegation);
    assert_eq!(a.public_note, b.public_note);
    assert_eq!(second.attempt_id, first.attempt_id);
    assert_eq!(h.cases.fetch_count(), 1);
    assert_eq!(h.classifier.classify_calls(), 1);

    let events = h.cache.events_for_case("C-1001").unwrap();
    assert!(events.iter().any(|e| e.event_type == "cache_hit"));
}

#[test]
fn forced_run_reinvestigates_and_replaces_the_cache_entry() {
    let h = Harness::new();
    let first = run(&h, "C-1001");
    h.classifier.set_verdict(verdict_reply("not_fraud", 0.3, None));

    let second = h.engine.investigate("C-1001", InvestigateOptions { force: true });

    assert_eq!(second.state, TerminalState::Success);
    assert_ne!(second.attempt_id, first.attempt_id);
    assert_eq!(h.classifier.classify_calls(), 2);
    assert_eq!(h.cache.count().unwrap(), 1);
    let cached = h.cache.get_summary("C-1001").unwrap().unwrap();
    assert_eq!(cached.status, Some(VerdictStatus::NotFraud));
}

#[test]
fn every_attempt_leaves_an_audit_trail() {
    let h = Harness::new();
    h.evidence.fail(StageName::BasicLookup, Fault::Unavailable);
    run(&h, "C-1001");

    let events = h.cache.events_for_case("C-1001").unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"case_fetched"));
    assert!(types.contains(&"phase_failed"));
    assert_eq!(types.last(), Some(&"investigation_finished"));
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}
