//! The investigation cache over a real SQLite file.

mod common;

use common::Harness;
use triage_core::{
    cache::InvestigationCache,
    outcome::{InvestigationOutcome, TerminalState},
    testkit::verdict_reply,
    verdict::VerdictStatus,
    InvestigateOptions,
};

fn investigate(status: &str, confidence: f64, allegation: Option<&str>) -> InvestigationOutcome {
    let h = Harness::new();
    h.classifier.set_verdict(verdict_reply(status, confidence, allegation));
    let outcome = h.engine.investigate("C-1001", InvestigateOptions::default());
    assert_eq!(outcome.state, TerminalState::Success);
    outcome
}

fn file_cache(dir: &tempfile::TempDir) -> InvestigationCache {
    let path = dir.path().join("triage.db");
    InvestigationCache::open(path.to_str().unwrap()).unwrap()
}

#[test]
fn entries_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = investigate("fraud_likely", 0.8, Some("resale"));
    {
        let cache = file_cache(&dir);
        assert!(cache.upsert("C-1001", &outcome).unwrap());
    }

    let cache = file_cache(&dir);
    let stored = cache.get_full("C-1001").unwrap().unwrap();
    assert_eq!(stored.attempt_id, outcome.attempt_id);
    assert_eq!(stored.state, TerminalState::Success);
    assert_eq!(stored.plan.map(|p| p.route), outcome.plan.map(|p| p.route));
    assert_eq!(stored.ticket_update, outcome.ticket_update);
}

#[test]
fn last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let cache = file_cache(&dir);
    let a = investigate("fraud_likely", 0.8, Some("resale"));
    let b = investigate("not_fraud", 0.25, None);

    cache.upsert("C-1001", &a).unwrap();
    cache.upsert("C-1001", &b).unwrap();

    assert_eq!(cache.count().unwrap(), 1);
    let summary = cache.get_summary("C-1001").unwrap().unwrap();
    assert_eq!(summary, b.summary());
    assert_eq!(summary.status, Some(VerdictStatus::NotFraud));
}

#[test]
fn stats_split_by_status() {
    let cache = InvestigationCache::in_memory().unwrap();
    cache.upsert("C-1", &investigate("fraud_likely", 0.9, Some("resale"))).unwrap();
    cache.upsert("C-2", &investigate("not_fraud", 0.3, None)).unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.fraud_likely, 1);
    assert_eq!(stats.not_fraud, 1);
    let avg = stats.avg_confidence.unwrap();
    assert!((avg - 0.6).abs() < 1e-9, "avg {avg}");
}

#[test]
fn stored_under_the_given_case_id() {
    let cache = InvestigationCache::in_memory().unwrap();
    let outcome = investigate("not_fraud", 0.1, None);
    cache.upsert("C-7", &outcome).unwrap();

    assert!(cache.get_summary("C-1001").unwrap().is_none());
    assert_eq!(cache.get_summary("C-7").unwrap().unwrap().case_id, "C-7");
}

#[test]
fn delete_clear_and_recent() {
    let cache = InvestigationCache::in_memory().unwrap();
    for id in ["C-1", "C-2", "C-3"] {
        cache.upsert(id, &investigate("not_fraud", 0.2, None)).unwrap();
    }

    assert_eq!(cache.list_recent(2).unwrap().len(), 2);
    assert!(cache.delete("C-2").unwrap());
    assert!(!cache.delete("C-2").unwrap());
    assert_eq!(cache.count().unwrap(), 2);
    assert_eq!(cache.clear().unwrap(), 2);
    assert_eq!(cache.count().unwrap(), 0);
    assert!(cache.list_recent(10).unwrap().is_empty());
}

#[test]
fn audit_events_accumulate_across_attempts() {
    let h = Harness::new();
    h.engine.investigate("C-1001", InvestigateOptions::default());
    h.engine.investigate("C-1001", InvestigateOptions { force: true });

    let events = h.cache.events_for_case("C-1001").unwrap();
    let attempts: std::collections::BTreeSet<&str> =
        events.iter().map(|e| e.attempt_id.as_str()).collect();
    assert_eq!(attempts.len(), 2);
    let finished = events.iter().filter(|e| e.event_type == "investigation_finished").count();
    assert_eq!(finished, 2);
    assert!(events.iter().all(|e| e.event().is_ok()));
    assert_eq!(h.cache.cost_avoided_total_ms().unwrap(), 7000);
}
