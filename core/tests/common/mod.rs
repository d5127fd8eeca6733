//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use triage_core::{
    cache::InvestigationCache,
    case::Case,
    config::TriageConfig,
    executor::StageName,
    testkit::{account_row, plan_reply, verdict_reply, MemoryEvidenceStore, ScriptedClassifier, StaticCaseSource},
    InvestigationEngine,
};

pub const IMEI: &str = "356938035643809";
pub const ACCOUNT: &str = "ACC1001";

/// A tampering report with a known device.
pub fn tampering_case(case_id: &str) -> Case {
    let mut case = Case::new(case_id);
    case.subject = "Device tampering reported".into();
    case.description = "Agent found the phone flashed and the lock bypassed at the shop.".into();
    case.structured.imei = Some(IMEI.into());
    case
}

/// Engine wired to in-memory collaborators, with the tampering case and a
/// matching account already loaded.
pub struct Harness {
    pub cases:      Arc<StaticCaseSource>,
    pub evidence:   MemoryEvidenceStore,
    pub classifier: Arc<ScriptedClassifier>,
    pub cache:      Arc<InvestigationCache>,
    pub engine:     InvestigationEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(TriageConfig::default())
    }

    pub fn with_config(config: TriageConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let cases = Arc::new(StaticCaseSource::new().with_case(tampering_case("C-1001")));
        let evidence = MemoryEvidenceStore::new();
        evidence.add_row(StageName::BasicLookup, account_row(ACCOUNT, IMEI));
        let classifier = Arc::new(ScriptedClassifier::new(
            plan_reply("device_tampering", "device_tampering_standard", true, true, false),
            verdict_reply("fraud_likely", 0.82, Some("hacking_and_tampering")),
        ));
        let cache = Arc::new(InvestigationCache::in_memory().unwrap());
        let engine = InvestigationEngine::new(
            Arc::new(config),
            cases.clone(),
            Arc::new(evidence.clone()),
            classifier.clone(),
            cache.clone(),
        );
        Self { cases, evidence, classifier, cache, engine }
    }
}
