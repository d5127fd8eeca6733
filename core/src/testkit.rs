//! Deterministic in-memory collaborators.
//!
//! Used by the test suites and by the runner for fixture-driven runs.
//! Every collaborator can be told to fail or to stall, and counts the
//! calls it receives.

use crate::{
    case::Case,
    classifier::{ClassificationRequest, PlanningRequest},
    collaborator::{CaseSource, ClassificationService, EvidenceSession, EvidenceStore, TicketUpdater},
    error::{TriageError, TriageResult},
    executor::{QueryParams, StageName},
    types::{CaseId, Row},
    verdict::TicketUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A failure a collaborator can be scripted to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    NotFound,
    Auth,
    Unavailable,
}

impl Fault {
    fn error(self, service: &str, subject: &str) -> TriageError {
        match self {
            Self::NotFound    => TriageError::DataNotFound(format!("{service}: {subject}")),
            Self::Auth        => TriageError::AuthError(format!("{service} refused {subject}")),
            Self::Unavailable => TriageError::upstream(service, format!("connection refused ({subject})")),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Case source ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StaticCaseSource {
    cases:   Mutex<BTreeMap<CaseId, Case>>,
    faults:  Mutex<HashMap<CaseId, Fault>>,
    delay:   Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl StaticCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_case(self, case: Case) -> Self {
        self.insert(case);
        self
    }

    pub fn insert(&self, case: Case) {
        lock(&self.cases).insert(case.case_id.clone(), case);
    }

    pub fn fail(&self, case_id: &str, fault: Fault) {
        lock(&self.faults).insert(case_id.to_string(), fault);
    }

    pub fn stall(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CaseSource for StaticCaseSource {
    fn fetch_case(&self, case_id: &str) -> TriageResult<Case> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = *lock(&self.delay) {
            std::thread::sleep(d);
        }
        if let Some(fault) = lock(&self.faults).get(case_id) {
            return Err(fault.error("case_source", case_id));
        }
        lock(&self.cases)
            .get(case_id)
            .cloned()
            .ok_or_else(|| TriageError::DataNotFound(format!("case {case_id}")))
    }

    fn open_case_ids(&self) -> TriageResult<Vec<CaseId>> {
        Ok(lock(&self.cases).keys().cloned().collect())
    }
}

// ── Evidence store ────────────────────────────────────────────────────────

/// Rows per stage, as stored in a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceFixtures {
    #[serde(default)]
    pub basic_lookup: Vec<Row>,
    #[serde(default)]
    pub risk_signal:  Vec<Row>,
    #[serde(default)]
    pub historical:   Vec<Row>,
    #[serde(default)]
    pub behavioral:   Vec<Row>,
}

#[derive(Default)]
struct StoreState {
    rows:            Mutex<HashMap<StageName, Vec<Row>>>,
    faults:          Mutex<HashMap<StageName, Fault>>,
    delays:          Mutex<HashMap<StageName, Duration>>,
    queries:         Mutex<Vec<(StageName, QueryParams)>>,
    open_sessions:   AtomicUsize,
    sessions_opened: AtomicUsize,
}

/// A row matches a query if any parameter equals the same-named column,
/// the way the warehouse queries OR their lookup keys together.
#[derive(Clone, Default)]
pub struct MemoryEvidenceStore {
    state: Arc<StoreState>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures(fixtures: EvidenceFixtures) -> Self {
        let store = Self::new();
        for (stage, rows) in [
            (StageName::BasicLookup, fixtures.basic_lookup),
            (StageName::RiskSignal, fixtures.risk_signal),
            (StageName::Historical, fixtures.historical),
            (StageName::Behavioral, fixtures.behavioral),
        ] {
            lock(&store.state.rows).insert(stage, rows);
        }
        store
    }

    /// Load fixtures from a JSON file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let fixtures: EvidenceFixtures = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        Ok(Self::from_fixtures(fixtures))
    }

    pub fn add_row(&self, stage: StageName, row: Value) {
        if let Value::Object(row) = row {
            lock(&self.state.rows).entry(stage).or_default().push(row);
        }
    }

    pub fn fail(&self, stage: StageName, fault: Fault) {
        lock(&self.state.faults).insert(stage, fault);
    }

    pub fn stall(&self, stage: StageName, delay: Duration) {
        lock(&self.state.delays).insert(stage, delay);
    }

    pub fn queries(&self) -> Vec<(StageName, QueryParams)> {
        lock(&self.state.queries).clone()
    }

    pub fn query_count(&self, stage: StageName) -> usize {
        lock(&self.state.queries).iter().filter(|(s, _)| *s == stage).count()
    }

    /// Sessions opened and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }
}

impl EvidenceStore for MemoryEvidenceStore {
    fn open_session(&self) -> TriageResult<Box<dyn EvidenceSession>> {
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession { state: Arc::clone(&self.state) }))
    }
}

struct MemorySession {
    state: Arc<StoreState>,
}

impl EvidenceSession for MemorySession {
    fn run_query(&mut self, stage: StageName, params: &QueryParams) -> TriageResult<Vec<Row>> {
        lock(&self.state.queries).push((stage, params.clone()));
        let delay = lock(&self.state.delays).get(&stage).copied();
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        if let Some(fault) = lock(&self.state.faults).get(&stage) {
            return Err(fault.error("evidence_store", stage.as_str()));
        }
        let rows = lock(&self.state.rows);
        Ok(rows
            .get(&stage)
            .map(|rows| rows.iter().filter(|r| row_matches(r, params)).cloned().collect())
            .unwrap_or_default())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

fn row_matches(row: &Row, params: &QueryParams) -> bool {
    params.iter().any(|(key, value)| match row.get(key) {
        Some(Value::String(s)) => s.trim() == value,
        Some(Value::Number(n)) => n.to_string() == value,
        _ => false,
    })
}

// ── Classification service ────────────────────────────────────────────────

/// Replies with canned text and counts calls.
pub struct ScriptedClassifier {
    plan_reply:     Mutex<Result<String, Fault>>,
    verdict_reply:  Mutex<Result<String, Fault>>,
    delay:          Mutex<Option<Duration>>,
    plan_calls:     AtomicUsize,
    classify_calls: AtomicUsize,
    last_request:   Mutex<Option<ClassificationRequest>>,
}

impl ScriptedClassifier {
    pub fn new(plan: Value, verdict: Value) -> Self {
        Self {
            plan_reply:     Mutex::new(Ok(plan.to_string())),
            verdict_reply:  Mutex::new(Ok(verdict.to_string())),
            delay:          Mutex::new(None),
            plan_calls:     AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
            last_request:   Mutex::new(None),
        }
    }

    pub fn set_plan(&self, plan: Value) {
        self.set_plan_text(plan.to_string());
    }

    pub fn set_plan_text(&self, text: impl Into<String>) {
        *lock(&self.plan_reply) = Ok(text.into());
    }

    pub fn set_verdict_text(&self, text: impl Into<String>) {
        *lock(&self.verdict_reply) = Ok(text.into());
    }

    pub fn set_verdict(&self, verdict: Value) {
        self.set_verdict_text(verdict.to_string());
    }

    pub fn fail_plan(&self, fault: Fault) {
        *lock(&self.plan_reply) = Err(fault);
    }

    pub fn fail_classify(&self, fault: Fault) {
        *lock(&self.verdict_reply) = Err(fault);
    }

    pub fn stall(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ClassificationRequest> {
        lock(&self.last_request).clone()
    }

    fn pause(&self) {
        let delay = *lock(&self.delay);
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
    }
}

impl ClassificationService for ScriptedClassifier {
    fn plan(&self, request: &PlanningRequest) -> TriageResult<String> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        lock(&self.plan_reply)
            .clone()
            .map_err(|f| f.error("planning", &request.case_id))
    }

    fn classify(&self, request: &ClassificationRequest) -> TriageResult<String> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_request) = Some(request.clone());
        self.pause();
        lock(&self.verdict_reply)
            .clone()
            .map_err(|f| f.error("classification", &request.case_id))
    }
}

/// A planning reply in the service's schema.
pub fn plan_reply(fraud_type: &str, route: &str, risk_signal: bool, historical: bool, behavioral: bool) -> Value {
    json!({
        "identifiers_extracted": {},
        "fraud_type": fraud_type,
        "risk_level": "medium",
        "investigation_route": route,
        "execute_stage_3_dfrs": risk_signal,
        "execute_stage_4_history": historical,
        "execute_stage_5_behavioral": behavioral,
        "confidence": 0.8,
        "reasoning": "scripted",
        "key_concerns": []
    })
}

/// A classification reply in the service's schema.
pub fn verdict_reply(status: &str, confidence: f64, allegation: Option<&str>) -> Value {
    json!({
        "fraud_status": status,
        "confidence": confidence,
        "primary_allegation": allegation,
        "suspect_type": "Customer",
        "suspect_name": null,
        "suspect_number": null,
        "case_outcome": null,
        "investigation_summary": "Scripted summary.",
        "public_note": "Thank you for reporting this. The case has been reviewed.",
        "key_evidence": ["scripted evidence"],
        "risk_factors": {},
        "recommended_next_steps": []
    })
}

/// A basic-lookup row for a supported device.
pub fn account_row(account_number: &str, imei: &str) -> Value {
    json!({
        "loan_id": format!("LN-{account_number}"),
        "account_id": format!("AID-{account_number}"),
        "account_number": account_number,
        "customer_id": format!("CU-{account_number}"),
        "device_id": format!("DV-{account_number}"),
        "imei": imei,
        "device_model": "M-KOPA X2",
        "loan_status": "Active",
        "product": "Smartphone",
        "principal_amount": 18000
    })
}

// ── Ticket updater ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTicketUpdater {
    applied: Mutex<Vec<(CaseId, TicketUpdate)>>,
    failing: AtomicBool,
}

impl RecordingTicketUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<(CaseId, TicketUpdate)> {
        lock(&self.applied).clone()
    }
}

impl TicketUpdater for RecordingTicketUpdater {
    fn apply(&self, case_id: &str, update: &TicketUpdate) -> TriageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TriageError::upstream("ticket_system", format!("update of {case_id} rejected")));
        }
        lock(&self.applied).push((case_id.to_string(), update.clone()));
        Ok(())
    }
}
