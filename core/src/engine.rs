//! The investigation engine: sequences one case through the pipeline.
//!
//! EXECUTION ORDER (fixed):
//!   1. Fetch case          (case source)
//!   2. Extract identifiers (never fails)
//!   3. Plan stages         (classification service + hard rules)
//!   4. Execute stages      (evidence store)
//!   5. Aggregate evidence  (never fails)
//!   6. Classify            (classification service)
//!   7. Post-process        (rule engine)
//!   8. Cache write
//!
//! RULES:
//!   - investigate() never returns an error. Every failure becomes a
//!     terminal state on a structured, partially filled outcome.
//!   - A timeout on any external call aborts the rest of the pipeline.
//!   - Only one investigation per case id runs at a time; a cached
//!     result is served unless the caller forces a rerun.
//!   - Every attempt, including failed ones, is written to the audit log.

use crate::{
    aggregator::aggregate,
    cache::InvestigationCache,
    classifier::{ClassifierAdapter, CLASSIFICATION_SERVICE},
    collaborator::{CaseSource, ClassificationService, EvidenceStore},
    config::TriageConfig,
    error::{TriageError, TriageResult},
    event::{EventLogEntry, TriageEvent},
    executor::{StageExecutor, StageFailure, StageStatus},
    extractor::extract,
    outcome::{InvestigationOutcome, OutcomeError, Phase, PhaseTiming, TerminalState},
    planner::StagePlanner,
    rules::RuleEngine,
    timeout::call_with_timeout,
    types::{elapsed_ms, CaseId},
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct InvestigateOptions {
    /// Ignore any cached result and run the pipeline again.
    pub force: bool,
}

pub struct InvestigationEngine {
    config:     Arc<TriageConfig>,
    cases:      Arc<dyn CaseSource>,
    classifier: Arc<dyn ClassificationService>,
    adapter:    Arc<ClassifierAdapter>,
    planner:    StagePlanner,
    executor:   StageExecutor,
    rules:      RuleEngine,
    cache:      Arc<InvestigationCache>,
}

impl InvestigationEngine {
    pub fn new(
        config: Arc<TriageConfig>,
        cases: Arc<dyn CaseSource>,
        evidence: Arc<dyn EvidenceStore>,
        classifier: Arc<dyn ClassificationService>,
        cache: Arc<InvestigationCache>,
    ) -> Self {
        let adapter = Arc::new(ClassifierAdapter::new(Arc::clone(&config)));
        Self {
            planner: StagePlanner::new(Arc::clone(&config), Arc::clone(&adapter), Arc::clone(&classifier)),
            executor: StageExecutor::new(Arc::clone(&config), evidence),
            rules: RuleEngine::new(Arc::clone(&config)),
            config,
            cases,
            classifier,
            adapter,
            cache,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn cache(&self) -> &InvestigationCache {
        &self.cache
    }

    /// Ids of the cases the source currently holds open.
    pub fn open_case_ids(&self) -> TriageResult<Vec<CaseId>> {
        let cases = Arc::clone(&self.cases);
        let ids = call_with_timeout("open_cases", self.config.timeouts.case_fetch(), move || {
            cases.open_case_ids()
        })?;
        log::info!("Case source reports {} open cases", ids.len());
        Ok(ids)
    }

    /// Investigate one case end to end.
    pub fn investigate(&self, case_id: &str, options: InvestigateOptions) -> InvestigationOutcome {
        let claim = self.cache.claim(case_id);

        if !options.force {
            match self.cache.get_full(case_id) {
                Ok(Some(previous)) => return self.serve_cached(previous, claim.waited()),
                Ok(None) => {}
                Err(e) => log::warn!("case {case_id}: cache read failed, investigating anyway: {e}"),
            }
        }

        let mut attempt = Attempt::new(case_id);
        log::info!("case {case_id}: investigation {} started", attempt.outcome.attempt_id);
        self.run_pipeline(&mut attempt);
        self.finish(attempt)
    }

    fn serve_cached(&self, mut previous: InvestigationOutcome, waited: bool) -> InvestigationOutcome {
        let case_id = previous.case_id.clone();
        log::info!(
            "case {case_id}: cache hit ({} at {}){}",
            previous.state.as_str(),
            previous.investigated_at,
            if waited { " after waiting on a concurrent run" } else { "" },
        );
        let mut attempt = Attempt::new(&case_id);
        attempt.event(TriageEvent::CacheHit { investigated_at: previous.investigated_at.clone() });
        self.persist_events(&attempt);
        previous.state = TerminalState::Cached;
        previous
    }

    fn run_pipeline(&self, run: &mut Attempt) {
        let case_id = run.outcome.case_id.clone();

        // 1. Fetch
        let cases = Arc::clone(&self.cases);
        let id = case_id.clone();
        let timeout = self.config.timeouts.case_fetch();
        let case = match run.timed(Phase::Fetch, || {
            call_with_timeout("case_fetch", timeout, move || cases.fetch_case(&id))
        }) {
            Ok(case) => case,
            Err(e) => return run.fail(Phase::Fetch, TerminalState::FatalError, e),
        };
        run.event(TriageEvent::CaseFetched { elapsed_ms: run.last_elapsed() });

        // 2. Extract
        let extraction = run.measure(Phase::Extract, || extract(&case));
        let mut ids = extraction.identifiers.clone();
        run.event(TriageEvent::IdentifiersExtracted {
            identifiers: ids.count(),
            phones:      extraction.phones.len(),
        });

        // 3. Plan
        let plan = match run.timed(Phase::Plan, || self.planner.plan(&case, &ids)) {
            Ok(plan) => plan,
            Err(e) => return run.fail(Phase::Plan, TerminalState::ClassifierError, e),
        };
        ids.fill_missing(&plan.suggested_identifiers);
        run.event(TriageEvent::PlanProduced {
            route:      plan.route,
            fraud_type: plan.fraud_type,
            risk_tier:  plan.risk_tier,
            stages:     plan.enabled_stages(),
            overrides:  plan.overrides.len(),
        });
        run.outcome.identifiers = Some(ids.clone());
        run.outcome.plan = Some(plan.clone());

        // 4. Execute
        let stage_run = match run.timed(Phase::Execute, || self.executor.execute(&case_id, &plan, &ids)) {
            Ok(stage_run) => stage_run,
            Err(StageFailure { error, completed }) => {
                run.outcome.evidence = Some(aggregate(&completed, 0));
                return run.fail(Phase::Execute, TerminalState::EvidenceStoreError, error);
            }
        };
        for result in &stage_run.results {
            if result.status() != StageStatus::Skipped {
                run.event(TriageEvent::StageCompleted {
                    stage:      result.stage(),
                    status:     result.status(),
                    elapsed_ms: result.elapsed_ms(),
                });
            }
        }
        if stage_run.cost_avoided_ms > 0 {
            run.event(TriageEvent::CostAvoided {
                stage:        self.config.expensive_stage(),
                estimated_ms: stage_run.cost_avoided_ms,
            });
        }

        // 5. Aggregate
        let bundle = run.measure(Phase::Aggregate, || {
            aggregate(&stage_run.results, stage_run.cost_avoided_ms)
        });
        if !stage_run.account_found() {
            log::info!("case {case_id}: no account, returning without classification");
            run.outcome.evidence = Some(bundle);
            run.outcome.state = TerminalState::NoAccount;
            return;
        }

        // 6. Classify
        let request = self.adapter.classification_request(&case, &extraction, &plan, &bundle);
        let classifier = Arc::clone(&self.classifier);
        let timeout = self.config.timeouts.classification();
        let response = run.timed(Phase::Classify, || {
            let raw = call_with_timeout(CLASSIFICATION_SERVICE, timeout, move || {
                classifier.classify(&request)
            })?;
            self.adapter.parse_verdict(&raw)
        });
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                run.outcome.evidence = Some(bundle);
                return run.fail(Phase::Classify, TerminalState::ClassifierError, e);
            }
        };

        // 7. Post-process
        let verdict = match run.timed(Phase::PostProcess, || self.rules.apply(&case_id, response, &bundle)) {
            Ok(verdict) => verdict,
            Err(e) => {
                let state = match e {
                    TriageError::ValidationViolation(_) => TerminalState::ManualReview,
                    _ => TerminalState::FatalError,
                };
                run.outcome.evidence = Some(bundle);
                return run.fail(Phase::PostProcess, state, e);
            }
        };
        for rule in &verdict.overrides {
            run.event(TriageEvent::RuleOverride { rule: rule.clone() });
        }
        run.event(TriageEvent::VerdictProduced {
            status:       verdict.status,
            confidence:   verdict.confidence,
            outcome_tier: verdict.outcome_tier,
        });
        log::info!(
            "case {case_id}: {} at {:.2} -> {}",
            verdict.status.as_str(),
            verdict.confidence,
            verdict.outcome_tier.label(),
        );

        let update = self.rules.ticket_update(&case, &verdict, &bundle, &run.outcome.investigated_at);
        run.outcome.ticket_update = Some(update);
        run.outcome.verdict = Some(verdict);
        run.outcome.evidence = Some(bundle);
        run.outcome.state = TerminalState::Success;
    }

    /// 8. Cache write and audit trail.
    fn finish(&self, mut run: Attempt) -> InvestigationOutcome {
        let case_id = run.outcome.case_id.clone();
        run.outcome.total_ms = elapsed_ms(run.started);

        if run.outcome.state.is_cacheable() {
            let snapshot = run.outcome.clone();
            if let Err(e) = run.timed(Phase::CacheWrite, || self.cache.upsert(&case_id, &snapshot)) {
                run.fail(Phase::CacheWrite, TerminalState::FatalError, e);
            }
            run.outcome.total_ms = elapsed_ms(run.started);
        }

        run.event(TriageEvent::InvestigationFinished {
            state:    run.outcome.state.as_str().to_string(),
            total_ms: run.outcome.total_ms,
        });
        self.persist_events(&run);
        log::info!(
            "case {case_id}: finished {} in {}ms",
            run.outcome.state.as_str(),
            run.outcome.total_ms
        );
        run.outcome
    }

    fn persist_events(&self, run: &Attempt) {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let entries: Vec<EventLogEntry> = run
            .events
            .iter()
            .enumerate()
            .filter_map(|(seq, event)| {
                let payload = serde_json::to_string(event).ok()?;
                Some(EventLogEntry {
                    id:         None,
                    case_id:    run.outcome.case_id.clone(),
                    attempt_id: run.outcome.attempt_id.clone(),
                    seq:        u32::try_from(seq).unwrap_or(u32::MAX),
                    event_type: event.type_name().to_string(),
                    payload,
                    created_at: created_at.clone(),
                })
            })
            .collect();
        if let Err(e) = self.cache.record_events(&entries) {
            log::warn!("case {}: audit events not recorded: {e}", run.outcome.case_id);
        }
    }
}

/// Mutable state of one attempt while the pipeline runs.
struct Attempt {
    outcome: InvestigationOutcome,
    events:  Vec<TriageEvent>,
    started: Instant,
}

impl Attempt {
    fn new(case_id: &str) -> Self {
        Self {
            outcome: InvestigationOutcome::new(
                case_id,
                Uuid::new_v4().to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            events:  Vec::new(),
            started: Instant::now(),
        }
    }

    fn event(&mut self, event: TriageEvent) {
        self.events.push(event);
    }

    fn last_elapsed(&self) -> u64 {
        self.outcome.phases.last().map(|p| p.elapsed_ms).unwrap_or(0)
    }

    fn timed<T, E: std::fmt::Display>(&mut self, phase: Phase, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        log::debug!("case {}: {} started", self.outcome.case_id, phase.as_str());
        let start = Instant::now();
        let result = f();
        let elapsed = elapsed_ms(start);
        self.outcome.phases.push(PhaseTiming { phase, elapsed_ms: elapsed, ok: result.is_ok() });
        match &result {
            Ok(_) => log::debug!("case {}: {} done in {elapsed}ms", self.outcome.case_id, phase.as_str()),
            Err(e) => log::debug!("case {}: {} failed in {elapsed}ms: {e}", self.outcome.case_id, phase.as_str()),
        }
        result
    }

    fn measure<T>(&mut self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        let elapsed = elapsed_ms(start);
        self.outcome.phases.push(PhaseTiming { phase, elapsed_ms: elapsed, ok: true });
        log::debug!("case {}: {} done in {elapsed}ms", self.outcome.case_id, phase.as_str());
        value
    }

    fn fail(&mut self, phase: Phase, state: TerminalState, error: TriageError) {
        let state = match error {
            TriageError::Timeout { .. } => TerminalState::Timeout,
            _ => state,
        };
        log::error!(
            "case {}: {} failed ({}): {error}",
            self.outcome.case_id,
            phase.as_str(),
            state.as_str()
        );
        self.event(TriageEvent::PhaseFailed {
            phase:      phase.as_str().to_string(),
            error_kind: error.kind().to_string(),
            message:    error.to_string(),
        });
        self.outcome.state = state;
        self.outcome.error = Some(OutcomeError::new(phase, &error));
    }
}
