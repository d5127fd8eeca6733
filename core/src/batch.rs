//! Batch execution: a fold over case ids under an explicit policy.
//!
//! RULES:
//!   - One case's failure never crashes the batch. With
//!     `ErrorPolicy::Stop`, cases not yet started are reported as not run.
//!   - Reports come back in input order whatever the worker count.
//!   - Only fresh successful verdicts are written back to tickets, and
//!     only outside dry-run.

use crate::{
    collaborator::TicketUpdater,
    engine::{InvestigateOptions, InvestigationEngine},
    outcome::{InvestigationOutcome, TerminalState},
    timeout::call_with_timeout,
    types::{CaseId, Millis},
    verdict::{Allegation, OutcomeTier, VerdictStatus},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchPolicy {
    pub on_error: ErrorPolicy,
    pub force:    bool,
    pub dry_run:  bool,
    pub workers:  usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self { on_error: ErrorPolicy::Continue, force: false, dry_run: true, workers: 1 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    NotApplicable,
    DryRun,
    Applied,
    Failed,
}

/// One line of the batch report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseReport {
    pub case_id:         CaseId,
    /// None if the batch stopped before reaching this case.
    pub state:           Option<TerminalState>,
    pub status:          Option<VerdictStatus>,
    pub confidence:      Option<f64>,
    pub allegation:      Option<Allegation>,
    pub outcome_tier:    Option<OutcomeTier>,
    pub stages_executed: usize,
    pub stages_skipped:  usize,
    pub cost_avoided_ms: Millis,
    pub total_ms:        Millis,
    pub apply:           ApplyStatus,
    pub error:           Option<String>,
}

impl CaseReport {
    fn from_outcome(outcome: &InvestigationOutcome) -> Self {
        let verdict = outcome.verdict.as_ref();
        let fresh = outcome.state != TerminalState::Cached;
        let log = outcome.evidence.as_ref().filter(|_| fresh).map(|e| &e.execution_log);
        Self {
            case_id:         outcome.case_id.clone(),
            state:           Some(outcome.state),
            status:          verdict.map(|v| v.status),
            confidence:      verdict.map(|v| v.confidence),
            allegation:      verdict.and_then(|v| v.allegation),
            outcome_tier:    verdict.map(|v| v.outcome_tier),
            stages_executed: log.map_or(0, |l| l.stages_executed().len()),
            stages_skipped:  log.map_or(0, |l| l.stages_skipped().len()),
            cost_avoided_ms: log.map_or(0, |l| l.cost_avoided_ms),
            total_ms:        if fresh { outcome.total_ms } else { 0 },
            apply:           ApplyStatus::NotApplicable,
            error:           outcome.error.as_ref().map(|e| format!("{}: {}", e.kind, e.message)),
        }
    }

    fn not_run(case_id: &str) -> Self {
        Self {
            case_id:         case_id.to_string(),
            state:           None,
            status:          None,
            confidence:      None,
            allegation:      None,
            outcome_tier:    None,
            stages_executed: 0,
            stages_skipped:  0,
            cost_avoided_ms: 0,
            total_ms:        0,
            apply:           ApplyStatus::NotApplicable,
            error:           None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.state.is_some_and(|s| s.is_failure()) || self.apply == ApplyStatus::Failed
    }

    /// One human-readable line.
    pub fn line(&self) -> String {
        let state = self.state.map_or("not_run", |s| s.as_str());
        match (self.status, self.confidence) {
            (Some(status), Some(conf)) => format!(
                "{}: {state} {} {conf:.2} {}{}",
                self.case_id,
                status.as_str(),
                self.outcome_tier.map_or("", |t| t.label()),
                self.allegation.map(|a| format!(" [{}]", a.label())).unwrap_or_default(),
            ),
            _ => match &self.error {
                Some(e) => format!("{}: {state} ({e})", self.case_id),
                None => format!("{}: {state}", self.case_id),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total:           usize,
    pub succeeded:       usize,
    pub cached:          usize,
    pub no_account:      usize,
    pub manual_review:   usize,
    pub failed:          usize,
    pub not_run:         usize,
    pub fraud_likely:    usize,
    pub not_fraud:       usize,
    pub avg_confidence:  Option<f64>,
    pub stages_executed: usize,
    pub stages_skipped:  usize,
    pub cost_avoided_ms: Millis,
}

impl BatchSummary {
    pub fn from_reports(reports: &[CaseReport]) -> Self {
        let mut s = reports.iter().fold(Self::default(), |mut s, r| {
            s.total += 1;
            match r.state {
                Some(TerminalState::Success)      => s.succeeded += 1,
                Some(TerminalState::Cached)       => s.cached += 1,
                Some(TerminalState::NoAccount)    => s.no_account += 1,
                Some(TerminalState::ManualReview) => s.manual_review += 1,
                None                              => s.not_run += 1,
                Some(_)                           => {}
            }
            if r.is_failure() {
                s.failed += 1;
            }
            match r.status {
                Some(VerdictStatus::FraudLikely) => s.fraud_likely += 1,
                Some(VerdictStatus::NotFraud)    => s.not_fraud += 1,
                None                             => {}
            }
            s.stages_executed += r.stages_executed;
            s.stages_skipped += r.stages_skipped;
            s.cost_avoided_ms += r.cost_avoided_ms;
            s
        });
        let confidences: Vec<f64> = reports.iter().filter_map(|r| r.confidence).collect();
        if !confidences.is_empty() {
            s.avg_confidence = Some(confidences.iter().sum::<f64>() / confidences.len() as f64);
        }
        s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    pub cases:   Vec<CaseReport>,
    pub summary: BatchSummary,
}

impl BatchReport {
    /// True if any case failed irrecoverably; drives the exit status.
    pub fn exit_failed(&self) -> bool {
        self.summary.failed > 0
    }
}

pub struct BatchRunner<'a> {
    engine:  &'a InvestigationEngine,
    updater: Option<Arc<dyn TicketUpdater>>,
    policy:  BatchPolicy,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: &'a InvestigationEngine, policy: BatchPolicy) -> Self {
        Self { engine, updater: None, policy }
    }

    pub fn with_updater(mut self, updater: Arc<dyn TicketUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn run(&self, case_ids: &[CaseId]) -> BatchReport {
        let workers = self.policy.workers.clamp(1, case_ids.len().max(1));
        log::info!(
            "Batch of {} cases: {workers} workers, force={}, dry_run={}, on_error={:?}",
            case_ids.len(),
            self.policy.force,
            self.policy.dry_run,
            self.policy.on_error,
        );
        let cases = if workers == 1 {
            self.run_sequential(case_ids)
        } else {
            self.run_pool(case_ids, workers)
        };
        let summary = BatchSummary::from_reports(&cases);
        log::info!(
            "Batch done: {} total, {} succeeded, {} cached, {} no account, {} failed, {} not run, cost avoided ~{}ms",
            summary.total,
            summary.succeeded,
            summary.cached,
            summary.no_account,
            summary.failed,
            summary.not_run,
            summary.cost_avoided_ms,
        );
        BatchReport { cases, summary }
    }

    fn run_sequential(&self, case_ids: &[CaseId]) -> Vec<CaseReport> {
        let (reports, _) = case_ids.iter().fold(
            (Vec::with_capacity(case_ids.len()), false),
            |(mut reports, stopped), id| {
                if stopped {
                    reports.push(CaseReport::not_run(id));
                    return (reports, true);
                }
                let report = self.run_case(id);
                let stop = self.should_stop(&report);
                reports.push(report);
                (reports, stop)
            },
        );
        reports
    }

    fn run_pool(&self, case_ids: &[CaseId], workers: usize) -> Vec<CaseReport> {
        let (job_tx, job_rx) = crossbeam_channel::bounded(case_ids.len());
        for job in case_ids.iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let stop = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let stop = &stop;
                scope.spawn(move || {
                    for (index, id) in job_rx.iter() {
                        let report = if stop.load(Ordering::SeqCst) {
                            CaseReport::not_run(id)
                        } else {
                            self.run_case(id)
                        };
                        if self.should_stop(&report) {
                            stop.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send((index, report)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<CaseReport>> = (0..case_ids.len()).map(|_| None).collect();
        for (index, report) in result_rx.try_iter() {
            slots[index] = Some(report);
        }
        slots
            .into_iter()
            .zip(case_ids)
            .map(|(slot, id)| slot.unwrap_or_else(|| CaseReport::not_run(id)))
            .collect()
    }

    fn should_stop(&self, report: &CaseReport) -> bool {
        let stop = self.policy.on_error == ErrorPolicy::Stop && report.is_failure();
        if stop {
            log::warn!("case {} failed, stopping batch", report.case_id);
        }
        stop
    }

    fn run_case(&self, case_id: &str) -> CaseReport {
        let outcome = self
            .engine
            .investigate(case_id, InvestigateOptions { force: self.policy.force });
        let mut report = CaseReport::from_outcome(&outcome);
        let (apply, error) = self.apply(&outcome);
        report.apply = apply;
        if error.is_some() {
            report.error = error;
        }
        log::info!("{}", report.line());
        report
    }

    fn apply(&self, outcome: &InvestigationOutcome) -> (ApplyStatus, Option<String>) {
        let Some(update) = outcome.ticket_update.clone() else {
            return (ApplyStatus::NotApplicable, None);
        };
        if outcome.state != TerminalState::Success {
            return (ApplyStatus::NotApplicable, None);
        }
        let case_id = outcome.case_id.clone();
        if self.policy.dry_run {
            log::info!(
                "case {case_id}: dry run, would set status={} outcome={} allegation={}",
                update.fraud_status.as_deref().unwrap_or("-"),
                update.case_outcome,
                update.allegation.as_deref().unwrap_or("-"),
            );
            return (ApplyStatus::DryRun, None);
        }
        let Some(updater) = self.updater.as_ref().map(Arc::clone) else {
            log::warn!("case {case_id}: live mode without a ticket updater, not applied");
            return (ApplyStatus::NotApplicable, None);
        };
        let timeout = self.engine.config().timeouts.ticket_update();
        let id = case_id.clone();
        match call_with_timeout("ticket_update", timeout, move || updater.apply(&id, &update)) {
            Ok(()) => {
                log::info!("case {case_id}: ticket updated");
                (ApplyStatus::Applied, None)
            }
            Err(e) => {
                log::error!("case {case_id}: ticket update failed: {e}");
                (ApplyStatus::Failed, Some(format!("{}: {e}", e.kind())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(state: Option<TerminalState>, confidence: Option<f64>) -> CaseReport {
        let mut r = CaseReport::not_run("C");
        r.state = state;
        r.confidence = confidence;
        r.status = confidence.map(|_| VerdictStatus::FraudLikely);
        r
    }

    #[test]
    fn summary_counts_each_state() {
        let reports = vec![
            report(Some(TerminalState::Success), Some(0.8)),
            report(Some(TerminalState::Cached), Some(0.6)),
            report(Some(TerminalState::NoAccount), None),
            report(Some(TerminalState::Timeout), None),
            report(None, None),
        ];
        let s = BatchSummary::from_reports(&reports);
        assert_eq!(s.total, 5);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.cached, 1);
        assert_eq!(s.no_account, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.not_run, 1);
        assert_eq!(s.fraud_likely, 2);
        let avg = s.avg_confidence.unwrap();
        assert!((avg - 0.7).abs() < 1e-9, "avg {avg}");
    }

    #[test]
    fn failed_apply_is_a_failure() {
        let mut r = report(Some(TerminalState::Success), Some(0.9));
        assert!(!r.is_failure());
        r.apply = ApplyStatus::Failed;
        assert!(r.is_failure());
    }
}
