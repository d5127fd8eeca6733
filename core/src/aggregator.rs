//! Evidence aggregation: folds stage results into one bundle.
//!
//! RULE: Aggregation never fails. A skipped, failed or empty stage leaves
//! its section empty and is noted in the execution log.

use crate::{
    evidence::{AccountProfile, BehavioralSnapshot, HistoricalCase, RiskSignals},
    executor::{StageName, StageResult, StageStatus},
    types::{Millis, Row},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLogEntry {
    pub stage:      StageName,
    pub status:     StageStatus,
    pub reason:     Option<String>,
    pub elapsed_ms: Millis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLog {
    pub entries:         Vec<ExecutionLogEntry>,
    pub total_ms:        Millis,
    pub cost_avoided_ms: Millis,
}

impl ExecutionLog {
    /// Stages that actually hit the store, whatever came back.
    pub fn stages_executed(&self) -> Vec<StageName> {
        self.entries
            .iter()
            .filter(|e| e.status != StageStatus::Skipped)
            .map(|e| e.stage)
            .collect()
    }

    pub fn stages_skipped(&self) -> Vec<StageName> {
        self.entries
            .iter()
            .filter(|e| e.status == StageStatus::Skipped)
            .map(|e| e.stage)
            .collect()
    }

    pub fn status_of(&self, stage: StageName) -> Option<StageStatus> {
        self.entries.iter().find(|e| e.stage == stage).map(|e| e.status)
    }
}

/// All evidence gathered for one case.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidenceBundle {
    pub account_profile:  AccountProfile,
    pub risk_signals:     RiskSignals,
    pub historical_cases: Vec<HistoricalCase>,
    pub behavioral:       BehavioralSnapshot,
    pub execution_log:    ExecutionLog,
}

impl EvidenceBundle {
    pub fn has_account(&self) -> bool {
        !self.account_profile.is_empty()
    }

    pub fn has_risk_signals(&self) -> bool {
        !self.risk_signals.is_empty()
    }

    pub fn has_behavioral(&self) -> bool {
        !self.behavioral.is_empty()
    }

    pub fn fraud_related_history(&self) -> usize {
        self.historical_cases.iter().filter(|c| c.is_fraud_related()).count()
    }
}

pub fn aggregate(results: &[StageResult], cost_avoided_ms: Millis) -> EvidenceBundle {
    let mut bundle = EvidenceBundle::default();

    for result in results {
        bundle.execution_log.entries.push(ExecutionLogEntry {
            stage:      result.stage(),
            status:     result.status(),
            reason:     result.reason().map(str::to_string),
            elapsed_ms: result.elapsed_ms(),
        });
        bundle.execution_log.total_ms += result.elapsed_ms();

        if result.status() != StageStatus::Success {
            continue;
        }
        match result.stage() {
            StageName::BasicLookup => {
                if let Some(row) = first_row(result.payload()) {
                    bundle.account_profile = AccountProfile::from_row(row);
                }
            }
            StageName::RiskSignal => {
                if let Some(row) = first_row(result.payload()) {
                    bundle.risk_signals = RiskSignals::from_row(row);
                }
            }
            StageName::Historical => {
                bundle.historical_cases = rows(result.payload())
                    .map(HistoricalCase::from_row)
                    .collect();
            }
            StageName::Behavioral => {
                if let Some(row) = first_row(result.payload()) {
                    bundle.behavioral = BehavioralSnapshot::from_row(row);
                }
            }
        }
    }
    bundle.execution_log.cost_avoided_ms = cost_avoided_ms;
    bundle
}

/// A payload is a single row or a list of rows.
fn rows(payload: &Value) -> impl Iterator<Item = &Row> {
    let items: Vec<&Row> = match payload {
        Value::Object(row) => vec![row],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };
    items.into_iter()
}

fn first_row(payload: &Value) -> Option<&Row> {
    rows(payload).next()
}
