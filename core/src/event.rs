//! Audit events: what happened to a case, in order.
//!
//! RULE: The orchestrator is the only producer. Events are buffered for
//! the attempt and persisted once it reaches a terminal state, whatever
//! that state is.

use crate::{
    executor::{StageName, StageStatus},
    planner::{FraudType, RiskTier, Route},
    types::{AttemptId, CaseId, Millis},
    verdict::{OutcomeTier, VerdictStatus},
};
use serde::{Deserialize, Serialize};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriageEvent {
    CaseFetched {
        elapsed_ms: Millis,
    },
    IdentifiersExtracted {
        identifiers: usize,
        phones:      usize,
    },
    PlanProduced {
        route:      Route,
        fraud_type: FraudType,
        risk_tier:  RiskTier,
        stages:     Vec<StageName>,
        overrides:  usize,
    },
    StageCompleted {
        stage:      StageName,
        status:     StageStatus,
        elapsed_ms: Millis,
    },
    CostAvoided {
        stage:        StageName,
        estimated_ms: Millis,
    },
    VerdictProduced {
        status:       VerdictStatus,
        confidence:   f64,
        outcome_tier: OutcomeTier,
    },
    RuleOverride {
        rule: String,
    },
    CacheHit {
        investigated_at: String,
    },
    PhaseFailed {
        phase:      String,
        error_kind: String,
        message:    String,
    },
    InvestigationFinished {
        state:    String,
        total_ms: Millis,
    },
}

impl TriageEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CaseFetched { .. }           => "case_fetched",
            Self::IdentifiersExtracted { .. }  => "identifiers_extracted",
            Self::PlanProduced { .. }          => "plan_produced",
            Self::StageCompleted { .. }        => "stage_completed",
            Self::CostAvoided { .. }           => "cost_avoided",
            Self::VerdictProduced { .. }       => "verdict_produced",
            Self::RuleOverride { .. }          => "rule_override",
            Self::CacheHit { .. }              => "cache_hit",
            Self::PhaseFailed { .. }           => "phase_failed",
            Self::InvestigationFinished { .. } => "investigation_finished",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub case_id:    CaseId,
    pub attempt_id: AttemptId,
    pub seq:        u32,
    pub event_type: String,
    pub payload:    String, // JSON-serialized TriageEvent
    pub created_at: String,
}

impl EventLogEntry {
    pub fn event(&self) -> serde_json::Result<TriageEvent> {
        serde_json::from_str(&self.payload)
    }
}
