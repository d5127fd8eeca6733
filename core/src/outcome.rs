//! What an investigation returns, whether it finished or not.

use crate::{
    aggregator::EvidenceBundle,
    error::TriageError,
    extractor::IdentifierSet,
    planner::{FraudType, StagePlan},
    store::InvestigationRow,
    types::{AttemptId, CaseId, Millis},
    verdict::{Allegation, OutcomeTier, TicketUpdate, Verdict, VerdictStatus},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Success,
    NoAccount,
    ClassifierError,
    EvidenceStoreError,
    FatalError,
    Cached,
    ManualReview,
    Timeout,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success            => "success",
            Self::NoAccount          => "no_account",
            Self::ClassifierError    => "classifier_error",
            Self::EvidenceStoreError => "evidence_store_error",
            Self::FatalError         => "fatal_error",
            Self::Cached             => "cached",
            Self::ManualReview       => "manual_review",
            Self::Timeout            => "timeout",
        }
    }

    /// Only completed investigations are worth keeping.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Success | Self::NoAccount)
    }

    /// The case did not get an answer and needs a rerun.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ClassifierError | Self::EvidenceStoreError | Self::FatalError | Self::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetch,
    Extract,
    Plan,
    Execute,
    Aggregate,
    Classify,
    PostProcess,
    CacheWrite,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch       => "fetch",
            Self::Extract     => "extract",
            Self::Plan        => "plan",
            Self::Execute     => "execute",
            Self::Aggregate   => "aggregate",
            Self::Classify    => "classify",
            Self::PostProcess => "post_process",
            Self::CacheWrite  => "cache_write",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhaseTiming {
    pub phase:      Phase,
    pub elapsed_ms: Millis,
    pub ok:         bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeError {
    pub phase:     Phase,
    pub kind:      String,
    pub message:   String,
    pub retryable: bool,
}

impl OutcomeError {
    pub fn new(phase: Phase, error: &TriageError) -> Self {
        Self {
            phase,
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// The structured result of one investigation attempt. Every field past
/// `state` is filled as far as the pipeline got.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestigationOutcome {
    pub case_id:         CaseId,
    pub attempt_id:      AttemptId,
    /// RFC 3339, UTC.
    pub investigated_at: String,
    pub state:           TerminalState,
    pub identifiers:     Option<IdentifierSet>,
    pub plan:            Option<StagePlan>,
    pub evidence:        Option<EvidenceBundle>,
    pub verdict:         Option<Verdict>,
    pub ticket_update:   Option<TicketUpdate>,
    pub phases:          Vec<PhaseTiming>,
    pub total_ms:        Millis,
    pub error:           Option<OutcomeError>,
}

impl InvestigationOutcome {
    pub fn new(case_id: &str, attempt_id: AttemptId, investigated_at: String) -> Self {
        Self {
            case_id: case_id.to_string(),
            attempt_id,
            investigated_at,
            state: TerminalState::FatalError,
            identifiers: None,
            plan: None,
            evidence: None,
            verdict: None,
            ticket_update: None,
            phases: Vec::new(),
            total_ms: 0,
            error: None,
        }
    }

    pub fn summary(&self) -> InvestigationSummary {
        InvestigationSummary {
            case_id:         self.case_id.clone(),
            investigated_at: self.investigated_at.clone(),
            state:           self.state,
            status:          self.verdict.as_ref().map(|v| v.status),
            confidence:      self.verdict.as_ref().map(|v| v.confidence),
            allegation:      self.verdict.as_ref().and_then(|v| v.allegation),
            outcome_tier:    self.verdict.as_ref().map(|v| v.outcome_tier),
            fraud_type:      self.plan.as_ref().map(|p| p.fraud_type),
        }
    }

    /// Flatten for the cache table.
    pub fn to_row(&self) -> serde_json::Result<InvestigationRow> {
        let verdict = self.verdict.as_ref();
        let plan = self.plan.as_ref();
        Ok(InvestigationRow {
            case_id:          self.case_id.clone(),
            attempt_id:       self.attempt_id.clone(),
            investigated_at:  self.investigated_at.clone(),
            terminal_state:   self.state.as_str().to_string(),
            status:           verdict.map(|v| v.status.as_str().to_string()),
            confidence:       verdict.map(|v| v.confidence),
            allegation:       verdict.and_then(|v| v.allegation).map(|a| a.as_str().to_string()),
            outcome_tier:     verdict.map(|v| label(&v.outcome_tier)).transpose()?,
            fraud_type:       plan.map(|p| p.fraud_type.as_str().to_string()),
            risk_tier:        plan.map(|p| p.risk_tier.as_str().to_string()),
            route:            plan.map(|p| p.route.as_str().to_string()),
            suspect_category: verdict
                .and_then(|v| v.suspect.category)
                .map(|c| label(&c))
                .transpose()?,
            suspect_name:     verdict.and_then(|v| v.suspect.name.clone()),
            total_ms:         self.total_ms,
            payload:          serde_json::to_string(self)?,
        })
    }
}

/// Cheap lookup view of a cached investigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestigationSummary {
    pub case_id:         CaseId,
    pub investigated_at: String,
    pub state:           TerminalState,
    pub status:          Option<VerdictStatus>,
    pub confidence:      Option<f64>,
    pub allegation:      Option<Allegation>,
    pub outcome_tier:    Option<OutcomeTier>,
    pub fraud_type:      Option<FraudType>,
}

impl InvestigationSummary {
    /// Read back from the flattened columns. A column that no longer
    /// decodes reads as None.
    pub fn from_row(row: &InvestigationRow) -> Self {
        Self {
            case_id:         row.case_id.clone(),
            investigated_at: row.investigated_at.clone(),
            state:           decode(Some(row.terminal_state.as_str())).unwrap_or(TerminalState::FatalError),
            status:          decode(row.status.as_deref()),
            confidence:      row.confidence,
            allegation:      decode(row.allegation.as_deref()),
            outcome_tier:    decode(row.outcome_tier.as_deref()),
            fraud_type:      decode(row.fraud_type.as_deref()),
        }
    }
}

/// Serde label of a unit enum variant.
fn label<T: Serialize>(value: &T) -> serde_json::Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn decode<T: DeserializeOwned>(raw: Option<&str>) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw?.to_string())).ok()
}
