//! Contracts for the systems the engine talks to but does not own.
//!
//! RULE: The engine reaches the outside world ONLY through these traits.
//! Every implementation must be Send + Sync: calls run on helper threads
//! so that each one can be bounded by a timeout.

use crate::{
    case::Case,
    classifier::{ClassificationRequest, PlanningRequest},
    error::TriageResult,
    executor::{QueryParams, StageName},
    types::{CaseId, Row},
    verdict::TicketUpdate,
};

/// The ticket system.
pub trait CaseSource: Send + Sync {
    /// Fails with `DataNotFound` or `AuthError`.
    fn fetch_case(&self, case_id: &str) -> TriageResult<Case>;

    /// Ids of cases currently open for the fraud team.
    fn open_case_ids(&self) -> TriageResult<Vec<CaseId>>;
}

/// The read-only, eventually-consistent analytics warehouse.
pub trait EvidenceStore: Send + Sync {
    /// Open a session scoped to a single stage invocation.
    /// The session is released when dropped.
    fn open_session(&self) -> TriageResult<Box<dyn EvidenceSession>>;
}

pub trait EvidenceSession: Send {
    /// Fails with `UpstreamUnavailable` on connection loss.
    fn run_query(&mut self, stage: StageName, params: &QueryParams) -> TriageResult<Vec<Row>>;
}

/// The external, non-deterministic classification capability.
/// Both calls return the service's raw text; the adapter parses it.
pub trait ClassificationService: Send + Sync {
    fn plan(&self, request: &PlanningRequest) -> TriageResult<String>;
    fn classify(&self, request: &ClassificationRequest) -> TriageResult<String>;
}

/// Writes verdicts back to the ticket system in live-apply mode.
pub trait TicketUpdater: Send + Sync {
    fn apply(&self, case_id: &str, update: &TicketUpdate) -> TriageResult<()>;
}
