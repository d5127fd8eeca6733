//! Stage executor: runs the planned evidence stages against the store.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Basic lookup   (always; resolves the account later stages key on)
//!   2. Risk signal    (optional; needs a supported device model)
//!   3. Historical     (optional)
//!   4. Behavioral     (optional; the expensive one, needs an account number)
//!
//! RULES:
//!   - A failure of the basic lookup aborts the case.
//!   - No account from the basic lookup skips every other stage.
//!   - Any other stage failure is recorded and execution continues.
//!   - A timeout anywhere aborts the case.
//!   - Each stage opens its own store session and drops it on return.

use crate::{
    collaborator::EvidenceStore,
    config::TriageConfig,
    error::{TriageError, TriageResult},
    evidence::AccountProfile,
    extractor::IdentifierSet,
    planner::StagePlan,
    timeout::call_with_timeout,
    types::{elapsed_ms, Millis, Row},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub const REASON_NO_ACCOUNT: &str = "no_account_found";
pub const REASON_NOT_PLANNED: &str = "not_planned";
pub const REASON_DEVICE_NOT_SUPPORTED: &str = "device_not_supported";
pub const REASON_NO_ACCOUNT_NUMBER: &str = "no_account_number";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    BasicLookup,
    RiskSignal,
    Historical,
    Behavioral,
}

impl StageName {
    pub const ORDER: [StageName; 4] =
        [Self::BasicLookup, Self::RiskSignal, Self::Historical, Self::Behavioral];
    pub const OPTIONAL: [StageName; 3] = [Self::RiskSignal, Self::Historical, Self::Behavioral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicLookup => "basic_lookup",
            Self::RiskSignal  => "risk_signal",
            Self::Historical  => "historical",
            Self::Behavioral  => "behavioral",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    NoData,
    Skipped,
    Failed,
}

/// The recorded outcome of one stage. Fields are read-only once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    stage:      StageName,
    status:     StageStatus,
    reason:     Option<String>,
    payload:    Value,
    elapsed_ms: Millis,
}

impl StageResult {
    pub fn success(stage: StageName, payload: Value, elapsed_ms: Millis) -> Self {
        Self { stage, status: StageStatus::Success, reason: None, payload, elapsed_ms }
    }

    pub fn no_data(stage: StageName, elapsed_ms: Millis) -> Self {
        Self { stage, status: StageStatus::NoData, reason: None, payload: Value::Null, elapsed_ms }
    }

    pub fn skipped(stage: StageName, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            reason: Some(reason.to_string()),
            payload: Value::Null,
            elapsed_ms: 0,
        }
    }

    pub fn failed(stage: StageName, error: &TriageError, elapsed_ms: Millis) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            reason: Some(format!("{}: {error}", error.kind())),
            payload: Value::Null,
            elapsed_ms,
        }
    }

    pub fn stage(&self)      -> StageName       { self.stage }
    pub fn status(&self)     -> StageStatus     { self.status }
    pub fn reason(&self)     -> Option<&str>    { self.reason.as_deref() }
    pub fn payload(&self)    -> &Value          { &self.payload }
    pub fn elapsed_ms(&self) -> Millis          { self.elapsed_ms }
}

/// Named query parameters for one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set(&mut self, key: &str, value: Option<String>) {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v);
        }
    }

    /// The canonical identifier-to-parameter contract. For stages after
    /// the basic lookup, values resolved from the account win over the
    /// case's own identifiers. Phone is never a query parameter.
    pub fn for_stage(stage: StageName, ids: &IdentifierSet, account: Option<&AccountProfile>) -> Self {
        let resolved = account.cloned().unwrap_or_default();
        let prefer = |from_account: &Option<String>, given: &Option<String>| {
            from_account.clone().or_else(|| given.clone())
        };

        let mut p = Self::default();
        match stage {
            StageName::BasicLookup => {
                p.set("imei", ids.imei.clone());
                p.set("loan_id", ids.loan_id.clone());
                p.set("account_number", ids.account_number.clone());
                p.set("device_id", ids.device_id.clone());
                p.set("customer_id", ids.customer_id.clone());
                p.set("account_id", ids.account_id.clone());
            }
            StageName::RiskSignal => {
                p.set("imei", prefer(&resolved.imei, &ids.imei));
                p.set("loan_id", prefer(&resolved.loan_id, &ids.loan_id));
                p.set("device_id", prefer(&resolved.device_id, &ids.device_id));
            }
            StageName::Historical => {
                p.set("imei", prefer(&resolved.imei, &ids.imei));
                p.set("account_number", prefer(&resolved.account_number, &ids.account_number));
                p.set("account_id", prefer(&resolved.account_id, &ids.account_id));
            }
            StageName::Behavioral => {
                p.set("account_number", prefer(&resolved.account_number, &ids.account_number));
            }
        }
        p
    }
}

/// Everything the executor produced for one case.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub results:         Vec<StageResult>,
    pub account:         Option<AccountProfile>,
    /// Estimated cost of the expensive stage when it was not run.
    pub cost_avoided_ms: Millis,
}

impl StageRun {
    pub fn account_found(&self) -> bool {
        self.account.is_some()
    }
}

/// A case-aborting failure, with whatever finished before it.
#[derive(Debug)]
pub struct StageFailure {
    pub error:     TriageError,
    pub completed: Vec<StageResult>,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} stages)", self.error, self.completed.len())
    }
}

pub struct StageExecutor {
    config: Arc<TriageConfig>,
    store:  Arc<dyn EvidenceStore>,
}

impl StageExecutor {
    pub fn new(config: Arc<TriageConfig>, store: Arc<dyn EvidenceStore>) -> Self {
        Self { config, store }
    }

    pub fn execute(
        &self,
        case_id: &str,
        plan: &StagePlan,
        ids: &IdentifierSet,
    ) -> Result<StageRun, StageFailure> {
        let mut results = Vec::with_capacity(StageName::ORDER.len());

        // Stage 1: hard dependency.
        let params = QueryParams::for_stage(StageName::BasicLookup, ids, None);
        let started = Instant::now();
        let rows = self
            .query(StageName::BasicLookup, params)
            .map_err(|error| {
                log::error!("case {case_id}: basic lookup failed: {error}");
                StageFailure { error, completed: Vec::new() }
            })?;
        let elapsed = elapsed_ms(started);

        let Some(first) = rows.into_iter().next() else {
            log::warn!("case {case_id}: no account found, skipping remaining stages");
            results.push(StageResult::no_data(StageName::BasicLookup, elapsed));
            results.extend(StageName::OPTIONAL.map(|s| StageResult::skipped(s, REASON_NO_ACCOUNT)));
            return Ok(StageRun { results, account: None, cost_avoided_ms: 0 });
        };

        let account = AccountProfile::from_row(&first);
        log::info!(
            "case {case_id}: account {} resolved in {elapsed}ms",
            account.account_number.as_deref().unwrap_or("?"),
        );
        results.push(StageResult::success(StageName::BasicLookup, Value::Object(first), elapsed));

        let expensive = self.config.expensive_stage();
        let mut cost_avoided_ms = 0;

        for stage in StageName::OPTIONAL {
            if !plan.enabled(stage) {
                if stage == expensive {
                    let cost = self.config.stage_cost_ms(stage);
                    cost_avoided_ms += cost;
                    log::info!("case {case_id}: {} skipped, cost avoided ~{cost}ms", stage.as_str());
                } else {
                    log::debug!("case {case_id}: {} not planned", stage.as_str());
                }
                results.push(StageResult::skipped(stage, REASON_NOT_PLANNED));
                continue;
            }

            if let Some(reason) = self.precondition_unmet(stage, &account) {
                log::info!("case {case_id}: {} skipped ({reason})", stage.as_str());
                results.push(StageResult::skipped(stage, reason));
                continue;
            }

            let params = QueryParams::for_stage(stage, ids, Some(&account));
            let started = Instant::now();
            let outcome = self.query(stage, params);
            let elapsed = elapsed_ms(started);

            let result = match outcome {
                Ok(rows) if rows.is_empty() => StageResult::no_data(stage, elapsed),
                Ok(rows) => StageResult::success(stage, stage_payload(stage, rows), elapsed),
                Err(error @ TriageError::Timeout { .. }) => {
                    log::error!("case {case_id}: {} timed out, aborting", stage.as_str());
                    return Err(StageFailure { error, completed: results });
                }
                Err(error) => {
                    log::warn!("case {case_id}: {} failed, continuing: {error}", stage.as_str());
                    StageResult::failed(stage, &error, elapsed)
                }
            };
            log::info!(
                "case {case_id}: {} -> {:?} in {}ms",
                stage.as_str(),
                result.status(),
                result.elapsed_ms()
            );
            results.push(result);
        }

        Ok(StageRun { results, account: Some(account), cost_avoided_ms })
    }

    fn precondition_unmet(&self, stage: StageName, account: &AccountProfile) -> Option<&'static str> {
        match stage {
            StageName::RiskSignal => {
                let supported = account
                    .device_model
                    .as_deref()
                    .is_some_and(|m| self.config.supports_risk_signals(m));
                (!supported).then_some(REASON_DEVICE_NOT_SUPPORTED)
            }
            StageName::Behavioral => {
                account.account_number.is_none().then_some(REASON_NO_ACCOUNT_NUMBER)
            }
            StageName::BasicLookup | StageName::Historical => None,
        }
    }

    fn query(&self, stage: StageName, params: QueryParams) -> TriageResult<Vec<Row>> {
        let store = Arc::clone(&self.store);
        call_with_timeout(stage.as_str(), self.config.timeouts.stage_query(), move || {
            let mut session = store.open_session()?;
            session.run_query(stage, &params)
        })
    }
}

/// Historical returns a list; every other stage keeps its first row.
fn stage_payload(stage: StageName, rows: Vec<Row>) -> Value {
    match stage {
        StageName::Historical => Value::Array(rows.into_iter().map(Value::Object).collect()),
        _ => rows.into_iter().next().map(Value::Object).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_stages_prefer_resolved_identifiers() {
        let ids = IdentifierSet {
            imei: Some("111111111111111".into()),
            account_number: Some("GIVEN".into()),
            phone: Some("0712345678".into()),
            ..Default::default()
        };
        let account = AccountProfile {
            account_number: Some("RESOLVED".into()),
            ..Default::default()
        };
        let p = QueryParams::for_stage(StageName::Historical, &ids, Some(&account));
        assert_eq!(p.get("account_number"), Some("RESOLVED"));
        assert_eq!(p.get("imei"), Some("111111111111111"));
        assert_eq!(p.get("phone"), None);

        let p = QueryParams::for_stage(StageName::Behavioral, &ids, Some(&account));
        assert_eq!(p.get("account_number"), Some("RESOLVED"));
        assert_eq!(p.get("imei"), None);
    }

    #[test]
    fn basic_lookup_never_carries_phone() {
        let ids = IdentifierSet { phone: Some("0712345678".into()), ..Default::default() };
        assert!(QueryParams::for_stage(StageName::BasicLookup, &ids, None).is_empty());
    }
}
