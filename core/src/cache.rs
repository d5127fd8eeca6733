//! Investigation cache: one result per case id, last write wins.
//!
//! RULES:
//!   - upsert overwrites; there is never more than one row per case.
//!   - Only success and no_account outcomes are stored.
//!   - At most one investigation per case id runs at a time in this
//!     process. A second caller waits on the first via `claim`.

use crate::{
    error::{TriageError, TriageResult},
    event::EventLogEntry,
    outcome::{InvestigationOutcome, InvestigationSummary},
    store::{CacheStats, CacheStore},
    types::CaseId,
};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub struct InvestigationCache {
    store:     Mutex<CacheStore>,
    in_flight: Mutex<HashSet<CaseId>>,
    released:  Condvar,
}

/// Exclusive right to investigate one case. Released on drop.
pub struct CaseClaim<'a> {
    cache:   &'a InvestigationCache,
    case_id: CaseId,
    waited:  bool,
}

impl CaseClaim<'_> {
    /// True if another investigation of the same case ran first.
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for CaseClaim<'_> {
    fn drop(&mut self) {
        let mut busy = self.cache.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        busy.remove(&self.case_id);
        self.cache.released.notify_all();
    }
}

impl InvestigationCache {
    pub fn new(store: CacheStore) -> TriageResult<Self> {
        store.migrate()?;
        Ok(Self {
            store:     Mutex::new(store),
            in_flight: Mutex::new(HashSet::new()),
            released:  Condvar::new(),
        })
    }

    pub fn open(path: &str) -> TriageResult<Self> {
        log::debug!("Opening investigation cache at {path}");
        Self::new(CacheStore::open(path)?)
    }

    pub fn in_memory() -> TriageResult<Self> {
        Self::new(CacheStore::in_memory()?)
    }

    fn store(&self) -> TriageResult<MutexGuard<'_, CacheStore>> {
        self.store
            .lock()
            .map_err(|_| TriageError::Other(anyhow::anyhow!("investigation cache lock poisoned")))
    }

    /// Block until no other investigation of `case_id` is running, then
    /// take the claim.
    pub fn claim(&self, case_id: &str) -> CaseClaim<'_> {
        let mut busy = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let mut waited = false;
        while busy.contains(case_id) {
            if !waited {
                log::info!("case {case_id}: waiting for the running investigation");
            }
            waited = true;
            busy = self.released.wait(busy).unwrap_or_else(PoisonError::into_inner);
        }
        busy.insert(case_id.to_string());
        CaseClaim { cache: self, case_id: case_id.to_string(), waited }
    }

    /// Store the outcome under its case id. Returns false if the outcome's
    /// state is not cacheable and nothing was written.
    pub fn upsert(&self, case_id: &str, outcome: &InvestigationOutcome) -> TriageResult<bool> {
        if !outcome.state.is_cacheable() {
            log::debug!("case {case_id}: {} not cached", outcome.state.as_str());
            return Ok(false);
        }
        let mut row = outcome.to_row()?;
        row.case_id = case_id.to_string();
        self.store()?.upsert_investigation(&row)?;
        log::debug!("case {case_id}: cached ({})", outcome.state.as_str());
        Ok(true)
    }

    pub fn get_summary(&self, case_id: &str) -> TriageResult<Option<InvestigationSummary>> {
        let row = self.store()?.get_investigation(case_id)?;
        Ok(row.as_ref().map(InvestigationSummary::from_row))
    }

    pub fn get_full(&self, case_id: &str) -> TriageResult<Option<InvestigationOutcome>> {
        let Some(row) = self.store()?.get_investigation(case_id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&row.payload)?))
    }

    pub fn stats(&self) -> TriageResult<CacheStats> {
        self.store()?.investigation_stats()
    }

    pub fn delete(&self, case_id: &str) -> TriageResult<bool> {
        self.store()?.delete_investigation(case_id)
    }

    pub fn clear(&self) -> TriageResult<usize> {
        let n = self.store()?.clear_investigations()?;
        log::info!("Cleared {n} cached investigations");
        Ok(n)
    }

    pub fn count(&self) -> TriageResult<u64> {
        self.store()?.investigation_count()
    }

    pub fn list_recent(&self, limit: usize) -> TriageResult<Vec<InvestigationSummary>> {
        let rows = self.store()?.recent_investigations(limit)?;
        Ok(rows.iter().map(InvestigationSummary::from_row).collect())
    }

    pub fn record_events(&self, entries: &[EventLogEntry]) -> TriageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.store()?.append_events(entries)
    }

    pub fn events_for_case(&self, case_id: &str) -> TriageResult<Vec<EventLogEntry>> {
        self.store()?.events_for_case(case_id)
    }

    pub fn cost_avoided_total_ms(&self) -> TriageResult<u64> {
        self.store()?.cost_avoided_total_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::TerminalState;
    use std::sync::Arc;
    use std::time::Duration;

    fn outcome(case_id: &str, state: TerminalState) -> InvestigationOutcome {
        let mut o = InvestigationOutcome::new(case_id, "attempt-1".into(), "2026-01-01T00:00:00Z".into());
        o.state = state;
        o
    }

    #[test]
    fn error_states_are_not_written() {
        let cache = InvestigationCache::in_memory().unwrap();
        assert!(!cache.upsert("C-1", &outcome("C-1", TerminalState::Timeout)).unwrap());
        assert_eq!(cache.count().unwrap(), 0);
        assert!(cache.upsert("C-1", &outcome("C-1", TerminalState::NoAccount)).unwrap());
        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn second_claim_waits_for_first() {
        let cache = Arc::new(InvestigationCache::in_memory().unwrap());
        let first = cache.claim("C-1");
        assert!(!first.waited());

        let c = Arc::clone(&cache);
        let handle = std::thread::spawn(move || {
            let waited = c.claim("C-1").waited();
            waited
        });
        std::thread::sleep(Duration::from_millis(100));
        // A different case never waits.
        assert!(!cache.claim("C-2").waited());
        drop(first);
        assert!(handle.join().unwrap());
    }
}
