//! Audit event log queries.

use super::CacheStore;
use crate::{error::TriageResult, event::EventLogEntry};
use rusqlite::params;

impl CacheStore {
    /// Append a batch of entries in one transaction.
    pub fn append_events(&mut self, entries: &[EventLogEntry]) -> TriageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO investigation_event
                    (case_id, attempt_id, seq, event_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in entries {
                stmt.execute(params![
                    e.case_id,
                    e.attempt_id,
                    e.seq,
                    e.event_type,
                    e.payload,
                    e.created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every attempt's events for a case, oldest first.
    pub fn events_for_case(&self, case_id: &str) -> TriageResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, case_id, attempt_id, seq, event_type, payload, created_at
             FROM investigation_event WHERE case_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![case_id], |row| {
                Ok(EventLogEntry {
                    id:         Some(row.get(0)?),
                    case_id:    row.get(1)?,
                    attempt_id: row.get(2)?,
                    seq:        row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Running total of the expensive-stage cost not spent.
    pub fn cost_avoided_total_ms(&self) -> TriageResult<u64> {
        let total: u64 = self.conn.query_row(
            "SELECT COALESCE(SUM(json_extract(payload, '$.estimated_ms')), 0)
             FROM investigation_event WHERE event_type = 'cost_avoided'",
            [],
            |r| r.get(0),
        )?;
        Ok(total)
    }
}
