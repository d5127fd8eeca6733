//! Investigation cache queries.

use super::CacheStore;
use crate::error::TriageResult;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// One cached investigation, flattened for querying. `payload` holds the
/// full outcome as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestigationRow {
    pub case_id:          String,
    pub attempt_id:       String,
    pub investigated_at:  String,
    pub terminal_state:   String,
    pub status:           Option<String>,
    pub confidence:       Option<f64>,
    pub allegation:       Option<String>,
    pub outcome_tier:     Option<String>,
    pub fraud_type:       Option<String>,
    pub risk_tier:        Option<String>,
    pub route:            Option<String>,
    pub suspect_category: Option<String>,
    pub suspect_name:     Option<String>,
    pub total_ms:         u64,
    pub payload:          String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub total:          u64,
    pub fraud_likely:   u64,
    pub not_fraud:      u64,
    /// Mean confidence over rows that carry a verdict.
    pub avg_confidence: Option<f64>,
}

const COLUMNS: &str = "case_id, attempt_id, investigated_at, terminal_state, status, confidence,
     allegation, outcome_tier, fraud_type, risk_tier, route, suspect_category,
     suspect_name, total_ms, payload";

fn read_row(r: &Row<'_>) -> rusqlite::Result<InvestigationRow> {
    Ok(InvestigationRow {
        case_id:          r.get(0)?,
        attempt_id:       r.get(1)?,
        investigated_at:  r.get(2)?,
        terminal_state:   r.get(3)?,
        status:           r.get(4)?,
        confidence:       r.get(5)?,
        allegation:       r.get(6)?,
        outcome_tier:     r.get(7)?,
        fraud_type:       r.get(8)?,
        risk_tier:        r.get(9)?,
        route:            r.get(10)?,
        suspect_category: r.get(11)?,
        suspect_name:     r.get(12)?,
        total_ms:         r.get(13)?,
        payload:          r.get(14)?,
    })
}

impl CacheStore {
    /// Insert, or overwrite the row for the same case.
    pub fn upsert_investigation(&self, row: &InvestigationRow) -> TriageResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO investigation ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(case_id) DO UPDATE SET
                    attempt_id=excluded.attempt_id,
                    investigated_at=excluded.investigated_at,
                    terminal_state=excluded.terminal_state,
                    status=excluded.status,
                    confidence=excluded.confidence,
                    allegation=excluded.allegation,
                    outcome_tier=excluded.outcome_tier,
                    fraud_type=excluded.fraud_type,
                    risk_tier=excluded.risk_tier,
                    route=excluded.route,
                    suspect_category=excluded.suspect_category,
                    suspect_name=excluded.suspect_name,
                    total_ms=excluded.total_ms,
                    payload=excluded.payload"
            ),
            params![
                row.case_id,
                row.attempt_id,
                row.investigated_at,
                row.terminal_state,
                row.status,
                row.confidence,
                row.allegation,
                row.outcome_tier,
                row.fraud_type,
                row.risk_tier,
                row.route,
                row.suspect_category,
                row.suspect_name,
                row.total_ms,
                row.payload,
            ],
        )?;
        Ok(())
    }

    pub fn get_investigation(&self, case_id: &str) -> TriageResult<Option<InvestigationRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM investigation WHERE case_id = ?1"),
                params![case_id],
                read_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_investigation(&self, case_id: &str) -> TriageResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM investigation WHERE case_id = ?1", params![case_id])?;
        Ok(n > 0)
    }

    /// Drop every cached row. Returns how many went.
    pub fn clear_investigations(&self) -> TriageResult<usize> {
        Ok(self.conn.execute("DELETE FROM investigation", [])?)
    }

    pub fn investigation_count(&self) -> TriageResult<u64> {
        let n: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM investigation", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Most recent first.
    pub fn recent_investigations(&self, limit: usize) -> TriageResult<Vec<InvestigationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM investigation
             ORDER BY investigated_at DESC, case_id ASC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn investigation_stats(&self) -> TriageResult<CacheStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'fraud_likely' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'not_fraud' THEN 1 ELSE 0 END), 0),
                    AVG(confidence)
             FROM investigation",
            [],
            |r| {
                Ok(CacheStats {
                    total:          r.get(0)?,
                    fraud_likely:   r.get(1)?,
                    not_fraud:      r.get(2)?,
                    avg_confidence: r.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(case_id: &str) -> InvestigationRow {
        InvestigationRow {
            case_id:          case_id.into(),
            attempt_id:       "a-1".into(),
            investigated_at:  "2026-01-01T00:00:00Z".into(),
            terminal_state:   "success".into(),
            status:           Some("not_fraud".into()),
            confidence:       Some(0.2),
            allegation:       None,
            outcome_tier:     None,
            fraud_type:       None,
            risk_tier:        None,
            route:            None,
            suspect_category: None,
            suspect_name:     None,
            total_ms:         120,
            payload:          "{}".into(),
        }
    }

    #[test]
    fn negative_durations_are_rejected_on_read() {
        let store = CacheStore::in_memory().unwrap();
        store.migrate().unwrap();
        store.upsert_investigation(&row("C-1")).unwrap();
        store
            .conn
            .execute("UPDATE investigation SET total_ms = -5 WHERE case_id = 'C-1'", [])
            .unwrap();

        let err = store.get_investigation("C-1").unwrap_err();
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn durations_beyond_sqlite_range_are_rejected_on_write() {
        let store = CacheStore::in_memory().unwrap();
        store.migrate().unwrap();
        let mut huge = row("C-2");
        huge.total_ms = u64::MAX;
        assert!(store.upsert_investigation(&huge).is_err());
        assert_eq!(store.investigation_count().unwrap(), 0);
    }
}
