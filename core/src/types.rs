//! Shared primitive types used across the investigation engine.

/// A ticket identifier as issued by the case source.
pub type CaseId = String;

/// A unique identifier for one investigation attempt.
pub type AttemptId = String;

/// Elapsed wall-clock time in milliseconds.
pub type Millis = u64;

/// One row returned by the evidence store: column name -> value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Milliseconds elapsed since `start`, saturating at `u64::MAX`.
pub fn elapsed_ms(start: std::time::Instant) -> Millis {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
