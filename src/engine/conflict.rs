use ulid::Ulid;

use crate::model::*;

use super::store::HoursState;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.is_empty() {
        return Err(EngineError::InvalidRange(*range));
    }
    if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Reject `range` if it intersects any stored hours other than `exclude`.
pub(crate) fn check_no_overlap(
    state: &HoursState,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflict = state
        .overlapping(range)
        .find(|h| Some(h.id) != exclude);
    if let Some(existing) = conflict {
        tracing::warn!(
            "rejected {range}: overlaps operating hours {} [{}, {}]",
            existing.id,
            existing.start,
            existing.end
        );
        metrics::counter!(crate::observability::OVERLAP_REJECTIONS_TOTAL).increment(1);
        return Err(EngineError::Overlap(*range));
    }
    Ok(())
}
