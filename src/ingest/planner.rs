//! Chunk planner: split a backfill range into upstream-legal sub-ranges.

use chrono::Duration;

use super::structs::TimeRange;

/// Lazy, ascending sequence of contiguous sub-ranges covering a backfill
/// range with no gaps and no overlaps, each at most `max_span` long.
///
/// Oldest chunks come first so a mid-backfill failure still advances the
/// dataset's maximum-persisted-timestamp cursor as far as possible. The plan
/// never materializes, so arbitrarily long backfills stay O(1) in memory.
pub struct ChunkPlan {
    cursor: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
    max_span: Duration,
}

/// Plan chunks for `range`. `max_span` must be positive; dataset validation
/// enforces this before any plan is built.
pub fn plan(range: TimeRange, max_span: Duration) -> ChunkPlan {
    assert!(max_span > Duration::zero(), "chunk span must be positive");
    ChunkPlan {
        cursor: range.start,
        end: range.end,
        max_span,
    }
}

impl Iterator for ChunkPlan {
    type Item = TimeRange;

    fn next(&mut self) -> Option<TimeRange> {
        if self.cursor >= self.end {
            return None;
        }
        let chunk_end = std::cmp::min(self.cursor + self.max_span, self.end);
        let chunk = TimeRange::new(self.cursor, chunk_end);
        self.cursor = chunk_end;
        Some(chunk)
    }
}
