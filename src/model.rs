use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Anything with a start and an end instant.
///
/// Overlap is the closed-interval test: windows that touch at an endpoint
/// intersect.
pub trait TimeWindow {
    fn start(&self) -> Ms;
    fn end(&self) -> Ms;

    fn overlaps(&self, other: &impl TimeWindow) -> bool {
        self.start() <= other.end() && self.end() >= other.start()
    }

    fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start(),
            end: self.end(),
        }
    }
}

/// Ephemeral window used as a query parameter or as a candidate for new hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl TimeWindow for TimeRange {
    fn start(&self) -> Ms {
        self.start
    }

    fn end(&self) -> Ms {
        self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A persisted window during which the facility is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl OperatingHours {
    pub fn new(id: Ulid, range: TimeRange) -> Self {
        Self {
            id,
            start: range.start,
            end: range.end,
        }
    }
}

impl TimeWindow for OperatingHours {
    fn start(&self) -> Ms {
        self.start
    }

    fn end(&self) -> Ms {
        self.end
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HoursCreated { id: Ulid, start: Ms, end: Ms },
    HoursUpdated { id: Ulid, start: Ms, end: Ms },
    HoursDeleted { id: Ulid },
}

impl Event {
    pub fn id(&self) -> Ulid {
        match self {
            Event::HoursCreated { id, .. }
            | Event::HoursUpdated { id, .. }
            | Event::HoursDeleted { id } => *id,
        }
    }
}
