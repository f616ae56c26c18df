use ulid::Ulid;

use crate::model::*;

/// In-memory operating-hours set, kept sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct HoursState {
    hours: Vec<OperatingHours>,
}

impl HoursState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperatingHours> {
        self.hours.iter()
    }

    pub fn get(&self, id: &Ulid) -> Option<&OperatingHours> {
        self.hours.iter().find(|h| h.id == *id)
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.get(id).is_some()
    }

    /// Insert maintaining sort order by start. Equal starts keep insertion order.
    pub fn insert(&mut self, hours: OperatingHours) {
        let pos = self.hours.partition_point(|h| h.start <= hours.start);
        self.hours.insert(pos, hours);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<OperatingHours> {
        let pos = self.hours.iter().position(|h| h.id == *id)?;
        Some(self.hours.remove(pos))
    }

    /// Replace the window of an existing entry, re-sorting it.
    pub fn replace(&mut self, hours: OperatingHours) -> Option<OperatingHours> {
        let previous = self.remove(&hours.id)?;
        self.insert(hours);
        Some(previous)
    }

    /// Entries intersecting `window` under the closed-interval test, ascending by start.
    pub fn overlapping<'a>(&'a self, window: &impl TimeWindow) -> impl Iterator<Item = &'a OperatingHours> {
        // Everything at index >= right_bound starts after window.end → can't overlap.
        let right_bound = self.hours.partition_point(|h| h.start <= window.end());
        let window_start = window.start();
        self.hours[..right_bound]
            .iter()
            .filter(move |h| h.end >= window_start)
    }

    /// Index of the first entry with `start >= start_date`.
    fn split_at(&self, start_date: Ms) -> usize {
        self.hours.partition_point(|h| h.start < start_date)
    }

    /// Offset page relative to `start_date`, always returned ascending.
    ///
    /// Future pages walk forward from the first entry at or after `start_date`.
    /// Past pages walk backward from the last entry before it, so page 0 holds
    /// the `per_page` entries nearest to `start_date`.
    pub fn page(&self, start_date: Ms, page: usize, per_page: usize, future: bool) -> Vec<OperatingHours> {
        let split = self.split_at(start_date);
        let offset = page.saturating_mul(per_page);
        if future {
            self.hours[split..]
                .iter()
                .skip(offset)
                .take(per_page)
                .copied()
                .collect()
        } else {
            let mut result: Vec<OperatingHours> = self.hours[..split]
                .iter()
                .rev()
                .skip(offset)
                .take(per_page)
                .copied()
                .collect();
            result.reverse();
            result
        }
    }

    pub fn count(&self, start_date: Ms, future: bool) -> usize {
        let split = self.split_at(start_date);
        if future {
            self.hours.len() - split
        } else {
            split
        }
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::HoursCreated { id, start, end } => {
                self.insert(OperatingHours {
                    id: *id,
                    start: *start,
                    end: *end,
                });
            }
            Event::HoursUpdated { id, start, end } => {
                self.replace(OperatingHours {
                    id: *id,
                    start: *start,
                    end: *end,
                });
            }
            Event::HoursDeleted { id } => {
                self.remove(id);
            }
        }
    }

    /// Minimal event log that recreates this state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        self.hours
            .iter()
            .map(|h| Event::HoursCreated {
                id: h.id,
                start: h.start,
                end: h.end,
            })
            .collect()
    }
}
