use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get(&self, id: Ulid) -> Result<OperatingHours, EngineError> {
        let guard = self.state.read().await;
        guard.get(&id).copied().ok_or(EngineError::NotFound(id))
    }

    /// All hours intersecting `window`, ascending by start.
    pub async fn schedule(&self, window: &impl TimeWindow) -> Vec<OperatingHours> {
        let guard = self.state.read().await;
        guard.overlapping(window).copied().collect()
    }

    /// Page `page` (zero-based) of hours starting at/after (`future`) or
    /// before `start_date`, always in ascending order.
    pub async fn paginated_schedule(
        &self,
        start_date: Ms,
        page: usize,
        per_page: usize,
        future: bool,
    ) -> Vec<OperatingHours> {
        let guard = self.state.read().await;
        guard.page(start_date, page, per_page, future)
    }

    pub async fn count(&self, start_date: Ms, future: bool) -> usize {
        let guard = self.state.read().await;
        guard.count(start_date, future)
    }
}
