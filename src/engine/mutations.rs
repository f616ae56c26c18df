use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::permission::{self, Subject};

use super::conflict::{check_no_overlap, validate_range};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Open the facility for `range`. The new entry's id is assigned here.
    pub async fn create(&self, subject: &Subject, range: TimeRange) -> Result<OperatingHours, EngineError> {
        self.enforce(subject, permission::CREATE_ACTION, permission::HOURS_RESOURCE)?;
        validate_range(&range)?;

        // Held from the overlap scan through the write.
        let guard = self.state.clone().write_owned().await;
        if guard.len() >= MAX_OPERATING_HOURS {
            return Err(EngineError::LimitExceeded("too many operating hours"));
        }
        check_no_overlap(&guard, &range, None)?;

        let hours = OperatingHours::new(Ulid::new(), range);
        let event = Event::HoursCreated {
            id: hours.id,
            start: hours.start,
            end: hours.end,
        };
        self.persist_and_apply(guard, event).await?;
        tracing::info!("{subject} created operating hours {} {range}", hours.id);
        Ok(hours)
    }

    /// Move an existing entry to `hours.start..hours.end`.
    ///
    /// The entry may overlap its own previous window. Overlap with any other
    /// entry is checked before existence, so a missing id with a conflicting
    /// range reports `Overlap` rather than `NotFound`.
    pub async fn update(&self, subject: &Subject, hours: OperatingHours) -> Result<OperatingHours, EngineError> {
        self.enforce(subject, permission::UPDATE_ACTION, &permission::hours_resource(hours.id))?;
        let range = hours.range();
        validate_range(&range)?;

        let guard = self.state.clone().write_owned().await;
        check_no_overlap(&guard, &range, Some(hours.id))?;
        if !guard.contains(&hours.id) {
            return Err(EngineError::NotFound(hours.id));
        }

        let event = Event::HoursUpdated {
            id: hours.id,
            start: hours.start,
            end: hours.end,
        };
        self.persist_and_apply(guard, event).await?;
        tracing::info!("{subject} moved operating hours {} to {range}", hours.id);
        Ok(hours)
    }

    pub async fn delete(&self, subject: &Subject, id: Ulid) -> Result<(), EngineError> {
        self.enforce(subject, permission::DELETE_ACTION, &permission::hours_resource(id))?;

        let guard = self.state.clone().write_owned().await;
        if !guard.contains(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::HoursDeleted { id };
        self.persist_and_apply(guard, event).await?;
        tracing::info!("{subject} deleted operating hours {id}");
        Ok(())
    }

    pub async fn delete_hours(&self, subject: &Subject, hours: &OperatingHours) -> Result<(), EngineError> {
        self.delete(subject, hours.id).await
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // The read lock keeps writers out until the compacted log is swapped in.
        let guard = self.state.read().await;
        let events = guard.snapshot_events();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
