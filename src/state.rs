use crate::types::{DeskState, Preset};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::{RwLock, RwLockReadGuard};

/// Everything guarded by the state lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeskRecord {
    /// Desk status
    pub desk: DeskState,
    /// Presets keyed by name
    pub presets: BTreeMap<String, Preset>,
}

/// The single source of truth for desk status and presets
///
/// One lock covers both, so a reader never sees half of an update. Clones
/// share the same record. Outside the crate the record is read-only: only the
/// control loop and the preset store mutate it, each change finishing before
/// the guard is released.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<DeskRecord>>,
}

impl SharedState {
    /// Create the record
    pub fn new(desk: DeskState, presets: impl IntoIterator<Item = Preset>) -> Self {
        let presets = presets
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(DeskRecord { desk, presets })),
        }
    }

    /// Copy of the current desk status
    pub async fn snapshot(&self) -> DeskState {
        self.inner.read().await.desk.clone()
    }

    /// Shared read access
    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, DeskRecord> {
        self.inner.read().await
    }

    /// Apply a mutation atomically and return its result
    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut DeskRecord) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(DeskState::default(), [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionStatus;

    #[tokio::test]
    async fn test_update_and_snapshot() {
        let state = SharedState::new(DeskState::new("test"), [Preset::new("Sitting", 680)]);

        let generation = state
            .update(|record| {
                record.desk.connection_status = ConnectionStatus::Connected;
                record.desk.move_generation += 1;
                record.desk.move_generation
            })
            .await;
        assert_eq!(generation, 1);

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.name, "test");
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert_eq!(state.read().await.presets["Sitting"].height_mm, 680);
    }

    #[tokio::test]
    async fn test_clones_share_record() {
        let state = SharedState::default();
        let other = state.clone();
        other
            .update(|record| record.desk.current_height_mm = Some(700))
            .await;
        assert_eq!(state.snapshot().await.current_height_mm, Some(700));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let state = SharedState::default();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.update(|record| record.desk.move_generation += 1).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(state.snapshot().await.move_generation, 50);
    }
}
