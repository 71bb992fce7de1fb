use crate::{
    error::{DeskError, Result, ValidationError},
    state::SharedState,
    types::{HeightBounds, Preset},
};
use std::collections::BTreeMap;
use tracing::info;

/// Presets every fresh store starts with
pub const DEFAULT_PRESETS: [(&str, i32); 2] = [("Standing", 1050), ("Sitting", 680)];

/// CRUD over named height presets
///
/// Presets live in the same record as the desk status. Heights outside the
/// configured bounds are rejected, never clamped.
#[derive(Debug, Clone)]
pub struct PresetStore {
    state: SharedState,
    bounds: HeightBounds,
}

impl PresetStore {
    /// Store backed by `state`
    #[must_use]
    pub const fn new(state: SharedState, bounds: HeightBounds) -> Self {
        Self { state, bounds }
    }

    /// Seed [`DEFAULT_PRESETS`] that are in bounds and not yet present
    pub async fn with_defaults(self) -> Self {
        let bounds = self.bounds;
        self.state
            .update(|record| {
                for (name, height_mm) in DEFAULT_PRESETS {
                    if bounds.contains(height_mm) {
                        record
                            .presets
                            .entry(name.to_string())
                            .or_insert_with(|| Preset::new(name, height_mm));
                    }
                }
            })
            .await;
        self
    }

    /// All presets by name
    pub async fn list(&self) -> BTreeMap<String, Preset> {
        self.state.read().await.presets.clone()
    }

    /// Look up one preset
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::PresetNotFound`] if no preset has that name.
    pub async fn get(&self, name: &str) -> Result<Preset> {
        self.state
            .read()
            .await
            .presets
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    /// Add a preset
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DuplicateName`] if the name is taken,
    /// [`ValidationError::EmptyName`] for a blank name, or
    /// [`ValidationError::HeightOutOfBounds`].
    pub async fn create(&self, name: &str, height_mm: i32) -> Result<Preset> {
        let name = validate_name(name)?;
        self.bounds.validate(height_mm)?;

        let preset = self
            .state
            .update(|record| {
                if record.presets.contains_key(&name) {
                    return Err(ValidationError::DuplicateName { name: name.clone() });
                }
                let preset = Preset::new(name.clone(), height_mm);
                record.presets.insert(name.clone(), preset.clone());
                Ok(preset)
            })
            .await?;

        info!("Created preset '{}' at {}mm", preset.name, preset.height_mm);
        Ok(preset)
    }

    /// Change the height of an existing preset
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::PresetNotFound`] or
    /// [`ValidationError::HeightOutOfBounds`].
    pub async fn update(&self, name: &str, height_mm: i32) -> Result<Preset> {
        self.bounds.validate(height_mm)?;

        let preset = self
            .state
            .update(|record| {
                record.presets.get_mut(name).map(|preset| {
                    preset.height_mm = height_mm;
                    preset.clone()
                })
            })
            .await
            .ok_or_else(|| not_found(name))?;

        info!("Updated preset '{}' to {}mm", preset.name, preset.height_mm);
        Ok(preset)
    }

    /// Remove a preset
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::PresetNotFound`] if no preset has that name.
    pub async fn delete(&self, name: &str) -> Result<Preset> {
        let removed = self
            .state
            .update(|record| {
                let removed = record.presets.remove(name);
                if removed.is_some() && record.desk.active_preset.as_deref() == Some(name) {
                    record.desk.active_preset = None;
                }
                removed
            })
            .await
            .ok_or_else(|| not_found(name))?;

        info!("Deleted preset '{}'", removed.name);
        Ok(removed)
    }
}

fn validate_name(name: &str) -> std::result::Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyName)
    } else {
        Ok(trimmed.to_string())
    }
}

fn not_found(name: &str) -> DeskError {
    DeskError::PresetNotFound {
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PresetStore {
        PresetStore::new(SharedState::default(), HeightBounds::default())
    }

    #[tokio::test]
    async fn test_defaults() {
        let store = store().with_defaults().await;
        let presets = store.list().await;
        assert_eq!(presets.len(), 2);
        assert_eq!(presets["Standing"].height_mm, 1050);
        assert_eq!(presets["Sitting"].height_mm, 680);
    }

    #[tokio::test]
    async fn test_defaults_respect_bounds() {
        let store = PresetStore::new(SharedState::default(), HeightBounds::new(700, 1400))
            .with_defaults()
            .await;
        let presets = store.list().await;
        assert!(presets.contains_key("Standing"));
        assert!(!presets.contains_key("Sitting"));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store();
        let preset = store.create("Reading", 1150).await.unwrap();
        assert_eq!(preset, Preset::new("Reading", 1150));
        assert_eq!(store.get("Reading").await.unwrap().height_mm, 1150);
    }

    #[tokio::test]
    async fn test_duplicate_create_keeps_existing_height() {
        let store = store();
        store.create("Standing", 1050).await.unwrap();

        let err = store.create("Standing", 1200).await.unwrap_err();
        assert!(matches!(
            err,
            DeskError::Validation(ValidationError::DuplicateName { ref name }) if name == "Standing"
        ));
        assert_eq!(store.get("Standing").await.unwrap().height_mm, 1050);
    }

    #[tokio::test]
    async fn test_out_of_bounds_is_rejected_not_clamped() {
        let store = store();
        let err = store.create("Too high", 1500).await.unwrap_err();
        assert!(err.is_validation_error());
        assert!(store.list().await.is_empty());

        store.create("Desk", 900).await.unwrap();
        let err = store.update("Desk", 500).await.unwrap_err();
        assert!(err.is_validation_error());
        assert_eq!(store.get("Desk").await.unwrap().height_mm, 900);
    }

    #[tokio::test]
    async fn test_empty_name() {
        let err = store().create("   ", 900).await.unwrap_err();
        assert!(matches!(err, DeskError::Validation(ValidationError::EmptyName)));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = store();
        assert!(store.update("Nope", 900).await.unwrap_err().is_not_found());
        assert!(store.delete("Nope").await.unwrap_err().is_not_found());
        assert!(store.get("Nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_then_delete() {
        let store = store().with_defaults().await;
        let updated = store.update("Sitting", 700).await.unwrap();
        assert_eq!(updated.height_mm, 700);

        let removed = store.delete("Sitting").await.unwrap();
        assert_eq!(removed.height_mm, 700);
        assert!(!store.list().await.contains_key("Sitting"));
    }

    #[tokio::test]
    async fn test_delete_clears_active_preset() {
        let state = SharedState::default();
        let store = PresetStore::new(state.clone(), HeightBounds::default())
            .with_defaults()
            .await;
        state
            .update(|record| record.desk.active_preset = Some("Standing".to_string()))
            .await;

        store.delete("Standing").await.unwrap();
        assert!(state.snapshot().await.active_preset.is_none());
    }
}
