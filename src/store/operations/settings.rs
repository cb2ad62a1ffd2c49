use crate::analytics::settings::AnalyticsSettings;
use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    /// Stored settings in canonical form, or `defaults` when none were saved.
    pub fn load_analytics_settings(
        &self,
        defaults: &AnalyticsSettings,
    ) -> Result<AnalyticsSettings, StoreError> {
        match self.meta.get(keys::settings_key().as_bytes())? {
            Some(raw) => match serde_json::from_slice::<AnalyticsSettings>(&raw) {
                Ok(parsed) => Ok(parsed.normalized()),
                Err(error) => {
                    tracing::error!(
                        error = %error,
                        "Failed to deserialize analytics settings"
                    );
                    Err(StoreError::Serialization(error))
                }
            },
            None => Ok(defaults.clone().normalized()),
        }
    }

    pub fn save_analytics_settings(
        &self,
        settings: &AnalyticsSettings,
    ) -> Result<AnalyticsSettings, StoreError> {
        settings.validate().map_err(StoreError::Validation)?;
        let normalized = settings.clone().normalized();
        self.meta.insert(
            keys::settings_key().as_bytes(),
            Self::serialize(&normalized)?,
        )?;
        Ok(normalized)
    }
}
