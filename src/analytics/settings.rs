use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::analytics::path::{parse_patterns, AssetPolicy, ExclusionRules};
use crate::constants::{
    DEFAULT_RETENTION_DAYS, DEFAULT_SAMPLING_RATE, MAX_RETENTION_DAYS, ROLE_AUTHENTICATED,
};

/// Runtime-editable collection settings, persisted in the store's meta tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsSettings {
    /// Record one in N eligible views; each recorded view weighs N.
    pub sampling_rate: u32,
    pub retention_days: u32,
    pub exclude_admin_paths: bool,
    pub excluded_roles: Vec<String>,
    /// One glob per line.
    pub excluded_paths: String,
    pub asset_policy: AssetPolicy,
    /// Legacy switch; folded into `excluded_roles` by [`AnalyticsSettings::normalized`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_authenticated_users: Option<bool>,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_SAMPLING_RATE, DEFAULT_RETENTION_DAYS)
    }
}

impl AnalyticsSettings {
    pub fn with_defaults(sampling_rate: u32, retention_days: u32) -> Self {
        Self {
            sampling_rate,
            retention_days,
            exclude_admin_paths: true,
            excluded_roles: Vec::new(),
            excluded_paths: String::new(),
            asset_policy: AssetPolicy::AnyExtension,
            exclude_authenticated_users: None,
        }
    }

    /// Canonical form: rate at least 1, retention clamped to
    /// `1..=MAX_RETENTION_DAYS`, role ids trimmed and deduplicated, blank
    /// pattern lines dropped, legacy flag translated.
    pub fn normalized(mut self) -> Self {
        self.sampling_rate = self.sampling_rate.max(1);
        self.retention_days = self.retention_days.clamp(1, MAX_RETENTION_DAYS);

        let mut roles: BTreeSet<String> = self
            .excluded_roles
            .iter()
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect();
        if self.exclude_authenticated_users.take() == Some(true) {
            roles.insert(ROLE_AUTHENTICATED.to_string());
        }
        self.excluded_roles = roles.into_iter().collect();

        self.excluded_paths = self
            .excluded_paths
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sampling_rate < 1 {
            return Err("samplingRate must be at least 1".to_string());
        }
        if self.retention_days < 1 {
            return Err("retentionDays must be at least 1".to_string());
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(format!("retentionDays must be at most {MAX_RETENTION_DAYS}"));
        }
        for line in self.excluded_paths.lines().map(str::trim) {
            if line.is_empty() || line == "<front>" {
                continue;
            }
            if !line.starts_with('/') {
                return Err(format!("excluded path '{line}' must start with '/'"));
            }
        }
        Ok(())
    }

    pub fn pattern_lines(&self) -> impl Iterator<Item = &str> {
        self.excluded_paths
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }

    pub fn compile(&self) -> ExclusionRules {
        ExclusionRules {
            exclude_admin_paths: self.exclude_admin_paths,
            excluded_roles: self.excluded_roles.iter().cloned().collect(),
            patterns: parse_patterns(&self.excluded_paths),
            asset_policy: self.asset_policy,
        }
    }
}

/// Settings together with their compiled rules.
#[derive(Debug, Clone)]
pub struct ActiveSettings {
    pub settings: AnalyticsSettings,
    pub rules: ExclusionRules,
}

impl From<AnalyticsSettings> for ActiveSettings {
    fn from(settings: AnalyticsSettings) -> Self {
        let settings = settings.normalized();
        let rules = settings.compile();
        Self { settings, rules }
    }
}

/// Shared, atomically swapped view of the active settings. Readers clone the
/// inner `Arc` and never hold the lock across work.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<ActiveSettings>>>,
}

impl SettingsHandle {
    pub fn new(settings: AnalyticsSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings.into()))),
        }
    }

    pub fn current(&self) -> Arc<ActiveSettings> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, settings: AnalyticsSettings) -> Arc<ActiveSettings> {
        let next = Arc::new(ActiveSettings::from(settings));
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = next.clone();
        next
    }
}
