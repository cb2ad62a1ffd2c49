use crate::analytics::settings::AnalyticsSettings;
use crate::store::keys::{self, SCHEMA_VERSION_KEY};
use crate::store::{Store, StoreError};

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_normalize_settings", m002_normalize_settings),
    ]
}

/// 执行所有未应用的数据库迁移。
///
/// - 每个迁移必须幂等：进程可能在迁移完成后、写入版本号前崩溃。
/// - 版本号在每个迁移成功后立即持久化。
/// - 仅向前，`set_version` 拒绝降级。
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;

    for (index, (name, func)) in migrations().iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.meta.get(SCHEMA_VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::CorruptValue {
                tree: "meta",
                key: SCHEMA_VERSION_KEY.to_string(),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {} to {}", current, version),
        });
    }

    store
        .meta
        .insert(SCHEMA_VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

/// Rewrites stored settings in canonical form, folding the legacy
/// `excludeAuthenticatedUsers` switch into `excludedRoles`.
fn m002_normalize_settings(store: &Store) -> Result<(), StoreError> {
    let key = keys::settings_key();
    let Some(raw) = store.meta.get(key.as_bytes())? else {
        return Ok(());
    };
    let settings: AnalyticsSettings = match Store::deserialize(&raw) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(error = %error, "Stored analytics settings unreadable, leaving as is");
            return Ok(());
        }
    };
    store
        .meta
        .insert(key.as_bytes(), Store::serialize(&settings.normalized())?)?;
    Ok(())
}
