use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::analytics::clock::Clock;
use crate::analytics::sampling::{self, SamplingDecision};
use crate::analytics::settings::SettingsHandle;
use crate::config::Config;
use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    config: Arc<Config>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    rng: Arc<Mutex<StdRng>>,
    started_at: Instant,
}

impl AppState {
    /// Loads the persisted analytics settings (or the configured defaults)
    /// into the shared snapshot used by the request path.
    pub fn new(
        store: Arc<Store>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let settings = store.load_analytics_settings(&config.analytics.default_settings())?;

        Ok(Self {
            store,
            config: Arc::new(config.clone()),
            settings: SettingsHandle::new(settings),
            clock,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            started_at: Instant::now(),
        })
    }

    /// Replaces the sampling RNG with a seeded one.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_arc(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn clock_arc(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn sample(&self, rate: u32) -> SamplingDecision {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        sampling::decide(rate, &mut *rng)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
