pub mod retention_prune;
pub mod view_aggregation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::analytics::clock::Clock;
use crate::analytics::settings::SettingsHandle;
use crate::config::WorkerConfig;
use crate::store::Store;
use crate::workers::view_aggregation::AggregationConfig;

/// Timeout for individual worker invocations.
const WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 所有 worker 的枚举，消除字符串匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    ViewAggregation,
    RetentionPrune,
}

impl WorkerName {
    pub const ALL: [WorkerName; 2] = [Self::ViewAggregation, Self::RetentionPrune];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewAggregation => "view_aggregation",
            Self::RetentionPrune => "retention_prune",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
}

pub struct WorkerManager {
    store: Arc<Store>,
    settings: SettingsHandle,
    clock: Arc<dyn Clock>,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
    aggregation: AggregationConfig,
}

impl WorkerManager {
    pub fn new(
        store: Arc<Store>,
        settings: SettingsHandle,
        clock: Arc<dyn Clock>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
        aggregation: AggregationConfig,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
            shutdown_rx,
            config: config.clone(),
            aggregation,
        }
    }

    /// Single source of truth for the planned jobs and their cron schedules.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            JobSpec {
                name: WorkerName::ViewAggregation,
                cron: self.config.aggregation_cron.clone(),
            },
            JobSpec {
                name: WorkerName::RetentionPrune,
                cron: self.config.retention_cron.clone(),
            },
        ]
    }

    /// Start the worker scheduler. Returns an error if the scheduler cannot be created or started.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.config.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!("Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) {
        for spec in self.planned_jobs() {
            let store = self.store.clone();
            let clock = self.clock.clone();
            let name_str = spec.name.as_str();

            match spec.name {
                WorkerName::ViewAggregation => {
                    let cfg = self.aggregation.clone();
                    add_job(scheduler, &spec.cron, name_str, move || {
                        view_aggregation::run(store.clone(), clock.clone(), cfg.clone())
                    })
                    .await;
                }
                WorkerName::RetentionPrune => {
                    let settings = self.settings.clone();
                    add_job(scheduler, &spec.cron, name_str, move || {
                        retention_prune::run(store.clone(), settings.clone(), clock.clone())
                    })
                    .await;
                }
            }
            tracing::info!(name = name_str, cron = %spec.cron, "Registered worker");
        }
    }
}

/// Overlap flag holder. Clears the flag on drop, so a panicking run does not
/// block later invocations.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Add a job to the scheduler with an overlap guard and timeout wrapper.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let Some(guard) = RunningGuard::acquire(&running) else {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        };

        let fut = run();
        Box::pin(async move {
            let _guard = guard;
            if tokio::time::timeout(WORKER_TIMEOUT, fut).await.is_err() {
                tracing::error!(
                    worker = name,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker timed out"
                );
            }
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}
