//! Named schedule registry
//!
//! Jobs register under a stable name with either a six-field cron
//! expression or a fixed interval; duplicate names fail fast so two code
//! paths cannot silently double-drive the same boundary. Cron jobs run on
//! `tokio-cron-scheduler`; interval jobs are plain tokio tasks. The
//! registry as a whole is a supervised worker.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use pv_types::CoreError;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Six-field cron expression, e.g. `0 */5 * * * *`
    Cron(String),
    /// Fixed interval from registry start
    Interval(Duration),
}

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct JobEntry {
    name: String,
    schedule: Schedule,
    run: JobFn,
}

/// Registry of named scheduled jobs.
pub struct ScheduleRegistry {
    jobs: Vec<JobEntry>,
    names: HashSet<String>,
    runtime: Mutex<Option<SchedulerRuntime>>,
    stop_tx: watch::Sender<bool>,
}

struct SchedulerRuntime {
    cron: Option<JobScheduler>,
    interval_tasks: Vec<JoinHandle<()>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            names: HashSet::new(),
            runtime: Mutex::new(None),
            stop_tx,
        }
    }

    /// Register a job. A duplicate name is a configuration error.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        schedule: Schedule,
        job: F,
    ) -> Result<(), CoreError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(CoreError::Internal {
                detail: format!("duplicate schedule registration: {name}"),
            });
        }
        let job = Arc::new(job);
        self.jobs.push(JobEntry {
            name,
            schedule,
            run: Arc::new(move || {
                let job = Arc::clone(&job);
                Box::pin(async move { job().await })
            }),
        });
        Ok(())
    }

    /// Start firing all registered jobs.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut runtime_slot = self.runtime.lock().await;
        if runtime_slot.is_some() {
            return Ok(());
        }
        self.stop_tx.send_replace(false);

        let needs_cron = self
            .jobs
            .iter()
            .any(|entry| matches!(entry.schedule, Schedule::Cron(_)));
        let mut cron = if needs_cron {
            Some(JobScheduler::new().await.map_err(scheduler_error)?)
        } else {
            None
        };
        let mut interval_tasks = Vec::new();

        for entry in &self.jobs {
            match &entry.schedule {
                Schedule::Cron(expression) => {
                    let scheduler = cron.as_ref().ok_or_else(|| CoreError::Internal {
                        detail: "cron scheduler missing".to_string(),
                    })?;
                    let run = Arc::clone(&entry.run);
                    let name = entry.name.clone();
                    let job = Job::new_async(expression.as_str(), move |_id, _scheduler| {
                        let run = Arc::clone(&run);
                        let name = name.clone();
                        Box::pin(async move {
                            tracing::debug!(job = %name, "cron job firing");
                            run().await;
                        })
                    })
                    .map_err(scheduler_error)?;
                    scheduler.add(job).await.map_err(scheduler_error)?;
                    info!(job = %entry.name, cron = %expression, "cron job registered");
                }
                Schedule::Interval(period) => {
                    let run = Arc::clone(&entry.run);
                    let name = entry.name.clone();
                    let period = *period;
                    let mut stop_rx = self.stop_tx.subscribe();
                    interval_tasks.push(tokio::spawn(async move {
                        let mut interval = tokio::time::interval(period);
                        interval.tick().await;
                        loop {
                            tokio::select! {
                                _ = interval.tick() => {
                                    tracing::debug!(job = %name, "interval job firing");
                                    run().await;
                                }
                                _ = stop_rx.changed() => {
                                    if *stop_rx.borrow() {
                                        break;
                                    }
                                }
                            }
                        }
                    }));
                    info!(job = %entry.name, period_ms = period.as_millis() as u64, "interval job registered");
                }
            }
        }

        if let Some(scheduler) = cron.as_mut() {
            scheduler.start().await.map_err(scheduler_error)?;
        }
        *runtime_slot = Some(SchedulerRuntime {
            cron,
            interval_tasks,
        });
        Ok(())
    }

    /// Stop firing; running job invocations finish on their own.
    pub async fn stop(&self) -> Result<(), CoreError> {
        self.stop_tx.send_replace(true);
        if let Some(mut runtime) = self.runtime.lock().await.take() {
            if let Some(mut scheduler) = runtime.cron.take() {
                if let Err(err) = scheduler.shutdown().await {
                    warn!(err = %err, "cron scheduler shutdown failed");
                }
            }
            for task in runtime.interval_tasks {
                let _ = task.await;
            }
        }
        Ok(())
    }

    /// Registered job names, for diagnostics.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }
}

impl Default for ScheduleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn scheduler_error(err: tokio_cron_scheduler::JobSchedulerError) -> CoreError {
    CoreError::Internal {
        detail: format!("scheduler error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn duplicate_names_fail_fast() {
        let mut registry = ScheduleRegistry::new();
        registry
            .register("candles:5min", Schedule::Cron("0 */5 * * * *".into()), || async {})
            .unwrap();
        let err = registry
            .register("candles:5min", Schedule::Interval(Duration::from_secs(1)), || async {})
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(registry.job_names(), vec!["candles:5min"]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_jobs_fire_until_stopped() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut registry = ScheduleRegistry::new();
        let counter = Arc::clone(&fired);
        registry
            .register("ticker", Schedule::Interval(Duration::from_secs(10)), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        registry.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(35)).await;
        tokio::task::yield_now().await;
        registry.stop().await.unwrap();
        assert!(fired.load(Ordering::SeqCst) >= 3);
    }
}
