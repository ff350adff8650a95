// libs/orchestrator-cell/src/services/worker.rs
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulerSettings;

use crate::error::OrchestratorError;
use crate::models::{OrchestratorStats, SweepKind, SweepReport};
use crate::services::sweeps::{StopSignal, SweepRunner};

/// The first local midnight strictly after `now`, as a UTC instant.
pub fn next_local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let fallback = now + ChronoDuration::days(1);
    let Some(tomorrow) = now.with_timezone(&offset).date_naive().succ_opt() else {
        return fallback;
    };
    let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
        return fallback;
    };
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(fallback)
}

/// Drives the reminder, no-show and daily maintenance sweeps on their own
/// cadences until `shutdown` is called. One loop per sweep.
pub struct SchedulerWorkerService {
    worker_id: String,
    runner: Arc<SweepRunner>,
    settings: SchedulerSettings,
    timezone: FixedOffset,
    stats: Arc<RwLock<OrchestratorStats>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SchedulerWorkerService {
    pub fn new(runner: Arc<SweepRunner>, settings: SchedulerSettings, timezone: FixedOffset) -> Self {
        let worker_id = format!("scheduler-{}", Uuid::new_v4().simple());
        let (shutdown, _) = watch::channel(false);

        Self {
            stats: Arc::new(RwLock::new(OrchestratorStats {
                worker_id: worker_id.clone(),
                ..OrchestratorStats::default()
            })),
            worker_id,
            runner,
            settings,
            timezone,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn stats(&self) -> OrchestratorStats {
        self.stats.read().await.clone()
    }

    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        {
            let mut stats = self.stats.write().await;
            if stats.running {
                return Err(OrchestratorError::AlreadyRunning);
            }
            stats.running = true;
            stats.started_at = Some(Utc::now());
        }

        info!(
            "Starting scheduler worker {} (reminders every {}s, no-shows every {}s, batch {})",
            self.worker_id,
            self.settings.reminder_interval_seconds,
            self.settings.no_show_interval_seconds,
            self.runner.batch_size()
        );

        let mut handles = Vec::new();

        let reminder_worker = self.clone_for_worker();
        let reminder_period = Duration::from_secs(self.settings.reminder_interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            reminder_worker.periodic_loop(SweepKind::Reminder, reminder_period).await
        }));

        let no_show_worker = self.clone_for_worker();
        let no_show_period = Duration::from_secs(self.settings.no_show_interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            no_show_worker.periodic_loop(SweepKind::NoShow, no_show_period).await
        }));

        let maintenance_worker = self.clone_for_worker();
        handles.push(tokio::spawn(async move { maintenance_worker.midnight_loop().await }));

        let outcome = futures::future::try_join_all(handles).await;
        self.stats.write().await.running = false;

        match outcome {
            Ok(results) => {
                results.into_iter().collect::<Result<Vec<_>, _>>()?;
                info!("Scheduler worker {} stopped", self.worker_id);
                Ok(())
            }
            Err(e) => {
                error!("Scheduler loop task failed: {}", e);
                Err(OrchestratorError::WorkerFailed(e.to_string()))
            }
        }
    }

    /// Asks every loop to stop at its next tick boundary. A row that is being
    /// processed is finished first.
    pub async fn shutdown(&self) {
        info!("Shutting down scheduler worker {}", self.worker_id);
        self.shutdown.send_replace(true);
    }

    /// Runs one sweep immediately with the given clock and records it.
    pub async fn run_now(&self, kind: SweepKind, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let stop = self.stop_signal();
        let result = self.runner.run(kind, now, &stop).await;
        self.record(&result).await;
        result
    }

    async fn periodic_loop(&self, kind: SweepKind, period: Duration) -> Result<(), OrchestratorError> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stop = self.stop_signal();

        loop {
            tokio::select! {
                _ = stop.raised() => break,
                _ = interval.tick() => {}
            }

            let result = self.runner.run(kind, Utc::now(), &stop).await;
            if let Err(e) = &result {
                error!("{} sweep failed: {}", kind, e);
            }
            self.record(&result).await;
        }

        debug!("{} loop exiting", kind);
        Ok(())
    }

    async fn midnight_loop(&self) -> Result<(), OrchestratorError> {
        let mut stop = self.stop_signal();

        loop {
            let now = Utc::now();
            let next = next_local_midnight(now, self.timezone);
            self.stats.write().await.next_maintenance_at = Some(next);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("Next maintenance run at {}", next);

            tokio::select! {
                _ = stop.raised() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let result = self.runner.maintenance(Utc::now()).await;
            if let Err(e) = &result {
                warn!("Daily maintenance failed: {}", e);
            }
            self.record(&result).await;
        }

        debug!("maintenance loop exiting");
        Ok(())
    }

    async fn record(&self, result: &Result<SweepReport, OrchestratorError>) {
        let mut stats = self.stats.write().await;
        match result {
            Ok(report) => stats.record(report),
            Err(_) => stats.record_error(),
        }
    }

    fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.shutdown.subscribe())
    }

    fn clone_for_worker(&self) -> Self {
        Self {
            worker_id: self.worker_id.clone(),
            runner: Arc::clone(&self.runner),
            settings: self.settings.clone(),
            timezone: self.timezone,
            stats: Arc::clone(&self.stats),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}
