// libs/orchestrator-cell/src/services/sweeps.rs
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use appointment_cell::models::{Appointment, AppointmentError, EntityKind, ReminderKind, ReminderOutcome};
use appointment_cell::services::engine::AppointmentLifecycleEngine;
use appointment_cell::services::store::ScanPosition;

use crate::error::OrchestratorError;
use crate::models::{SweepKind, SweepReport};

/// Cooperative stop flag. Sweeps look at it between rows, never inside one.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self(receiver)
    }

    /// A signal nobody can raise.
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self(receiver)
    }

    pub fn is_raised(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the flag is set. Pends forever if the sender is gone.
    pub async fn raised(&mut self) {
        if self.0.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Extension point for the daily maintenance run.
#[async_trait]
pub trait MaintenanceHook: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the number of records touched.
    async fn run(&self, now: DateTime<Utc>) -> Result<usize, OrchestratorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMaintenance;

#[async_trait]
impl MaintenanceHook for NoopMaintenance {
    fn name(&self) -> &str {
        "noop"
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<usize, OrchestratorError> {
        Ok(0)
    }
}

enum RowResult {
    Processed,
    Skipped,
    Failed,
}

/// Resume point of one sweep kind. A full batch moves it to the last row read;
/// a short batch means the end was reached and the next sweep starts over.
/// An interrupted sweep leaves it where it was.
#[derive(Debug, Default)]
struct SweepCursor(Mutex<Option<ScanPosition>>);

impl SweepCursor {
    async fn position(&self) -> Option<ScanPosition> {
        *self.0.lock().await
    }

    fn following(rows: &[Appointment], batch_size: usize) -> Option<ScanPosition> {
        match rows.last() {
            Some(last) if rows.len() >= batch_size => Some(ScanPosition::of(last)),
            _ => None,
        }
    }

    async fn set(&self, position: Option<ScanPosition>) {
        *self.0.lock().await = position;
    }
}

/// Runs one pass of each periodic job against the lifecycle engine. The only
/// state kept between passes is where each scan resumes; every row is re-read
/// by the engine command itself.
pub struct SweepRunner {
    engine: Arc<AppointmentLifecycleEngine>,
    maintenance: Arc<dyn MaintenanceHook>,
    batch_size: usize,
    reminder_cursor: SweepCursor,
    no_show_cursor: SweepCursor,
}

impl SweepRunner {
    pub fn new(engine: Arc<AppointmentLifecycleEngine>, batch_size: usize) -> Self {
        Self {
            engine,
            maintenance: Arc::new(NoopMaintenance),
            batch_size: batch_size.max(1),
            reminder_cursor: SweepCursor::default(),
            no_show_cursor: SweepCursor::default(),
        }
    }

    pub fn with_maintenance(mut self, hook: Arc<dyn MaintenanceHook>) -> Self {
        self.maintenance = hook;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn engine(&self) -> &Arc<AppointmentLifecycleEngine> {
        &self.engine
    }

    pub async fn run(
        &self,
        kind: SweepKind,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> Result<SweepReport, OrchestratorError> {
        match kind {
            SweepKind::Reminder => self.reminder_sweep(now, stop).await,
            SweepKind::NoShow => self.no_show_sweep(now, stop).await,
            SweepKind::Maintenance => self.maintenance(now).await,
        }
    }

    /// Sends every reminder that is due at `now`. Safe to repeat: the engine
    /// refuses a second emission of the same kind.
    #[instrument(skip(self, stop), fields(batch_size = self.batch_size))]
    pub async fn reminder_sweep(
        &self,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> Result<SweepReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = SweepReport::begin(SweepKind::Reminder, now);

        let after = self.reminder_cursor.position().await;
        let mut rows = self.engine.due_reminders(now, after, self.batch_size).await?;
        if rows.is_empty() && after.is_some() {
            rows = self.engine.due_reminders(now, None, self.batch_size).await?;
        }
        let resume_at = SweepCursor::following(&rows, self.batch_size);
        report.scanned = rows.len();
        debug!("Reminder sweep found {} candidate appointments", rows.len());

        for row in rows {
            if stop.is_raised() {
                report.interrupted = true;
                break;
            }

            let span = info_span!("reminder_row", appointment_id = %row.id);
            for kind in ReminderKind::ALL {
                let result = self
                    .engine
                    .send_reminder(row.id, kind, now)
                    .instrument(span.clone())
                    .await;

                match classify_reminder(result) {
                    RowResult::Processed => report.processed += 1,
                    RowResult::Skipped => report.skipped += 1,
                    RowResult::Failed => {
                        error!("Reminder {:?} for appointment {} failed", kind, row.id);
                        report.failed += 1;
                    }
                }
            }
        }

        if !report.interrupted {
            self.reminder_cursor.set(resume_at).await;
        }

        let report = report.finish(started.elapsed());
        info!(
            "Reminder sweep done: scanned={}, sent={}, skipped={}, failed={}",
            report.scanned, report.processed, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Cancels approved appointments whose patient never checked in within the grace period.
    #[instrument(skip(self, stop), fields(batch_size = self.batch_size))]
    pub async fn no_show_sweep(
        &self,
        now: DateTime<Utc>,
        stop: &StopSignal,
    ) -> Result<SweepReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = SweepReport::begin(SweepKind::NoShow, now);

        // Rows that keep failing stay due; resuming after the last row read lets
        // the rows behind them through.
        let after = self.no_show_cursor.position().await;
        let mut rows = self.engine.due_no_shows(now, after, self.batch_size).await?;
        if rows.is_empty() && after.is_some() {
            rows = self.engine.due_no_shows(now, None, self.batch_size).await?;
        }
        let resume_at = SweepCursor::following(&rows, self.batch_size);
        report.scanned = rows.len();
        debug!("No-show sweep found {} candidate appointments", rows.len());

        for row in rows {
            if stop.is_raised() {
                report.interrupted = true;
                break;
            }

            let result = self
                .engine
                .expire_no_show(row.id, now)
                .instrument(info_span!("no_show_row", appointment_id = %row.id))
                .await;

            match result {
                Ok(_) => report.processed += 1,
                Err(AppointmentError::IllegalTransition { from, .. }) => {
                    debug!("Appointment {} no longer eligible ({})", row.id, from);
                    report.skipped += 1;
                }
                Err(AppointmentError::ConcurrentModification) => {
                    warn!("Appointment {} changed during no-show sweep; next sweep re-checks", row.id);
                    report.skipped += 1;
                }
                Err(AppointmentError::NotFound(EntityKind::Appointment)) => report.skipped += 1,
                Err(e) => {
                    error!("No-show expiry for appointment {} failed: {}", row.id, e);
                    report.failed += 1;
                }
            }
        }

        if !report.interrupted {
            self.no_show_cursor.set(resume_at).await;
        }

        let report = report.finish(started.elapsed());
        info!(
            "No-show sweep done: scanned={}, cancelled={}, skipped={}, failed={}",
            report.scanned, report.processed, report.skipped, report.failed
        );
        Ok(report)
    }

    #[instrument(skip(self), fields(hook = self.maintenance.name()))]
    pub async fn maintenance(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let started = Instant::now();
        let mut report = SweepReport::begin(SweepKind::Maintenance, now);

        report.processed = self.maintenance.run(now).await?;

        let report = report.finish(started.elapsed());
        info!("Daily maintenance '{}' touched {} records", self.maintenance.name(), report.processed);
        Ok(report)
    }
}

fn classify_reminder(result: Result<ReminderOutcome, AppointmentError>) -> RowResult {
    match result {
        Ok(ReminderOutcome::Sent) => RowResult::Processed,
        Ok(ReminderOutcome::AlreadySent) | Ok(ReminderOutcome::NotDue) => RowResult::Skipped,
        // Another sweep or a user command won the row; the flag settles it next time.
        Err(AppointmentError::ConcurrentModification) => {
            warn!("Lost a race while recording a reminder");
            RowResult::Skipped
        }
        Err(AppointmentError::NotFound(EntityKind::Appointment)) => RowResult::Skipped,
        Err(e) => {
            warn!("Reminder command refused: {}", e);
            RowResult::Failed
        }
    }
}
