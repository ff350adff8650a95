use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    Reminder,
    NoShow,
    Maintenance,
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepKind::Reminder => write!(f, "reminder"),
            SweepKind::NoShow => write!(f, "no_show"),
            SweepKind::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Result of one pass over a batch of store rows.
///
/// `processed` counts committed commands (a reminder sweep can commit two per
/// row), `skipped` counts rows or reminder kinds with nothing to do, and
/// `failed` counts per-row errors that were logged and passed over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Shutdown was requested before every scanned row was visited.
    pub interrupted: bool,
}

impl SweepReport {
    pub fn begin(kind: SweepKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            started_at: now,
            finished_at: now,
            scanned: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            interrupted: false,
        }
    }

    /// Stamps the end of the sweep on the same clock the sweep was started with.
    pub fn finish(mut self, elapsed: std::time::Duration) -> Self {
        self.finished_at = self.started_at + Duration::from_std(elapsed).unwrap_or_default();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepTotals {
    pub sweeps: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Sweeps that could not scan at all (store unavailable, hook failure).
    pub errors: u64,
}

/// What `GET /scheduler/stats` reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorStats {
    pub worker_id: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_reminder_sweep: Option<SweepReport>,
    pub last_no_show_sweep: Option<SweepReport>,
    pub last_maintenance: Option<SweepReport>,
    pub next_maintenance_at: Option<DateTime<Utc>>,
    pub totals: SweepTotals,
}

impl OrchestratorStats {
    pub fn record(&mut self, report: &SweepReport) {
        self.totals.sweeps += 1;
        self.totals.processed += report.processed as u64;
        self.totals.skipped += report.skipped as u64;
        self.totals.failed += report.failed as u64;

        let slot = match report.kind {
            SweepKind::Reminder => &mut self.last_reminder_sweep,
            SweepKind::NoShow => &mut self.last_no_show_sweep,
            SweepKind::Maintenance => &mut self.last_maintenance,
        };
        *slot = Some(report.clone());
    }

    pub fn record_error(&mut self) {
        self.totals.errors += 1;
    }

    pub fn last(&self, kind: SweepKind) -> Option<&SweepReport> {
        match kind {
            SweepKind::Reminder => self.last_reminder_sweep.as_ref(),
            SweepKind::NoShow => self.last_no_show_sweep.as_ref(),
            SweepKind::Maintenance => self.last_maintenance.as_ref(),
        }
    }
}
