//! Cron-driven runner for the reconciliation sweeps.
//!
//! Each sweep gets its own loop that sleeps until the next cron fire, then spawns the
//! run. A sweep that is still running when its next fire comes around is skipped.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use cron::Schedule;
use strum::Display;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    application::{clock::Clock, use_cases::reconciliation::ReconciliationUseCases},
    infra::error::InfraError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SweepKind {
    Daily,
    Trial,
    Analytics,
}

struct Job {
    kind: SweepKind,
    schedule: Schedule,
    running: AtomicBool,
}

/// Clears the job's running flag when the run ends, even if it panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    reconciliation: Arc<ReconciliationUseCases>,
    clock: Arc<dyn Clock>,
    jobs: Vec<Job>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn parse_schedule(name: &'static str, expression: &str) -> Result<Schedule, InfraError> {
    Schedule::from_str(expression).map_err(|source| InfraError::InvalidSchedule {
        name,
        expression: expression.to_string(),
        source,
    })
}

impl Scheduler {
    /// Cron expressions use six fields (seconds first) and are evaluated in UTC.
    pub fn new(
        reconciliation: Arc<ReconciliationUseCases>,
        clock: Arc<dyn Clock>,
        daily_cron: &str,
        trial_cron: &str,
        analytics_cron: &str,
    ) -> Result<Self, InfraError> {
        let jobs = [
            (SweepKind::Daily, parse_schedule("daily sweep", daily_cron)?),
            (SweepKind::Trial, parse_schedule("trial sweep", trial_cron)?),
            (
                SweepKind::Analytics,
                parse_schedule("analytics sweep", analytics_cron)?,
            ),
        ]
        .into_iter()
        .map(|(kind, schedule)| Job {
            kind,
            schedule,
            running: AtomicBool::new(false),
        })
        .collect();

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            reconciliation,
            clock,
            jobs,
            shutdown,
            handles: Mutex::new(Vec::new()),
        })
    }

    fn job(&self, kind: SweepKind) -> Option<&Job> {
        self.jobs.iter().find(|j| j.kind == kind)
    }

    /// First fire of `kind` strictly after `after`.
    pub fn next_fire(&self, kind: SweepKind, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.job(kind)?.schedule.after(&after).next()
    }

    /// Runs one sweep now. Returns `false` if the previous run of the same sweep has not
    /// finished yet.
    pub async fn run_job(&self, kind: SweepKind) -> bool {
        let Some(job) = self.job(kind) else {
            return false;
        };
        if job.running.swap(true, Ordering::SeqCst) {
            warn!(sweep = %kind, "Previous run still in progress, skipping");
            return false;
        }
        let _guard = RunningGuard(&job.running);

        let now = self.clock.now();
        info!(sweep = %kind, %now, "Sweep started");

        let result = match kind {
            SweepKind::Daily => self.reconciliation.daily_sweep(now).await.map(|_| ()),
            SweepKind::Trial => self.reconciliation.trial_sweep(now).await.map(|_| ()),
            SweepKind::Analytics => self.reconciliation.analytics_sweep(now).await.map(|_| ()),
        };

        if let Err(e) = result {
            error!(sweep = %kind, error = %e, "Sweep failed");
        }
        true
    }

    /// Spawns one loop per sweep. Loops run until [`Scheduler::shutdown`].
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;

        for job in &self.jobs {
            let kind = job.kind;
            let scheduler = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                let mut last_fire: Option<DateTime<Utc>> = None;

                loop {
                    let now = scheduler.clock.now();
                    let after = last_fire.map_or(now, |last| last.max(now));
                    let Some(next) = scheduler.next_fire(kind, after) else {
                        warn!(sweep = %kind, "Schedule has no upcoming fire, stopping");
                        break;
                    };
                    let wait = (next - now).to_std().unwrap_or_default();

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }

                    last_fire = Some(next);
                    let runner = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        runner.run_job(kind).await;
                    });
                }
            }));

            info!(sweep = %kind, next = ?self.next_fire(kind, self.clock.now()), "Sweep scheduled");
        }
    }

    /// Stops the loops. Runs already in flight are left to finish on their own.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}
