use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::{compute_next_run, now_ms, validate};
use crate::types::{CronJob, JobPayload, JobState, JobStatus, Schedule};

/// Host-supplied job callback.
///
/// Errors are caught by the scheduler and recorded as `last_status = error`;
/// no retry is performed here — retries are the callback's concern.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn on_job(&self, job: &CronJob) -> std::result::Result<(), String>;
}

/// Snapshot returned by [`CronScheduler::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub jobs: usize,
    pub next_wake_at_ms: Option<i64>,
}

/// Persistent job scheduler with a single rearmable timer.
pub struct CronScheduler {
    db: Mutex<Connection>,
    handler: Mutex<Option<Arc<dyn JobHandler>>>,
    /// Rearm signal: any mutation pokes the timer loop to recompute.
    rearm: Notify,
    /// Per-job in-flight guard: two concurrent runs of one id never both
    /// execute the callback.
    running: DashMap<String, ()>,
}

impl CronScheduler {
    /// Wrap an already-open (and migrated) connection. The job callback is
    /// wired separately via [`CronScheduler::set_handler`] — jobs executed
    /// before that count as successful runs with empty effect.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            handler: Mutex::new(None),
            rearm: Notify::new(),
            running: DashMap::new(),
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn JobHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Startup sweep: recompute `next_run_at_ms` for every enabled job from
    /// the current time and rearm. Missed firings are not compensated.
    pub fn start(&self) -> Result<()> {
        let now = now_ms();
        let jobs = self.list_jobs()?;
        let db = self.db.lock().unwrap();
        for job in jobs.iter().filter(|j| j.enabled) {
            let next = compute_next_run(&job.schedule, now);
            db.execute(
                "UPDATE cron_jobs SET next_run_at_ms = ?1, updated_at_ms = ?2 WHERE id = ?3",
                rusqlite::params![next, now, job.id],
            )?;
        }
        drop(db);
        info!(jobs = jobs.len(), "scheduler started, timers recomputed");
        self.rearm.notify_one();
        Ok(())
    }

    /// Insert a new job with its first wake computed, then rearm.
    ///
    /// Cron expressions are validated here; a bad expression is a
    /// [`SchedulerError::ScheduleParse`] and nothing is inserted.
    pub fn add_job(
        &self,
        name: &str,
        schedule: Schedule,
        payload: JobPayload,
        delete_after_run: bool,
    ) -> Result<CronJob> {
        validate(&schedule)?;

        let now = now_ms();
        let id = short_id();
        let next = compute_next_run(&schedule, now);

        let job = CronJob {
            id: id.clone(),
            name: name.to_string(),
            enabled: true,
            schedule,
            payload,
            state: JobState {
                next_run_at_ms: next,
                ..JobState::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run,
        };

        let db = self.db.lock().unwrap();
        let (at_ms, every_ms, expr, tz) = schedule_columns(&job.schedule);
        db.execute(
            "INSERT INTO cron_jobs
             (id, name, enabled, schedule_kind, schedule_at_ms, schedule_every_ms,
              schedule_expr, schedule_tz, payload_kind, payload_message,
              payload_deliver, payload_channel, payload_to, next_run_at_ms,
              last_run_at_ms, last_status, last_error, created_at_ms,
              updated_at_ms, delete_after_run)
             VALUES (?1,?2,1,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,NULL,NULL,NULL,?14,?14,?15)",
            rusqlite::params![
                job.id,
                job.name,
                job.schedule.kind(),
                at_ms,
                every_ms,
                expr,
                tz,
                job.payload.kind,
                job.payload.message,
                job.payload.deliver,
                job.payload.channel,
                job.payload.to,
                job.state.next_run_at_ms,
                now,
                job.delete_after_run,
            ],
        )?;
        drop(db);

        info!(job_id = %id, name, "job added");
        self.rearm.notify_one();
        Ok(job)
    }

    /// Delete a job. Returns whether a row existed. Rearms.
    pub fn remove_job(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM cron_jobs WHERE id = ?1", [id])?;
        drop(db);
        if n > 0 {
            info!(job_id = %id, "job removed");
            self.rearm.notify_one();
        }
        Ok(n > 0)
    }

    /// Flip `enabled`; disabling nulls the next wake. Rearms.
    pub fn enable_job(&self, id: &str, enabled: bool) -> Result<()> {
        let job = self
            .get_job(id)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        let now = now_ms();
        let next = if enabled {
            compute_next_run(&job.schedule, now)
        } else {
            None
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE cron_jobs SET enabled = ?1, next_run_at_ms = ?2, updated_at_ms = ?3
             WHERE id = ?4",
            rusqlite::params![enabled, next, now, id],
        )?;
        drop(db);

        info!(job_id = %id, enabled, "job toggled");
        self.rearm.notify_one();
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> Result<Option<CronJob>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE id = ?1"),
            [id],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All jobs ordered by creation time.
    pub fn list_jobs(&self) -> Result<Vec<CronJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM cron_jobs ORDER BY created_at_ms, id"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    /// Job count and the earliest armed wake.
    pub fn status(&self) -> Result<SchedulerStatus> {
        let db = self.db.lock().unwrap();
        let jobs: i64 = db.query_row("SELECT COUNT(*) FROM cron_jobs", [], |row| row.get(0))?;
        let next_wake_at_ms: Option<i64> = db.query_row(
            "SELECT MIN(next_run_at_ms) FROM cron_jobs
             WHERE enabled = 1 AND next_run_at_ms IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(SchedulerStatus {
            jobs: jobs as usize,
            next_wake_at_ms,
        })
    }

    /// Execute a job immediately when it is enabled (or `force` is set).
    ///
    /// Returns whether the callback actually ran — `false` when the job is
    /// disabled without force, or when a concurrent run holds the guard.
    pub async fn run_job(&self, id: &str, force: bool) -> Result<bool> {
        let job = self
            .get_job(id)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        if !job.enabled && !force {
            return Ok(false);
        }
        self.execute(job).await
    }

    /// Timer loop. Sleeps until the earliest wake (or idles when no job is
    /// armed), fires everything due sequentially, rearms. Mutations poke
    /// `rearm` so the loop recomputes immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("scheduler timer started");
        loop {
            let next = match self.status() {
                Ok(status) => status.next_wake_at_ms,
                Err(e) => {
                    error!(error = %e, "scheduler status query failed");
                    None
                }
            };

            let sleep_for = match next {
                Some(at_ms) => Duration::from_millis((at_ms - now_ms()).max(0) as u64),
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler timer stopped");
                    return;
                }
                _ = self.rearm.notified() => continue,
                _ = tokio::time::sleep(sleep_for) => {
                    if next.is_some() {
                        self.fire_due().await;
                    }
                }
            }
        }
    }

    // --- private helpers ---------------------------------------------------

    /// Execute every job whose wake has arrived, one after another.
    async fn fire_due(&self) {
        let now = now_ms();
        let due: Vec<String> = {
            let db = self.db.lock().unwrap();
            let mut stmt = match db.prepare_cached(
                "SELECT id FROM cron_jobs
                 WHERE enabled = 1 AND next_run_at_ms IS NOT NULL AND next_run_at_ms <= ?1
                 ORDER BY next_run_at_ms",
            ) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "due-jobs query failed");
                    return;
                }
            };
            stmt.query_map([now], |row| row.get::<_, String>(0))
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default()
        };

        for id in due {
            match self.get_job(&id) {
                Ok(Some(job)) => {
                    if let Err(e) = self.execute(job).await {
                        error!(job_id = %id, error = %e, "job execution failed");
                    }
                }
                Ok(None) => {} // removed while due
                Err(e) => error!(job_id = %id, error = %e, "job reload failed"),
            }
        }
    }

    async fn execute(&self, job: CronJob) -> Result<bool> {
        if self.running.insert(job.id.clone(), ()).is_some() {
            warn!(job_id = %job.id, "job already running, skipping");
            return Ok(false);
        }

        let started = now_ms();
        let handler = self.handler.lock().unwrap().clone();

        // An unset callback counts as a successful run with empty effect.
        let outcome = match handler {
            Some(h) => h.on_job(&job).await,
            None => Ok(()),
        };

        let (status, last_error) = match &outcome {
            Ok(()) => (JobStatus::Ok, None),
            Err(msg) => {
                warn!(job_id = %job.id, error = %msg, "job callback returned error");
                (JobStatus::Error, Some(msg.clone()))
            }
        };

        let finished = now_ms();
        let one_shot = matches!(job.schedule, Schedule::At { .. });

        {
            let db = self.db.lock().unwrap();
            if one_shot && job.delete_after_run {
                db.execute("DELETE FROM cron_jobs WHERE id = ?1", [job.id.as_str()])?;
            } else if one_shot {
                db.execute(
                    "UPDATE cron_jobs
                     SET enabled = 0, next_run_at_ms = NULL, last_run_at_ms = ?1,
                         last_status = ?2, last_error = ?3, updated_at_ms = ?4
                     WHERE id = ?5",
                    rusqlite::params![started, status.to_string(), last_error, finished, job.id],
                )?;
            } else {
                // Recurring: next computed from completion, not from the
                // scheduled time.
                let next = compute_next_run(&job.schedule, finished);
                db.execute(
                    "UPDATE cron_jobs
                     SET next_run_at_ms = ?1, last_run_at_ms = ?2, last_status = ?3,
                         last_error = ?4, updated_at_ms = ?5
                     WHERE id = ?6",
                    rusqlite::params![next, started, status.to_string(), last_error, finished, job.id],
                )?;
            }
        }

        self.running.remove(&job.id);
        self.rearm.notify_one();
        info!(job_id = %job.id, name = %job.name, status = %status, "job executed");
        Ok(true)
    }
}

const JOB_COLUMNS: &str = "id, name, enabled, schedule_kind, schedule_at_ms, schedule_every_ms,
     schedule_expr, schedule_tz, payload_kind, payload_message, payload_deliver,
     payload_channel, payload_to, next_run_at_ms, last_run_at_ms, last_status,
     last_error, created_at_ms, updated_at_ms, delete_after_run";

fn schedule_columns(schedule: &Schedule) -> (Option<i64>, Option<i64>, Option<&str>, Option<&str>) {
    match schedule {
        Schedule::At { at_ms } => (Some(*at_ms), None, None, None),
        Schedule::Every { every_ms } => (None, Some(*every_ms), None, None),
        Schedule::Cron { expr, tz } => (None, None, Some(expr.as_str()), tz.as_deref()),
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronJob> {
    let kind: String = row.get(3)?;
    let schedule = match kind.as_str() {
        "at" => Schedule::At {
            at_ms: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        },
        "every" => Schedule::Every {
            every_ms: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        },
        _ => Schedule::Cron {
            expr: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            tz: row.get(7)?,
        },
    };

    let last_status: Option<String> = row.get(15)?;

    Ok(CronJob {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get(2)?,
        schedule,
        payload: JobPayload {
            kind: row.get(8)?,
            message: row.get(9)?,
            deliver: row.get(10)?,
            channel: row.get(11)?,
            to: row.get(12)?,
        },
        state: JobState {
            next_run_at_ms: row.get(13)?,
            last_run_at_ms: row.get(14)?,
            last_status: last_status.and_then(|s| s.parse().ok()),
            last_error: row.get(16)?,
        },
        created_at_ms: row.get(17)?,
        updated_at_ms: row.get(18)?,
        delete_after_run: row.get(19)?,
    })
}

fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn scheduler() -> CronScheduler {
        let conn = huginn_db::open_in_memory().unwrap();
        huginn_db::migrate::run_migrations(&conn).unwrap();
        CronScheduler::new(conn)
    }

    /// Records run timestamps; optionally fails every call.
    struct Recorder {
        runs: StdMutex<Vec<i64>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: StdMutex::new(Vec::new()),
                fail,
            })
        }

        fn count(&self) -> usize {
            self.runs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn on_job(&self, _job: &CronJob) -> std::result::Result<(), String> {
            self.runs.lock().unwrap().push(now_ms());
            if self.fail {
                Err("callback exploded".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn add_then_remove_round_trips_status() {
        let sched = scheduler();
        let before = sched.status().unwrap();
        let job = sched
            .add_job(
                "ping",
                Schedule::Every { every_ms: 5000 },
                JobPayload::agent_turn("ping"),
                false,
            )
            .unwrap();
        assert_eq!(sched.status().unwrap().jobs, 1);
        assert!(sched.remove_job(&job.id).unwrap());
        assert_eq!(sched.status().unwrap(), before);
    }

    #[tokio::test]
    async fn add_rejects_invalid_cron_expression() {
        let sched = scheduler();
        let result = sched.add_job(
            "bad",
            Schedule::Cron {
                expr: "definitely not cron".to_string(),
                tz: None,
            },
            JobPayload::agent_turn("x"),
            false,
        );
        assert!(matches!(result, Err(SchedulerError::ScheduleParse(_))));
        assert_eq!(sched.status().unwrap().jobs, 0);
    }

    #[tokio::test]
    async fn run_job_records_state_and_recomputes_next() {
        let sched = scheduler();
        let recorder = Recorder::new(false);
        sched.set_handler(recorder.clone());

        let job = sched
            .add_job(
                "tick",
                Schedule::Every { every_ms: 5000 },
                JobPayload::agent_turn("tick"),
                false,
            )
            .unwrap();

        assert!(sched.run_job(&job.id, false).await.unwrap());
        assert_eq!(recorder.count(), 1);

        let after = sched.get_job(&job.id).unwrap().unwrap();
        let last = after.state.last_run_at_ms.unwrap();
        let next = after.state.next_run_at_ms.unwrap();
        assert_eq!(after.state.last_status, Some(JobStatus::Ok));
        assert!(next >= last + 5000);
    }

    #[tokio::test]
    async fn one_shot_with_delete_after_run_is_removed() {
        let sched = scheduler();
        sched.set_handler(Recorder::new(false));
        let job = sched
            .add_job(
                "once",
                Schedule::At { at_ms: now_ms() + 60_000 },
                JobPayload::agent_turn("once"),
                true,
            )
            .unwrap();

        assert!(sched.run_job(&job.id, true).await.unwrap());
        assert!(sched.get_job(&job.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn one_shot_retained_is_disabled_with_null_next() {
        let sched = scheduler();
        sched.set_handler(Recorder::new(false));
        let job = sched
            .add_job(
                "once",
                Schedule::At { at_ms: now_ms() + 60_000 },
                JobPayload::agent_turn("once"),
                false,
            )
            .unwrap();

        assert!(sched.run_job(&job.id, true).await.unwrap());
        let after = sched.get_job(&job.id).unwrap().unwrap();
        assert!(!after.enabled);
        assert_eq!(after.state.next_run_at_ms, None);
        assert_eq!(after.state.last_status, Some(JobStatus::Ok));
    }

    #[tokio::test]
    async fn callback_error_is_recorded_not_propagated() {
        let sched = scheduler();
        sched.set_handler(Recorder::new(true));
        let job = sched
            .add_job(
                "boom",
                Schedule::Every { every_ms: 1000 },
                JobPayload::agent_turn("boom"),
                false,
            )
            .unwrap();

        assert!(sched.run_job(&job.id, false).await.unwrap());
        let after = sched.get_job(&job.id).unwrap().unwrap();
        assert_eq!(after.state.last_status, Some(JobStatus::Error));
        assert_eq!(after.state.last_error.as_deref(), Some("callback exploded"));
    }

    #[tokio::test]
    async fn absent_callback_counts_as_ok_with_empty_effect() {
        let sched = scheduler();
        let job = sched
            .add_job(
                "silent",
                Schedule::Every { every_ms: 1000 },
                JobPayload::agent_turn("silent"),
                false,
            )
            .unwrap();

        assert!(sched.run_job(&job.id, false).await.unwrap());
        let after = sched.get_job(&job.id).unwrap().unwrap();
        assert_eq!(after.state.last_status, Some(JobStatus::Ok));
        assert!(after.state.last_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn disabled_job_does_not_run_without_force() {
        let sched = scheduler();
        let recorder = Recorder::new(false);
        sched.set_handler(recorder.clone());
        let job = sched
            .add_job(
                "off",
                Schedule::Every { every_ms: 1000 },
                JobPayload::agent_turn("off"),
                false,
            )
            .unwrap();
        sched.enable_job(&job.id, false).unwrap();

        assert!(!sched.run_job(&job.id, false).await.unwrap());
        assert_eq!(recorder.count(), 0);
        assert!(sched.run_job(&job.id, true).await.unwrap());
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn disabled_job_has_null_next_wake() {
        let sched = scheduler();
        let job = sched
            .add_job(
                "off",
                Schedule::Every { every_ms: 1000 },
                JobPayload::agent_turn("off"),
                false,
            )
            .unwrap();
        sched.enable_job(&job.id, false).unwrap();
        let after = sched.get_job(&job.id).unwrap().unwrap();
        assert_eq!(after.state.next_run_at_ms, None);
        assert_eq!(sched.status().unwrap().next_wake_at_ms, None);
    }

    #[tokio::test]
    async fn timer_fires_every_interval_with_monotonic_runs() {
        let sched = Arc::new(scheduler());
        let recorder = Recorder::new(false);
        sched.set_handler(recorder.clone());

        sched
            .add_job(
                "fast",
                Schedule::Every { every_ms: 50 },
                JobPayload::agent_turn("fast"),
                false,
            )
            .unwrap();
        sched.start().unwrap();

        let cancel = CancellationToken::new();
        let timer = {
            let sched = sched.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(280)).await;
        cancel.cancel();
        timer.await.unwrap();

        let runs = recorder.runs.lock().unwrap().clone();
        assert!(runs.len() >= 3, "expected >= 3 runs, got {}", runs.len());
        for pair in runs.windows(2) {
            // Successive runs at least one interval apart, minus scheduling
            // slack.
            assert!(pair[1] >= pair[0] + 50 - 10);
        }
    }
}
