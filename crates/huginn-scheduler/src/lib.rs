//! `huginn-scheduler` — persistent cron jobs with a single rearmable timer.
//!
//! Jobs live in the shared `cron_jobs` table. One timer task sleeps until
//! the earliest `next_run_at_ms`, executes everything due sequentially, and
//! rearms. Mutating operations (add/remove/enable/run) rearm by recomputing
//! the wake time from the database, so they never race the timer.
//!
//! # Schedule variants
//!
//! | Variant | Behaviour                                                   |
//! |---------|-------------------------------------------------------------|
//! | `At`    | Single fire at an absolute unix-ms instant                  |
//! | `Every` | Repeat every N milliseconds, measured from run completion   |
//! | `Cron`  | Cron expression, optional IANA timezone (UTC when absent)   |
//!
//! Missed firings between restarts are not compensated: startup recomputes
//! every next occurrence from the current time.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{CronScheduler, JobHandler, SchedulerStatus};
pub use error::{Result, SchedulerError};
pub use schedule::compute_next_run;
pub use types::{CronJob, JobPayload, JobState, JobStatus, Schedule};
