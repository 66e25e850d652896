//! # Scheduler
//!
//! Fires the recurring maintenance jobs on fixed UTC schedules by enqueueing
//! their task through the [`JobProducer`]. Schedules are plain Rust values
//! rather than cron strings.
//!
//! | job | schedule | task |
//! |---|---|---|
//! | `resolution-sync` | hourly at :00 | `entity_resolution_sync` |
//! | `network-refresh` | every 4 hours at :00 | `network_refresh` |
//! | `batch-scoring` | hourly at :30 | `batch_scoring` |
//! | `watchlist-sync` | daily 02:00 | `watchlist_sync` |
//! | `cleanup` | Sunday 03:00 | `cleanup` |

use crate::error::{JobError, JobResult};
use crate::logging::log_job_operation;
use crate::messaging::TaskType;
use crate::producer::{EnqueuedJob, JobProducer};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// When a job fires, in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Hourly { minute: u32 },
    /// Hours divisible by `hours`, starting at midnight
    EveryHours { hours: u32, minute: u32 },
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
}

fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn at(day: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    day + Duration::hours(i64::from(hour)) + Duration::minutes(i64::from(minute))
}

impl Schedule {
    /// First fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Hourly { minute } => {
                let candidate = at(midnight(now), now.hour(), minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Schedule::EveryHours { hours, minute } => {
                let step = i64::from(hours.clamp(1, 24));
                let mut candidate = at(midnight(now), 0, minute);
                while candidate <= now {
                    candidate += Duration::hours(step);
                    // restart the cycle at midnight
                    if candidate.date_naive() != now.date_naive() && candidate.hour() != 0 {
                        candidate = at(midnight(now) + Duration::days(1), 0, minute);
                    }
                }
                candidate
            }
            Schedule::Daily { hour, minute } => {
                let candidate = at(midnight(now), hour, minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let days_ahead = (7 + weekday.num_days_from_monday()
                    - now.weekday().num_days_from_monday())
                    % 7;
                let candidate = at(
                    midnight(now) + Duration::days(i64::from(days_ahead)),
                    hour,
                    minute,
                );
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub name: &'static str,
    pub schedule: Schedule,
    pub task_type: TaskType,
    pub payload: Value,
}

impl ScheduledJob {
    pub fn new(name: &'static str, schedule: Schedule, task_type: TaskType) -> Self {
        Self {
            name,
            schedule,
            task_type,
            payload: json!({}),
        }
    }
}

/// The recurring maintenance jobs
pub fn default_jobs() -> Vec<ScheduledJob> {
    vec![
        ScheduledJob::new(
            "resolution-sync",
            Schedule::Hourly { minute: 0 },
            TaskType::EntityResolutionSync,
        ),
        ScheduledJob::new(
            "network-refresh",
            Schedule::EveryHours {
                hours: 4,
                minute: 0,
            },
            TaskType::NetworkRefresh,
        ),
        ScheduledJob::new(
            "batch-scoring",
            Schedule::Hourly { minute: 30 },
            TaskType::BatchScoring,
        ),
        ScheduledJob::new(
            "watchlist-sync",
            Schedule::Daily { hour: 2, minute: 0 },
            TaskType::WatchlistSync,
        ),
        ScheduledJob::new(
            "cleanup",
            Schedule::Weekly {
                weekday: Weekday::Sun,
                hour: 3,
                minute: 0,
            },
            TaskType::Cleanup,
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    producer: JobProducer,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new(producer: JobProducer) -> Self {
        Self::with_jobs(producer, default_jobs())
    }

    pub fn with_jobs(producer: JobProducer, jobs: Vec<ScheduledJob>) -> Self {
        Self { producer, jobs }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Enqueue a scheduled job now, outside its schedule
    pub async fn trigger(&self, name: &str) -> JobResult<EnqueuedJob> {
        let job = self
            .jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or_else(|| JobError::UnknownSchedule {
                name: name.to_string(),
            })?;
        self.fire(job).await
    }

    async fn fire(&self, job: &ScheduledJob) -> JobResult<EnqueuedJob> {
        let queued = self
            .producer
            .enqueue(job.task_type, job.payload.clone())
            .await?;
        log_job_operation(
            "schedule",
            Some(&queued.task_id.to_string()),
            Some(job.task_type.as_str()),
            Some(queued.queue.as_str()),
            "queued",
            Some(job.name),
        );
        Ok(queued)
    }

    /// Fire jobs on schedule until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.jobs.is_empty() {
            return;
        }
        let now = Utc::now();
        let mut next_fires: Vec<DateTime<Utc>> = self
            .jobs
            .iter()
            .map(|job| job.schedule.next_after(now))
            .collect();

        info!(jobs = self.jobs.len(), "Scheduler started");

        loop {
            let Some(fire_at) = next_fires.iter().min().copied() else {
                break;
            };
            let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
            debug!(next_fire = %fire_at, wait_secs = wait.as_secs(), "Scheduler sleeping");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    for (job, next) in self.jobs.iter().zip(next_fires.iter_mut()) {
                        if *next > fire_at {
                            continue;
                        }
                        if let Err(e) = self.fire(job).await {
                            error!(job = job.name, error = %e, "Scheduled job failed to enqueue");
                        }
                        *next = job.schedule.next_after(fire_at);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}
