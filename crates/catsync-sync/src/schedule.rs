use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::engine::{RunOutcome, SyncEngine};
use crate::DEFAULT_SYNC_CRON;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Hour of day checked against business hours.
    fn local_hour(&self) -> u32 {
        self.now().hour()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Settable clock; its hour of day is the UTC hour.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Inclusive hour window during which scheduled runs are pushed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
        }
    }
}

impl BusinessHours {
    pub fn contains(&self, hour: u32) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }
}

impl FromStr for BusinessHours {
    type Err = anyhow::Error;

    /// Parses `"9-18"`.
    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow!("expected <start>-<end>, got {s:?}"))?;
        let start_hour: u32 = start.trim().parse().context("business hours start")?;
        let end_hour: u32 = end.trim().parse().context("business hours end")?;
        if end_hour > 23 || start_hour > end_hour {
            bail!("invalid business hours {start_hour}-{end_hour}");
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub cron: String,
    pub business_hours: Option<BusinessHours>,
    pub business_defer: Duration,
    pub initial_delay: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: DEFAULT_SYNC_CRON.to_string(),
            business_hours: Some(BusinessHours::default()),
            business_defer: Duration::from_secs(30 * 60),
            initial_delay: Duration::from_secs(120),
        }
    }
}

/// Recurring and start-up triggers for the engine.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    settings: ScheduleSettings,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, settings: ScheduleSettings) -> Self {
        Self { engine, settings }
    }

    /// Zero outside business hours, the configured deferral inside them.
    pub fn delay_before_run(&self) -> Duration {
        match self.settings.business_hours {
            Some(hours) if hours.contains(self.engine.clock().local_hour()) => {
                self.settings.business_defer
            }
            _ => Duration::ZERO,
        }
    }

    /// One recurring tick: defer during business hours, then run every tenant.
    pub async fn run_scheduled(&self) -> RunOutcome {
        let delay = self.delay_before_run();
        if !delay.is_zero() {
            info!(delay_secs = delay.as_secs(), "inside business hours; deferring sync");
            tokio::time::sleep(delay).await;
        }
        self.engine.run_sync(None).await
    }

    pub fn spawn_initial_run(self: &Arc<Self>) -> JoinHandle<RunOutcome> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.settings.initial_delay).await;
            info!("starting initial sync");
            scheduler.engine.run_sync(None).await
        })
    }

    /// Registers the recurring job, starts it, and schedules the initial run.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let scheduler = Arc::clone(&self);
        let job = Job::new_async(self.settings.cron.as_str(), move |_uuid, _lock| {
            let scheduler = Arc::clone(&scheduler);
            Box::pin(async move {
                let outcome = scheduler.run_scheduled().await;
                debug!(?outcome, "scheduled sync finished");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {}", self.settings.cron))?;
        sched.add(job).await.context("adding scheduler job")?;
        sched.start().await.context("starting scheduler")?;
        info!(
            cron = %self.settings.cron,
            initial_delay_secs = self.settings.initial_delay.as_secs(),
            "sync scheduler started"
        );

        self.spawn_initial_run();
        Ok(sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine_with, CountingFetcher};
    use catsync_core::TenantId;
    use catsync_storage::MemoryRecordStore;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn at_hour(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, hour, minute, 0).unwrap()
    }

    fn scheduler(clock: Arc<FixedClock>, fetcher: Arc<CountingFetcher>) -> Arc<SyncScheduler> {
        let store = Arc::new(MemoryRecordStore::with_tenants([(TenantId(1), true)]));
        let engine = engine_with(store, fetcher, clock);
        Arc::new(SyncScheduler::new(Arc::new(engine), ScheduleSettings::default()))
    }

    #[test]
    fn business_hours_parse_and_bounds() {
        let hours: BusinessHours = "9-18".parse().unwrap();
        assert_eq!(hours, BusinessHours::default());
        assert!(hours.contains(9));
        assert!(hours.contains(18));
        assert!(!hours.contains(8));
        assert!(!hours.contains(19));
        assert!("18-9".parse::<BusinessHours>().is_err());
        assert!("nine".parse::<BusinessHours>().is_err());
        assert!("0-24".parse::<BusinessHours>().is_err());
    }

    #[tokio::test]
    async fn delay_depends_on_clock_hour() {
        let clock = Arc::new(FixedClock::new(at_hour(10, 0)));
        let scheduler = scheduler(Arc::clone(&clock), Arc::new(CountingFetcher::empty()));
        assert_eq!(scheduler.delay_before_run(), Duration::from_secs(1800));

        clock.set(at_hour(18, 45));
        assert_eq!(scheduler.delay_before_run(), Duration::from_secs(1800));

        clock.set(at_hour(8, 59));
        assert_eq!(scheduler.delay_before_run(), Duration::ZERO);

        clock.set(at_hour(19, 0));
        assert_eq!(scheduler.delay_before_run(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_run_is_deferred_not_skipped_in_business_hours() {
        let clock = Arc::new(FixedClock::new(at_hour(11, 0)));
        let fetcher = Arc::new(CountingFetcher::empty());
        let scheduler = scheduler(clock, Arc::clone(&fetcher));

        let started = Instant::now();
        let outcome = scheduler.run_scheduled().await;
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert!(started.elapsed() >= Duration::from_secs(30 * 60));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_run_is_immediate_outside_business_hours() {
        let clock = Arc::new(FixedClock::new(at_hour(3, 0)));
        let fetcher = Arc::new(CountingFetcher::empty());
        let scheduler = scheduler(clock, Arc::clone(&fetcher));

        let started = Instant::now();
        scheduler.run_scheduled().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_run_waits_for_start_delay() {
        let clock = Arc::new(FixedClock::new(at_hour(10, 0)));
        let fetcher = Arc::new(CountingFetcher::empty());
        let scheduler = scheduler(clock, Arc::clone(&fetcher));

        let started = Instant::now();
        let handle = scheduler.spawn_initial_run();
        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(fetcher.calls(), 0);

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(started.elapsed() < Duration::from_secs(30 * 60));
        assert_eq!(fetcher.calls(), 1);
    }
}
