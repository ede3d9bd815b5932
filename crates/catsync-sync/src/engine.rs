use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use catsync_adapters::{extract_categories, map_document, parse_document};
use catsync_core::{FeedSource, SyncRunStats, SyncStatus, TenantId};
use catsync_storage::{FeedFetcher, HttpClientConfig, HttpFetcher, RecordStore, StoreError};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::reconcile::Reconciler;
use crate::schedule::{Clock, SystemClock};
use crate::{FatalRunError, SourceError, SourceRegistry, SyncConfig};

/// Lock-free counters shared between the running pass and status readers.
#[derive(Debug, Default)]
pub struct SyncCounters {
    total_products: AtomicU64,
    new_products: AtomicU64,
    updated_products: AtomicU64,
    errors: AtomicU64,
}

impl SyncCounters {
    pub fn record_total(&self) {
        self.total_products.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_products.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_updated(&self) {
        self.updated_products.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.record_errors(1);
    }

    fn reset(&self) {
        for counter in [
            &self.total_products,
            &self.new_products,
            &self.updated_products,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SyncRunStats {
        SyncRunStats {
            total_products: self.total_products.load(Ordering::Relaxed),
            new_products: self.new_products.load(Ordering::Relaxed),
            updated_products: self.updated_products.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(SyncRunStats),
    Aborted { stats: SyncRunStats, error: String },
    /// Another run held the guard; nothing was touched.
    Skipped,
}

/// Holds the running flag; clearing happens on drop, including early returns.
#[derive(Debug)]
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LastRun {
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
}

/// Tenant fan-out orchestrator and status reporter.
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn FeedFetcher>,
    clock: Arc<dyn Clock>,
    sources: Vec<FeedSource>,
    store_timeout: Duration,
    running: Arc<AtomicBool>,
    counters: SyncCounters,
    last_run: RwLock<LastRun>,
}

impl SyncEngine {
    /// `sources` are filtered to enabled entries and ordered by priority.
    pub fn new(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn FeedFetcher>,
        sources: Vec<FeedSource>,
    ) -> Self {
        let sources = SourceRegistry { sources }.active_sources();
        Self {
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            sources,
            store_timeout: Duration::from_secs(15),
            running: Arc::new(AtomicBool::new(false)),
            counters: SyncCounters::default(),
            last_run: RwLock::new(LastRun::default()),
        }
    }

    pub async fn from_config(config: &SyncConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        let registry = SourceRegistry::load(&config.sources_path).await?;
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: Some(config.user_agent.clone()),
        })?;
        Ok(Self::new(store, Arc::new(fetcher), registry.sources)
            .with_store_timeout(config.store_timeout))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        let last_run = *self.last_run.read().unwrap_or_else(PoisonError::into_inner);
        SyncStatus {
            is_running: self.is_running(),
            last_sync_time: last_run.finished_at,
            last_run_duration_ms: last_run.duration_ms,
            stats: self.counters.snapshot(),
        }
    }

    /// Runs one pass over `tenant_id`, or every active tenant when `None`.
    ///
    /// Returns `Skipped` without touching stats when a pass is already in flight.
    pub async fn run_sync(&self, tenant_id: Option<TenantId>) -> RunOutcome {
        match RunGuard::acquire(&self.running) {
            Some(guard) => self.run_guarded(guard, tenant_id).await,
            None => {
                info!("sync already running; skipping trigger");
                RunOutcome::Skipped
            }
        }
    }

    /// Manual trigger: claims the guard now, runs in the background.
    ///
    /// `None` when a pass is already in flight.
    pub fn trigger(self: &Arc<Self>, tenant_id: Option<TenantId>) -> Option<JoinHandle<RunOutcome>> {
        let guard = RunGuard::acquire(&self.running)?;
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            engine.run_guarded(guard, tenant_id).await
        }))
    }

    async fn run_guarded(&self, guard: RunGuard, tenant_id: Option<TenantId>) -> RunOutcome {
        self.counters.reset();
        let started = Instant::now();
        info!(tenant = ?tenant_id.map(|t| t.0), sources = self.sources.len(), "sync started");

        let outcome = match self.run_tenants(tenant_id).await {
            Ok(()) => {
                let mut last_run = self.last_run.write().unwrap_or_else(PoisonError::into_inner);
                *last_run = LastRun {
                    finished_at: Some(self.clock.now()),
                    duration_ms: Some(started.elapsed().as_millis() as u64),
                };
                let stats = self.counters.snapshot();
                info!(
                    total = stats.total_products,
                    new = stats.new_products,
                    updated = stats.updated_products,
                    errors = stats.errors,
                    "sync finished"
                );
                RunOutcome::Completed(stats)
            }
            Err(err) => {
                self.counters.record_error();
                error!(error = %err, "sync aborted");
                RunOutcome::Aborted {
                    stats: self.counters.snapshot(),
                    error: err.to_string(),
                }
            }
        };
        drop(guard);
        outcome
    }

    async fn run_tenants(&self, tenant_id: Option<TenantId>) -> Result<(), FatalRunError> {
        let tenants = match tenant_id {
            Some(tenant_id) => vec![tenant_id],
            None => tokio::time::timeout(self.store_timeout, self.store.find_active_tenants())
                .await
                .map_err(|_| StoreError::Timeout(self.store_timeout))
                .and_then(|found| found)
                .map_err(FatalRunError::Tenants)?,
        };

        for tenant in tenants {
            for source in &self.sources {
                let span = info_span!("sync_source", tenant = tenant.0, source = %source.name);
                if let Err(err) = self.sync_source(tenant, source).instrument(span).await {
                    self.counters.record_error();
                    warn!(
                        tenant = tenant.0,
                        source = %source.name,
                        kind = err.kind(),
                        error = %err,
                        "source sync failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// fetch, parse, map, categories, products. Only fetch and parse failures escape.
    async fn sync_source(&self, tenant_id: TenantId, source: &FeedSource) -> Result<(), SourceError> {
        let document = self.fetcher.fetch(source).await?;
        let tree = parse_document(&document.body)?;
        let batch = map_document(&tree, source);
        self.counters.record_errors(batch.failures.len() as u64);

        let reconciler = Reconciler::new(self.store.as_ref(), self.clock.as_ref(), self.store_timeout);

        for category in extract_categories(&batch.candidates) {
            if let Err(err) = reconciler.upsert_category(tenant_id, &category).await {
                self.counters.record_error();
                warn!(category = %category.name, error = %err, "category upsert failed");
            }
        }

        for candidate in &batch.candidates {
            if let Err(err) = reconciler.upsert(tenant_id, candidate, &self.counters).await {
                self.counters.record_error();
                warn!(external_id = %candidate.external_id, error = %err, "product upsert failed");
            }
        }

        info!(
            items = batch.item_count,
            mapped = batch.candidates.len(),
            rejected = batch.rejected,
            failed = batch.failures.len(),
            "source synced"
        );
        Ok(())
    }
}
