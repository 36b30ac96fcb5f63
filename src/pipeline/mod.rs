//! Crawl orchestrator: ties source → deduplication → snapshot store together.
//!
//! ## Stages
//!
//! 1. **Discovery**: one directory request per region/sub-region target, under
//!    a small worker pool. Fails the run only when no branch is found at all.
//! 2. **Rates**: for every unique branch, one request per product category in
//!    turn, under a larger worker pool. Branches without a valid quote are
//!    counted, not reported as errors.
//!
//! Workers never touch shared state. Each task hands its result back through a
//! `JoinSet` and the stage coordinator merges them in completion order. The
//! store is written only after both stages finish.

pub mod grades;

use crate::config::AppConfig;
use crate::dedup::{dedup_branches, dedup_quotes};
use crate::models::{Branch, BranchRateRecord, ProductCategory, Target};
use crate::scraper::{CooperativeSource, KfccScraper, SourceError};
use crate::storage::SnapshotStore;
use crate::storage::summary::summarize;
use crate::utils::{Progress, Timer};
use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use self::grades::GradeCollector;

/// Errors shown in the end-of-run summary; the rest are only counted.
const MAX_DISPLAYED_ERRORS: usize = 10;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("branch discovery found no branches ({failed_targets} target(s) failed)")]
    NoBranches { failed_targets: usize },
}

/// One per-target failure kept for the run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlError {
    pub target: String,
    pub cause: String,
}

impl From<&SourceError> for CrawlError {
    fn from(err: &SourceError) -> Self {
        Self { target: err.target().to_string(), cause: err.to_string() }
    }
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.cause)
    }
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub branches: Vec<Branch>,
    pub errors: Vec<CrawlError>,
}

#[derive(Debug, Default)]
pub struct RateCollection {
    pub records: Vec<BranchRateRecord>,
    pub empty_branches: usize,
    pub errors: Vec<CrawlError>,
}

#[derive(Debug, Default)]
pub struct CrawlStats {
    pub branches_fetched: usize,
    pub rate_records: usize,
    pub empty_branches: usize,
    pub cleaned_files: usize,
    pub errors: Vec<CrawlError>,
}

impl CrawlStats {
    /// Error lines for display: the first few, then a count of the rest.
    pub fn error_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .errors
            .iter()
            .take(MAX_DISPLAYED_ERRORS)
            .map(|e| format!("  - {}", e))
            .collect();
        if self.errors.len() > MAX_DISPLAYED_ERRORS {
            lines.push(format!("  … and {} more", self.errors.len() - MAX_DISPLAYED_ERRORS));
        }
        lines
    }

    pub fn log_summary(&self) {
        info!(
            "=== Done: {} branches | {} rate records | {} without rates | {} errors ===",
            self.branches_fetched,
            self.rate_records,
            self.empty_branches,
            self.errors.len()
        );
        if !self.errors.is_empty() {
            warn!("Errors:\n{}", self.error_lines().join("\n"));
        }
    }
}

/// Spawn one task per item, at most `workers` running at once. Tasks start
/// immediately and queue on the semaphore.
fn spawn_bounded<I, T, F, Fut>(items: Vec<I>, workers: usize, work: F) -> JoinSet<T>
where
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for item in items {
        let sem = Arc::clone(&sem);
        let task = work(item);
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            task.await
        });
    }
    set
}

pub struct Pipeline {
    config: AppConfig,
    source: Arc<dyn CooperativeSource>,
    store: SnapshotStore,
    targets: Vec<Target>,
}

impl Pipeline {
    /// Pipeline against the live portal.
    pub fn new(config: AppConfig) -> Result<Self> {
        let scraper = KfccScraper::new(&config.scraper).context("Failed to build scraper")?;
        Self::with_source(config, Arc::new(scraper))
    }

    pub fn with_source(config: AppConfig, source: Arc<dyn CooperativeSource>) -> Result<Self> {
        let store = SnapshotStore::open(&config.storage).context("Failed to open snapshot store")?;
        Ok(Self { config, source, store, targets: Target::directory() })
    }

    /// Replace the built-in region directory.
    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Full crawl: discovery, rates, snapshot + summary, then optional cleanup.
    pub async fn run(&self, cleanup_days: Option<i64>) -> Result<CrawlStats> {
        let _t = Timer::start("Rate crawl");

        info!("=== Step 1: Discovering branches ({} targets) ===", self.targets.len());
        let discovery = self.discover(self.targets.clone()).await?;

        info!("=== Step 2: Collecting rates ({} branches) ===", discovery.branches.len());
        let rates = self.collect_rates(&discovery.branches).await;

        self.store
            .save_branches(&discovery.branches)
            .context("Saving branch list failed")?;

        let now = Local::now().naive_local();
        let today = now.date();
        if rates.records.is_empty() {
            warn!("No branch produced rates; keeping previous snapshots");
        } else {
            self.store
                .save_daily_rates(today, &rates.records)
                .context("Saving daily rates failed")?;
            self.store
                .save_summary(today, &summarize(&rates.records, now))
                .context("Saving rate summary failed")?;
        }

        let cleaned_files = match cleanup_days {
            Some(days) => self.store.cleanup_older_than(days).context("Cleanup failed")?,
            None => 0,
        };

        let mut errors = discovery.errors;
        errors.extend(rates.errors);
        let stats = CrawlStats {
            branches_fetched: discovery.branches.len(),
            rate_records: rates.records.len(),
            empty_branches: rates.empty_branches,
            cleaned_files,
            errors,
        };
        stats.log_summary();
        Ok(stats)
    }

    /// Stage 1. Returns the deduplicated branch set and per-target failures.
    pub async fn discover(&self, targets: Vec<Target>) -> Result<Discovery, PipelineError> {
        let total = targets.len();
        let source = Arc::clone(&self.source);
        let mut set = spawn_bounded(targets, self.config.pipeline.discovery_workers, |target| {
            let source = Arc::clone(&source);
            async move {
                let result = source.fetch_branches(&target).await;
                (target, result)
            }
        });

        let mut progress =
            Progress::new("Discovery", total, self.config.pipeline.discovery_progress_every);
        let mut found = Vec::new();
        let mut errors = Vec::new();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(branches))) => found.extend(branches),
                Ok((target, Err(e))) => {
                    warn!("✗ {}: {}", target, e);
                    errors.push(CrawlError::from(&e));
                }
                Err(e) => {
                    error!("Discovery task failed: {}", e);
                    errors.push(CrawlError { target: "discovery task".into(), cause: e.to_string() });
                }
            }
            progress.tick();
        }

        let raw_count = found.len();
        let branches = dedup_branches(found);
        info!(
            "Discovered {} unique branches ({} listed, {} failed targets)",
            branches.len(),
            raw_count,
            errors.len()
        );

        if branches.is_empty() {
            return Err(PipelineError::NoBranches { failed_targets: errors.len() });
        }
        log_region_stats(&branches);
        Ok(Discovery { branches, errors })
    }

    /// Stage 2. Each branch's categories are fetched one after another.
    pub async fn collect_rates(&self, branches: &[Branch]) -> RateCollection {
        let total = branches.len();
        let source = Arc::clone(&self.source);
        let mut set = spawn_bounded(branches.to_vec(), self.config.pipeline.rate_workers, |branch| {
            let source = Arc::clone(&source);
            async move { fetch_branch_rates(source.as_ref(), branch).await }
        });

        let mut progress = Progress::new("Rates", total, self.config.pipeline.rate_progress_every);
        let mut out = RateCollection::default();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    out.errors.extend(outcome.errors);
                    match outcome.record {
                        Some(record) => out.records.push(record),
                        None => out.empty_branches += 1,
                    }
                }
                Err(e) => {
                    error!("Rate task failed: {}", e);
                    out.errors.push(CrawlError { target: "rate task".into(), cause: e.to_string() });
                }
            }
            progress.tick();
        }

        info!(
            "Collected rates for {}/{} branches ({} without rates)",
            out.records.len(),
            total,
            out.empty_branches
        );
        out
    }

    /// Grade collection against the stored branch list. Returns the number of
    /// grades saved; zero when the month gate is closed.
    pub async fn collect_grades(&self) -> Result<usize> {
        let collector = GradeCollector::new(self.config.grades.clone(), Arc::clone(&self.source));
        let month = Local::now().month();
        if !collector.is_due(month) {
            info!(
                "Grade collection not scheduled for month {} (months {:?}, force={})",
                month, self.config.grades.collection_months, self.config.grades.force
            );
            return Ok(0);
        }

        let Some(list) = self.store.load_branches()? else {
            bail!("No branch list in {:?}; run a crawl first", self.store.data_dir());
        };

        let _t = Timer::start("Grade collection");
        let run = collector.collect_in_month(&list.banks, month).await;
        run.log_summary();
        if run.grades.is_empty() {
            bail!("No grades collected for {} branches", list.banks.len());
        }

        self.store.save_grades(
            self.config.grades.evaluation_year,
            self.config.grades.evaluation_month,
            &run.grades,
        )
    }
}

struct BranchOutcome {
    record: Option<BranchRateRecord>,
    errors: Vec<CrawlError>,
}

async fn fetch_branch_rates(source: &dyn CooperativeSource, branch: Branch) -> BranchOutcome {
    let mut quotes = Vec::new();
    let mut base_date: Option<String> = None;
    let mut errors = Vec::new();

    for category in ProductCategory::ALL {
        match source.fetch_rates(&branch, category).await {
            Ok(page) => {
                if base_date.is_none() {
                    base_date = page.base_date;
                }
                quotes.extend(page.quotes);
            }
            Err(e) => {
                warn!("✗ {}: {}", e.target(), e);
                errors.push(CrawlError::from(&e));
            }
        }
    }

    let products = dedup_quotes(quotes);
    let record = BranchRateRecord::new(
        &branch,
        base_date.unwrap_or_default(),
        products,
        Local::now().naive_local(),
    );
    match &record {
        Some(r) => debug!("{} {}: {} products", branch.code, branch.name, r.product_count),
        None => debug!("{} {}: no valid quotes", branch.code, branch.name),
    }
    BranchOutcome { record, errors }
}

fn log_region_stats(branches: &[Branch]) {
    let mut regions: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for b in branches {
        *regions
            .entry(b.region.as_str())
            .or_default()
            .entry(b.sub_region.as_str())
            .or_default() += 1;
    }

    info!("Branches by region:");
    for (region, subs) in &regions {
        let count: usize = subs.values().sum();
        info!("  {}: {} branches in {} sub-region(s)", region, count, subs.len());
        for (sub, n) in subs {
            debug!("    {} {}: {}", region, sub, n);
        }
    }
}
