//! Management-evaluation grade collection.
//!
//! Runs at most once per evaluation period: only in a configured collection
//! month, unless forced. One POST per branch under its own worker pool; the
//! first embedded record on the page is the most recent evaluation.

use super::{CrawlError, spawn_bounded};
use crate::config::GradeConfig;
use crate::models::{Branch, GradeCode, GradeRecord, RawGrade};
use crate::scraper::CooperativeSource;
use crate::scraper::cleaner::grade_label;
use crate::utils::Progress;
use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use tracing::{debug, info, warn};

const GRADE_PROGRESS_EVERY: usize = 50;

/// Whether a run in `month` (1-12) should collect grades.
pub fn should_collect(config: &GradeConfig, month: u32) -> bool {
    config.enabled && (config.force || config.collection_months.contains(&month))
}

#[derive(Debug, Default)]
pub struct GradeRun {
    pub grades: Vec<GradeRecord>,
    /// Branches whose page carried no evaluation record.
    pub missing: usize,
    pub errors: Vec<CrawlError>,
}

impl GradeRun {
    pub fn log_summary(&self) {
        info!(
            "Grades: {} collected | {} without evaluation | {} errors",
            self.grades.len(),
            self.missing,
            self.errors.len()
        );
    }
}

pub struct GradeCollector {
    config: GradeConfig,
    source: Arc<dyn CooperativeSource>,
}

impl GradeCollector {
    pub fn new(config: GradeConfig, source: Arc<dyn CooperativeSource>) -> Self {
        Self { config, source }
    }

    pub fn is_due(&self, month: u32) -> bool {
        should_collect(&self.config, month)
    }

    /// Collect grades as of `month`. A closed gate yields an empty run and
    /// sends nothing.
    pub async fn collect_in_month(&self, branches: &[Branch], month: u32) -> GradeRun {
        if !self.is_due(month) {
            debug!("Grade gate closed for month {}", month);
            return GradeRun::default();
        }

        let period = self.config.period();
        info!("Collecting {} grades for {} branches", period, branches.len());

        let source = Arc::clone(&self.source);
        let mut set = spawn_bounded(branches.to_vec(), self.config.workers, |branch| {
            let source = Arc::clone(&source);
            let period = period.clone();
            async move {
                let result = source.fetch_grade(&branch, &period).await;
                (branch, result)
            }
        });

        let mut progress = Progress::new("Grades", branches.len(), GRADE_PROGRESS_EVERY);
        let mut run = GradeRun::default();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((branch, Ok(Some(raw)))) => {
                    let record = to_grade_record(&branch, raw, &self.config, Local::now().naive_local());
                    debug!("{} {}: {}", branch.code, branch.name, record.grade_name);
                    run.grades.push(record);
                }
                Ok((branch, Ok(None))) => {
                    info!("{} {}: no evaluation record", branch.code, branch.name);
                    run.missing += 1;
                }
                Ok((_, Err(e))) => {
                    warn!("✗ {}: {}", e.target(), e);
                    run.errors.push(CrawlError::from(&e));
                }
                Err(e) => {
                    warn!("Grade task failed: {}", e);
                    run.errors.push(CrawlError { target: "grade task".into(), cause: e.to_string() });
                }
            }
            progress.tick();
        }
        run
    }
}

fn to_grade_record(
    branch: &Branch,
    raw: RawGrade,
    config: &GradeConfig,
    collected_at: NaiveDateTime,
) -> GradeRecord {
    let grade_code = GradeCode::from_digit(&raw.grade_digit);
    let (name, description) = grade_label(grade_code);
    GradeRecord {
        branch_code: branch.code.clone(),
        branch_name: branch.name.clone(),
        region: branch.region.clone(),
        sub_region: branch.sub_region.clone(),
        evaluation_agency: raw.agency,
        evaluation_date: raw.evaluation_date,
        grade_code,
        grade_name: name.to_string(),
        grade_description: description.to_string(),
        evaluation_year: config.evaluation_year,
        evaluation_month: config.evaluation_month,
        collected_at,
    }
}
