//! File-based snapshot store.
//!
//! Layout under the data directory:
//!
//! ```text
//! banks.json                      current branch list (overwritten each run)
//! rates/YYYY-MM-DD.json[.zst]     one rate snapshot per date
//! summary.json                    rolling per-date summaries
//! grades/grades_YYYY_MM.json      one grade file per evaluation period
//! backups/                        copies taken before any overwrite
//! ```
//!
//! Writes go in place (no rename), preceded by a timestamped backup whenever
//! the target already exists.

pub mod summary;

use crate::config::StorageConfig;
use crate::dedup::dedup_branches;
use crate::models::{Branch, BranchRateRecord, GradeRecord};
use anyhow::{Context, Result, bail};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use self::summary::{RateSummary, summarize};

pub const SCHEMA_VERSION: &str = "1.1";

const BRANCH_LIST_FILE: &str = "banks.json";
const SUMMARY_FILE: &str = "summary.json";
const PLAIN_EXT: &str = "json";
const COMPRESSED_EXT: &str = "json.zst";
const ZSTD_LEVEL: i32 = 3;
/// A backup always survives at least the day it was taken.
const MIN_BACKUP_RETENTION_DAYS: i64 = 1;

// ── File shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchListMetadata {
    pub total_count: usize,
    pub unique_count: usize,
    pub crawled_at: NaiveDateTime,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchListFile {
    pub metadata: BranchListMetadata,
    pub banks: Vec<Branch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatesMetadata {
    pub date: NaiveDate,
    pub total_banks: usize,
    pub successful_banks: usize,
    pub crawled_at: NaiveDateTime,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyRatesFile {
    pub metadata: RatesMetadata,
    pub summary: RateSummary,
    pub rates: Vec<BranchRateRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeCollectionInfo {
    pub collected_at: NaiveDateTime,
    pub total_banks: usize,
    pub evaluation_year: i32,
    pub evaluation_month: u32,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradesFile {
    pub collection_info: GradeCollectionInfo,
    pub grades: Vec<GradeRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StorageStats {
    pub data_dir: PathBuf,
    pub branch_list_exists: bool,
    pub rates_dir_exists: bool,
    pub backup_dir_exists: bool,
    pub available_dates: Vec<NaiveDate>,
    pub total_rate_files: usize,
    pub total_backup_files: usize,
    pub latest_date: Option<NaiveDate>,
    pub total_size_bytes: u64,
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct SnapshotStore {
    data_dir: PathBuf,
    rates_dir: PathBuf,
    grades_dir: PathBuf,
    backup_dir: PathBuf,
    config: StorageConfig,
}

impl SnapshotStore {
    /// Open (and create if needed) the directory tree under `config.data_dir`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        let store = Self {
            rates_dir: data_dir.join("rates"),
            grades_dir: data_dir.join("grades"),
            backup_dir: data_dir.join("backups"),
            data_dir,
            config: config.clone(),
        };

        for dir in [&store.data_dir, &store.rates_dir, &store.grades_dir, &store.backup_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;
        }
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn branch_list_path(&self) -> PathBuf {
        self.data_dir.join(BRANCH_LIST_FILE)
    }

    fn summary_path(&self) -> PathBuf {
        self.data_dir.join(SUMMARY_FILE)
    }

    fn rates_path(&self, date: NaiveDate, compressed: bool) -> PathBuf {
        let ext = if compressed { COMPRESSED_EXT } else { PLAIN_EXT };
        self.rates_dir.join(format!("{}.{}", date.format("%Y-%m-%d"), ext))
    }

    fn grades_path(&self, year: i32, month: u32) -> PathBuf {
        self.grades_dir.join(format!("grades_{}_{:02}.json", year, month))
    }

    // ── Branch list ───────────────────────────────────────────────────────────

    /// Deduplicate by code and overwrite the branch list. Returns the number
    /// of branches written; an empty input writes nothing.
    pub fn save_branches(&self, branches: &[Branch]) -> Result<usize> {
        if branches.is_empty() {
            warn!("No branches to save, keeping existing branch list");
            return Ok(0);
        }

        let unique = dedup_branches(branches.iter().cloned());
        if unique.len() != branches.len() {
            info!("Dropped duplicate branches: {} → {}", branches.len(), unique.len());
        }

        let file = BranchListFile {
            metadata: BranchListMetadata {
                total_count: unique.len(),
                unique_count: unique.iter().map(|b| &b.code).collect::<HashSet<_>>().len(),
                crawled_at: Local::now().naive_local(),
                version: SCHEMA_VERSION.to_string(),
            },
            banks: unique,
        };

        let path = self.branch_list_path();
        self.backup(&path)?;
        write_json(&path, &file)?;
        info!("🏦 Saved {} branches to {:?}", file.banks.len(), path);
        Ok(file.banks.len())
    }

    pub fn load_branches(&self) -> Result<Option<BranchListFile>> {
        read_json(&self.branch_list_path())
    }

    // ── Daily rates ───────────────────────────────────────────────────────────

    /// Write the snapshot for `date`. Large snapshots are zstd-compressed; the
    /// other variant for the same date, if any, is backed up and removed.
    pub fn save_daily_rates(&self, date: NaiveDate, rates: &[BranchRateRecord]) -> Result<usize> {
        if rates.is_empty() {
            warn!("No rate records to save for {}", date);
            return Ok(0);
        }

        let now = Local::now().naive_local();
        let file = DailyRatesFile {
            metadata: RatesMetadata {
                date,
                total_banks: rates.len(),
                successful_banks: rates.iter().filter(|r| r.product_count > 0).count(),
                crawled_at: now,
                version: SCHEMA_VERSION.to_string(),
            },
            summary: summarize(rates, now),
            rates: rates.to_vec(),
        };

        let compress = rates.len() > self.config.compress_threshold;
        let path = self.rates_path(date, compress);
        let stale = self.rates_path(date, !compress);

        self.backup(&path)?;
        if stale.exists() {
            self.backup(&stale)?;
            fs::remove_file(&stale).with_context(|| format!("Failed to remove {:?}", stale))?;
        }

        if compress {
            write_compressed_json(&path, &file)?;
        } else {
            write_json(&path, &file)?;
        }
        info!("💰 Saved rates for {} ({} branches) to {:?}", date, rates.len(), path);
        Ok(rates.len())
    }

    /// Plain snapshot first, compressed variant if the plain one is absent.
    pub fn get_rates_by_date(&self, date: NaiveDate) -> Result<Option<DailyRatesFile>> {
        let plain = self.rates_path(date, false);
        if plain.exists() {
            return read_json(&plain);
        }
        read_compressed_json(&self.rates_path(date, true))
    }

    pub fn get_latest_rates(&self) -> Result<Option<DailyRatesFile>> {
        match self.list_available_dates()?.first() {
            Some(date) => self.get_rates_by_date(*date),
            None => Ok(None),
        }
    }

    /// Dates with a rate snapshot, newest first. Other files are ignored.
    pub fn list_available_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates: BTreeSet<NaiveDate> = read_file_names(&self.rates_dir)?
            .iter()
            .filter_map(|name| snapshot_date(name))
            .collect();
        Ok(dates.into_iter().rev().collect())
    }

    // ── Rolling summary ───────────────────────────────────────────────────────

    pub fn save_summary(&self, date: NaiveDate, summary: &RateSummary) -> Result<()> {
        self.save_summary_at(date, summary, Local::now().date_naive())
    }

    /// Merge `summary` under `date`, then drop entries older than the window
    /// (relative to `today`) and keys that are not dates.
    pub fn save_summary_at(
        &self,
        date: NaiveDate,
        summary: &RateSummary,
        today: NaiveDate,
    ) -> Result<()> {
        let path = self.summary_path();
        let mut entries = self.load_summaries()?;
        entries.insert(date.format("%Y-%m-%d").to_string(), summary.clone());

        // a window reaching past the calendar keeps every dated entry
        let cutoff = days_before(today, self.config.summary_window_days).unwrap_or(NaiveDate::MIN);
        entries.retain(|key, _| match NaiveDate::parse_from_str(key, "%Y-%m-%d") {
            Ok(d) => d >= cutoff,
            Err(_) => {
                warn!("Dropping summary entry with non-date key {:?}", key);
                false
            }
        });

        self.backup(&path)?;
        write_json(&path, &entries)?;
        info!("📊 Saved summary for {} ({} dates retained)", date, entries.len());
        Ok(())
    }

    pub fn load_summaries(&self) -> Result<BTreeMap<String, RateSummary>> {
        Ok(read_json(&self.summary_path())?.unwrap_or_default())
    }

    // ── Grades ────────────────────────────────────────────────────────────────

    pub fn save_grades(&self, year: i32, month: u32, grades: &[GradeRecord]) -> Result<usize> {
        if grades.is_empty() {
            warn!("No grades to save for {}-{:02}", year, month);
            return Ok(0);
        }

        let file = GradesFile {
            collection_info: GradeCollectionInfo {
                collected_at: Local::now().naive_local(),
                total_banks: grades.len(),
                evaluation_year: year,
                evaluation_month: month,
                version: SCHEMA_VERSION.to_string(),
            },
            grades: grades.to_vec(),
        };

        let path = self.grades_path(year, month);
        self.backup(&path)?;
        write_json(&path, &file)?;
        info!("✓ Saved {} grades to {:?}", grades.len(), path);
        Ok(grades.len())
    }

    pub fn load_grades(&self, year: i32, month: u32) -> Result<Option<GradesFile>> {
        read_json(&self.grades_path(year, month))
    }

    pub fn grade_for_branch(&self, code: &str, year: i32, month: u32) -> Result<Option<GradeRecord>> {
        Ok(self
            .load_grades(year, month)?
            .and_then(|f| f.grades.into_iter().find(|g| g.branch_code == code)))
    }

    // ── Retention ─────────────────────────────────────────────────────────────

    pub fn cleanup_older_than(&self, days: i64) -> Result<usize> {
        self.cleanup_older_than_at(days, Local::now().date_naive())
    }

    /// Remove rate snapshots dated before `today - days`. Files whose name is
    /// not a snapshot date are left alone.
    pub fn cleanup_older_than_at(&self, days: i64, today: NaiveDate) -> Result<usize> {
        if days < 0 {
            bail!("Cleanup age must not be negative (got {})", days);
        }
        let Some(cutoff) = days_before(today, days) else {
            info!("No snapshot can be older than {} days; nothing to clean", days);
            return Ok(0);
        };
        let mut removed = 0usize;

        for name in read_file_names(&self.rates_dir)? {
            let Some(date) = snapshot_date(&name) else {
                debug!("Skipping non-snapshot file {:?}", name);
                continue;
            };
            if date >= cutoff {
                continue;
            }
            match fs::remove_file(self.rates_dir.join(&name)) {
                Ok(()) => {
                    removed += 1;
                    info!("🗑️  Removed old snapshot {}", name);
                }
                Err(e) => warn!("Could not remove {}: {}", name, e),
            }
        }

        if removed > 0 {
            info!("🧹 Cleanup removed {} file(s) older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<StorageStats> {
        let available_dates = self.list_available_dates()?;
        let total_size_bytes = WalkDir::new(&self.data_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();

        Ok(StorageStats {
            data_dir: self.data_dir.clone(),
            branch_list_exists: self.branch_list_path().exists(),
            rates_dir_exists: self.rates_dir.exists(),
            backup_dir_exists: self.backup_dir.exists(),
            latest_date: available_dates.first().copied(),
            total_rate_files: read_file_names(&self.rates_dir)?.len(),
            total_backup_files: read_file_names(&self.backup_dir)?.len(),
            available_dates,
            total_size_bytes,
        })
    }

    // ── Backups ───────────────────────────────────────────────────────────────

    /// Copy `path` into the backup directory if it exists, then prune old backups.
    fn backup(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Unnamed backup source {:?}", path))?;
        let (stem, ext) = name.split_once('.').unwrap_or((name, ""));
        let stamp = Local::now().format("%Y%m%d_%H%M%S%3f").to_string();

        // same-millisecond saves get a counter instead of replacing a backup
        let mut attempt = 0u32;
        let (dest, mut out) = loop {
            let suffix = if attempt == 0 { stamp.clone() } else { format!("{}_{}", stamp, attempt) };
            let backup_name = if ext.is_empty() {
                format!("{}_{}", stem, suffix)
            } else {
                format!("{}_{}.{}", stem, suffix, ext)
            };
            let dest = self.backup_dir.join(backup_name);
            match OpenOptions::new().write(true).create_new(true).open(&dest) {
                Ok(file) => break (dest, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e).with_context(|| format!("Could not create backup {:?}", dest)),
            }
        };

        let mut src = File::open(path).with_context(|| format!("Backup of {:?} failed", path))?;
        io::copy(&mut src, &mut out).with_context(|| format!("Backup of {:?} failed", path))?;
        debug!("Backed up {:?} → {:?}", path, dest);

        if let Err(e) = self.prune_backups() {
            warn!("Backup pruning failed: {:#}", e);
        }
        Ok(Some(dest))
    }

    fn prune_backups(&self) -> Result<usize> {
        let days = u64::try_from(self.config.backup_retention_days.max(MIN_BACKUP_RETENTION_DAYS))
            .unwrap_or(1);
        let retention = std::time::Duration::from_secs(days.saturating_mul(24 * 60 * 60));
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0usize;
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                fs::remove_file(entry.path())?;
                debug!("Pruned backup {:?}", entry.path());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `today - days`, or `None` when that falls outside the calendar.
fn days_before(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|d| today.checked_sub_signed(d))
}

/// `2026-07-01.json` / `2026-07-01.json.zst` → 2026-07-01
fn snapshot_date(name: &str) -> Option<NaiveDate> {
    let (stem, ext) = name.split_once('.')?;
    if ext != PLAIN_EXT && ext != COMPRESSED_EXT {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

fn read_file_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("Could not list {:?}", dir)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", path)),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(bytes) = read_bytes(path)? else { return Ok(None) };
    let value = serde_json::from_slice(&bytes).with_context(|| format!("Malformed JSON in {:?}", path))?;
    Ok(Some(value))
}

fn read_compressed_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(bytes) = read_bytes(path)? else { return Ok(None) };
    let raw = zstd::decode_all(&bytes[..]).with_context(|| format!("Corrupt zstd stream in {:?}", path))?;
    let value = serde_json::from_slice(&raw).with_context(|| format!("Malformed JSON in {:?}", path))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))
}

fn write_compressed_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let packed = zstd::encode_all(&bytes[..], ZSTD_LEVEL)?;
    fs::write(path, packed).with_context(|| format!("Failed to write {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchRef, GradeCode, ProductCategory, RateQuote};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SnapshotStore {
        store_with(dir, StorageConfig::default().compress_threshold)
    }

    fn store_with(dir: &TempDir, compress_threshold: usize) -> SnapshotStore {
        store_with_config(dir, StorageConfig { compress_threshold, ..StorageConfig::default() })
    }

    fn store_with_config(dir: &TempDir, config: StorageConfig) -> SnapshotStore {
        SnapshotStore::open(&StorageConfig { data_dir: dir.path().to_path_buf(), ..config }).unwrap()
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap().and_hms_opt(6, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn branch(code: &str, name: &str) -> Branch {
        Branch {
            code: code.into(),
            name: name.into(),
            region: "서울".into(),
            sub_region: "중구".into(),
            address: String::new(),
            phone: String::new(),
            category: String::new(),
            discovered_at: ts(),
        }
    }

    fn record(code: &str, rate: f64) -> BranchRateRecord {
        BranchRateRecord {
            branch: BranchRef::from(&branch(code, "금고")),
            base_date: String::new(),
            products: vec![RateQuote {
                product_name: "MG더뱅킹정기예금".into(),
                product_category: ProductCategory::TermDeposit,
                duration_months: 12,
                rate_percent: rate,
                raw_duration_text: "12개월".into(),
                raw_rate_text: format!("{}%", rate),
            }],
            collected_at: ts(),
            product_count: 1,
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"{}").unwrap();
    }

    #[test]
    fn test_branch_list_is_unique_by_code() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);

        let saved = s
            .save_branches(&[branch("00001", "가"), branch("00002", "나"), branch("00001", "다")])
            .unwrap();
        assert_eq!(saved, 2);

        let file = s.load_branches().unwrap().unwrap();
        assert_eq!(file.metadata.total_count, 2);
        assert_eq!(file.metadata.unique_count, 2);
        assert_eq!(file.metadata.version, SCHEMA_VERSION);
        assert_eq!(file.banks[0].name, "가");
    }

    #[test]
    fn test_empty_branch_list_keeps_previous() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save_branches(&[branch("00001", "가")]).unwrap();

        assert_eq!(s.save_branches(&[]).unwrap(), 0);
        assert_eq!(s.load_branches().unwrap().unwrap().banks.len(), 1);
    }

    #[test]
    fn test_resave_backs_up_previous_rates() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let day = date(2026, 10, 18);

        s.save_daily_rates(day, &[record("00001", 3.0)]).unwrap();
        s.save_daily_rates(day, &[record("00002", 3.1)]).unwrap();

        let current = s.get_rates_by_date(day).unwrap().unwrap();
        assert_eq!(current.rates[0].branch.code, "00002");

        let backups = read_file_names(&dir.path().join("backups")).unwrap();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with("2026-10-18_"));
        let old: DailyRatesFile = read_json(&dir.path().join("backups").join(&backups[0]))
            .unwrap()
            .unwrap();
        assert_eq!(old.rates[0].branch.code, "00001");
    }

    #[test]
    fn test_large_snapshot_is_compressed_and_readable() {
        let dir = TempDir::new().unwrap();
        let s = store_with(&dir, 1);
        let day = date(2026, 10, 18);

        s.save_daily_rates(day, &[record("00001", 3.0)]).unwrap();
        assert!(dir.path().join("rates/2026-10-18.json").exists());

        s.save_daily_rates(day, &[record("00001", 3.0), record("00002", 3.2)]).unwrap();
        assert!(dir.path().join("rates/2026-10-18.json.zst").exists());
        assert!(!dir.path().join("rates/2026-10-18.json").exists());

        let file = s.get_rates_by_date(day).unwrap().unwrap();
        assert_eq!(file.metadata.total_banks, 2);
        assert_eq!(file.summary.total_products, 2);
        assert_eq!(s.list_available_dates().unwrap(), vec![day]);
    }

    #[test]
    fn test_latest_rates_by_filename_date() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        for d in [date(2026, 6, 30), date(2026, 7, 1), date(2026, 6, 10)] {
            s.save_daily_rates(d, &[record("00001", 3.0)]).unwrap();
        }
        touch(&dir.path().join("rates/notes.json"));

        let latest = s.get_latest_rates().unwrap().unwrap();
        assert_eq!(latest.metadata.date, date(2026, 7, 1));
        assert_eq!(
            s.list_available_dates().unwrap(),
            vec![date(2026, 7, 1), date(2026, 6, 30), date(2026, 6, 10)]
        );
    }

    #[test]
    fn test_missing_date_is_none() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        assert!(s.get_rates_by_date(date(2026, 1, 1)).unwrap().is_none());
        assert!(s.get_latest_rates().unwrap().is_none());
    }

    #[test]
    fn test_cleanup_removes_only_old_snapshots() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let today = date(2026, 10, 18);
        let rates = dir.path().join("rates");

        touch(&rates.join("2026-10-18.json"));
        touch(&rates.join("2026-10-08.json"));
        touch(&rates.join("2026-09-08.json.zst"));
        touch(&rates.join("readme.txt"));
        touch(&rates.join("2020-13-45.json"));

        assert_eq!(s.cleanup_older_than_at(30, today).unwrap(), 1);
        assert!(!rates.join("2026-09-08.json.zst").exists());
        assert!(rates.join("2026-10-08.json").exists());
        assert!(rates.join("readme.txt").exists());
        assert!(rates.join("2020-13-45.json").exists());
    }

    #[test]
    fn test_summary_window_prunes_old_dates() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let today = date(2026, 10, 18);
        let summary = summarize(&[record("00001", 3.0)], ts());

        s.save_summary_at(date(2026, 5, 1), &summary, date(2026, 5, 1)).unwrap();
        s.save_summary_at(date(2026, 9, 1), &summary, today).unwrap();
        s.save_summary_at(today, &summary, today).unwrap();

        let entries = s.load_summaries().unwrap();
        let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["2026-09-01", "2026-10-18"]);
    }

    #[test]
    fn test_old_backups_are_pruned() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let stale = dir.path().join("backups/banks_20200101_000000000.json");
        touch(&stale);
        let ten_days = std::time::Duration::from_secs(10 * 24 * 60 * 60);
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - ten_days)
            .unwrap();

        s.save_branches(&[branch("00001", "가")]).unwrap();
        s.save_branches(&[branch("00002", "나")]).unwrap();

        let backups = read_file_names(&dir.path().join("backups")).unwrap();
        assert_eq!(backups.len(), 1);
        assert!(!stale.exists());
    }

    #[test]
    fn test_grades_round_trip_and_lookup() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let grade = GradeRecord {
            branch_code: "00007".into(),
            branch_name: "종로".into(),
            region: "서울".into(),
            sub_region: "종로구".into(),
            evaluation_agency: "중앙회".into(),
            evaluation_date: "20241231".into(),
            grade_code: GradeCode::Two,
            grade_name: "양호".into(),
            grade_description: String::new(),
            evaluation_year: 2024,
            evaluation_month: 12,
            collected_at: ts(),
        };

        s.save_grades(2024, 12, &[grade.clone()]).unwrap();
        assert!(dir.path().join("grades/grades_2024_12.json").exists());
        assert_eq!(s.grade_for_branch("00007", 2024, 12).unwrap(), Some(grade));
        assert!(s.grade_for_branch("00008", 2024, 12).unwrap().is_none());
        assert!(s.load_grades(2023, 12).unwrap().is_none());
    }

    #[test]
    fn test_stats_reflect_files() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        s.save_branches(&[branch("00001", "가")]).unwrap();
        s.save_daily_rates(date(2026, 10, 17), &[record("00001", 3.0)]).unwrap();
        s.save_daily_rates(date(2026, 10, 18), &[record("00001", 3.0)]).unwrap();

        let stats = s.stats().unwrap();
        assert!(stats.branch_list_exists);
        assert_eq!(stats.total_rate_files, 2);
        assert_eq!(stats.total_backup_files, 0);
        assert_eq!(stats.latest_date, Some(date(2026, 10, 18)));
        assert!(stats.total_size_bytes > 0);
    }

    #[test]
    fn test_cleanup_with_age_beyond_calendar_removes_nothing() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let rates = dir.path().join("rates");
        touch(&rates.join("2026-09-08.json"));

        assert_eq!(s.cleanup_older_than(1_000_000_000).unwrap(), 0);
        assert_eq!(s.cleanup_older_than_at(i64::MAX, date(2026, 10, 18)).unwrap(), 0);
        assert!(s.cleanup_older_than_at(-1, date(2026, 10, 18)).is_err());
        assert!(rates.join("2026-09-08.json").exists());
    }

    #[test]
    fn test_huge_summary_window_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let s = store_with_config(
            &dir,
            StorageConfig { summary_window_days: i64::MAX, ..StorageConfig::default() },
        );
        let summary = summarize(&[record("00001", 3.0)], ts());

        s.save_summary_at(date(2001, 1, 1), &summary, date(2026, 10, 18)).unwrap();
        assert_eq!(s.load_summaries().unwrap().len(), 1);
    }

    #[test]
    fn test_rapid_resaves_keep_every_backup() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let day = date(2026, 10, 18);

        for i in 1..=5 {
            s.save_daily_rates(day, &[record(&format!("{:05}", i), 3.0)]).unwrap();
        }

        let backup_dir = dir.path().join("backups");
        let mut codes: Vec<String> = read_file_names(&backup_dir)
            .unwrap()
            .iter()
            .map(|name| {
                let file: DailyRatesFile = read_json(&backup_dir.join(name)).unwrap().unwrap();
                file.rates[0].branch.code.clone()
            })
            .collect();
        codes.sort();
        assert_eq!(codes, vec!["00001", "00002", "00003", "00004"]);
    }

    #[test]
    fn test_negative_retention_keeps_fresh_backup() {
        let dir = TempDir::new().unwrap();
        let s = store_with_config(
            &dir,
            StorageConfig { backup_retention_days: -3, ..StorageConfig::default() },
        );

        s.save_branches(&[branch("00001", "가")]).unwrap();
        s.save_branches(&[branch("00002", "나")]).unwrap();
        assert_eq!(read_file_names(&dir.path().join("backups")).unwrap().len(), 1);
    }
}
