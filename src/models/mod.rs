use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Target ────────────────────────────────────────────────────────────────────

/// One discovery request: a (region, sub-region) pair from the static directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub region: String,
    pub sub_region: String,
    /// The region's directory is just itself; query with an empty sub-region.
    pub collapsed: bool,
}

impl Target {
    /// Every target in the built-in region directory.
    pub fn directory() -> Vec<Target> {
        Self::from_table(crate::config::regions::REGIONS)
    }

    pub fn from_table(table: &[(&str, &[&str])]) -> Vec<Target> {
        table
            .iter()
            .flat_map(|(region, subs)| {
                let collapsed = subs.len() == 1 && subs[0] == *region;
                subs.iter().map(move |sub| Target {
                    region: region.to_string(),
                    sub_region: sub.to_string(),
                    collapsed,
                })
            })
            .collect()
    }

    /// Sub-region value actually sent to the portal.
    pub fn query_sub_region(&self) -> &str {
        if self.collapsed { "" } else { &self.sub_region }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collapsed {
            write!(f, "{}", self.region)
        } else {
            write!(f, "{} {}", self.region, self.sub_region)
        }
    }
}

// ── Branch ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub code: String, // 5 digits, unique per branch list
    pub name: String,
    pub region: String,
    pub sub_region: String,
    pub address: String,
    pub phone: String,
    pub category: String, // 지역 / 직장, empty when unknown
    pub discovered_at: NaiveDateTime,
}

/// The identifying part of a branch, embedded in rate and grade records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchRef {
    pub code: String,
    pub name: String,
    pub region: String,
    pub sub_region: String,
}

impl From<&Branch> for BranchRef {
    fn from(b: &Branch) -> Self {
        Self {
            code: b.code.clone(),
            name: b.name.clone(),
            region: b.region.clone(),
            sub_region: b.sub_region.clone(),
        }
    }
}

// ── Deposit products ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ProductCategory {
    SightDeposit,
    TermDeposit,
    InstallmentDeposit,
}

impl ProductCategory {
    /// Request order within one branch.
    pub const ALL: [ProductCategory; 3] = [
        ProductCategory::SightDeposit,
        ProductCategory::TermDeposit,
        ProductCategory::InstallmentDeposit,
    ];

    /// Portal `gubuncode` value.
    pub fn code(self) -> &'static str {
        match self {
            ProductCategory::SightDeposit => "12",
            ProductCategory::TermDeposit => "13",
            ProductCategory::InstallmentDeposit => "14",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProductCategory::SightDeposit => "요구불예탁금",
            ProductCategory::TermDeposit => "거치식예탁금",
            ProductCategory::InstallmentDeposit => "적립식예탁금",
        }
    }

    /// Sight deposits are published without a duration column.
    pub fn has_duration(self) -> bool {
        !matches!(self, ProductCategory::SightDeposit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductCategory::SightDeposit => "sight-deposit",
            ProductCategory::TermDeposit => "term-deposit",
            ProductCategory::InstallmentDeposit => "installment-deposit",
        }
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateQuote {
    pub product_name: String,
    pub product_category: ProductCategory,
    pub duration_months: u32, // always 0 for sight deposits
    pub rate_percent: f64,
    pub raw_duration_text: String,
    pub raw_rate_text: String,
}

impl RateQuote {
    /// Composite identity within one branch's result set.
    pub fn dedup_key(&self) -> (String, u32, u64, ProductCategory) {
        (
            self.product_name.clone(),
            self.duration_months,
            self.rate_percent.to_bits(),
            self.product_category,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchRateRecord {
    pub branch: BranchRef,
    pub base_date: String,
    pub products: Vec<RateQuote>,
    pub collected_at: NaiveDateTime,
    pub product_count: usize,
}

impl BranchRateRecord {
    /// `None` when the branch produced no valid quotes.
    pub fn new(
        branch: &Branch,
        base_date: String,
        products: Vec<RateQuote>,
        collected_at: NaiveDateTime,
    ) -> Option<Self> {
        if products.is_empty() {
            return None;
        }
        Some(Self {
            branch: BranchRef::from(branch),
            base_date,
            product_count: products.len(),
            products,
            collected_at,
        })
    }
}

// ── Management evaluation grades ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GradeCode {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "unknown")]
    Unknown,
}

impl GradeCode {
    pub fn from_digit(s: &str) -> Self {
        match s {
            "1" => GradeCode::One,
            "2" => GradeCode::Two,
            "3" => GradeCode::Three,
            "4" => GradeCode::Four,
            "5" => GradeCode::Five,
            _ => GradeCode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GradeRecord {
    pub branch_code: String,
    pub branch_name: String,
    pub region: String,
    pub sub_region: String,
    pub evaluation_agency: String,
    pub evaluation_date: String, // YYYYMMDD
    pub grade_code: GradeCode,
    pub grade_name: String,
    pub grade_description: String,
    pub evaluation_year: i32,
    pub evaluation_month: u32,
    pub collected_at: NaiveDateTime,
}

// ── Raw extracted rows ────────────────────────────────────────────────────────

/// Branch fields as found in one directory row, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBranchRow {
    pub code: Option<String>,
    pub name: Option<String>,
    pub sub_name: Option<String>,
    pub category: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// One rate table row: product name plus the duration/rate cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRateRow {
    pub product_name: String,
    pub duration_text: String,
    pub rate_text: String,
}

/// The `agency|YYYYMMDD|grade` triple embedded in an evaluation page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawGrade {
    pub agency: String,
    pub evaluation_date: String,
    pub grade_digit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_referential_region_collapses() {
        let table: &[(&str, &[&str])] = &[("세종", &["세종"]), ("광주", &["동구", "서구"])];
        let targets = Target::from_table(table);

        assert_eq!(targets.len(), 3);
        assert!(targets[0].collapsed);
        assert_eq!(targets[0].query_sub_region(), "");
        assert!(!targets[1].collapsed);
        assert_eq!(targets[1].query_sub_region(), "동구");
        assert_eq!(targets[2].to_string(), "광주 서구");
    }

    #[test]
    fn test_directory_contains_every_region() {
        let targets = Target::directory();
        assert!(targets.len() > 200);
        assert!(targets.iter().any(|t| t.region == "세종" && t.collapsed));
        assert!(targets.iter().filter(|t| t.collapsed).count() == 1);
    }

    #[test]
    fn test_category_serialises_kebab_case() {
        let json = serde_json::to_string(&ProductCategory::InstallmentDeposit).unwrap();
        assert_eq!(json, "\"installment-deposit\"");
        assert_eq!(ProductCategory::SightDeposit.to_string(), "sight-deposit");
    }

    #[test]
    fn test_grade_code_serialises_as_digit() {
        assert_eq!(serde_json::to_string(&GradeCode::Two).unwrap(), "\"2\"");
        assert_eq!(GradeCode::from_digit("9"), GradeCode::Unknown);
    }
}
