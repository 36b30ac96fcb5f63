use crate::models::{Branch, GradeCode, ProductCategory, RateQuote, RawBranchRow, RawRateRow, Target};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// ── Rule tables ───────────────────────────────────────────────────────────────

/// Product-name substrings accepted per category. Anything else in the rate
/// table (fees, footnotes, legacy products) is ignored.
pub const VALID_PRODUCTS: &[(ProductCategory, &[&str])] = &[
    (ProductCategory::SightDeposit, &["온라인자립예탁금", "상상모바일통장"]),
    (ProductCategory::TermDeposit, &["MG더뱅킹정기예금"]),
    (ProductCategory::InstallmentDeposit, &["MG더뱅킹정기적금", "MG더뱅킹자유적금"]),
];

/// Top-level administrative regions an address starts with.
pub const REGION_PREFIXES: &[&str] = &[
    "서울", "인천", "경기", "부산", "대구", "광주", "대전", "울산", "세종", "강원", "충북",
    "충남", "전북", "전남", "경북", "경남", "제주",
];

/// Branch category keywords, first match wins.
pub const BRANCH_CATEGORIES: &[&str] = &["지역", "직장"];

/// A name rendered 2, 3 or 4 times over is collapsed to one copy.
pub const NAME_REPEAT_DIVISORS: &[usize] = &[2, 3, 4];

pub const GRADE_LABELS: &[(GradeCode, &str, &str)] = &[
    (GradeCode::One, "우수", "경영상태가 매우 건전함"),
    (GradeCode::Two, "양호", "경영상태가 건전함"),
    (GradeCode::Three, "보통", "경영상태가 보통 수준임"),
    (GradeCode::Four, "취약", "경영상 취약점이 있어 개선이 필요함"),
    (GradeCode::Five, "위험", "경영상태가 위험하여 즉각적인 개선이 필요함"),
];

const UNKNOWN_GRADE: (&str, &str) = ("알수없음", "등급 정보 없음");

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d*)?").unwrap());

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Months from a duration cell: first run of digits, 0 when absent.
/// "12개월이상" → 12 | "36개월" → 36 | "" → 0
pub fn parse_duration(s: &str) -> u32 {
    DIGITS
        .find(s)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Percent from a rate cell, 0.0 when absent.
/// "3.25%" → 3.25 | "연 2.1 %" → 2.1 | "-" → 0.0
pub fn parse_rate(s: &str) -> f64 {
    let s = s.replace(['%', ','], "");
    DECIMAL
        .find(&s)
        .and_then(|m| m.as_str().trim_end_matches('.').parse().ok())
        .unwrap_or(0.0)
}

/// Undo the doubled-text rendering artifact in directory rows.
/// "새마을금고새마을금고" → "새마을금고" | "대한새마을금고" → unchanged
pub fn collapse_repeated_name(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    for &divisor in NAME_REPEAT_DIVISORS {
        if chars.len() < divisor || chars.len() % divisor != 0 {
            continue;
        }
        let size = chars.len() / divisor;
        let mut chunks = chars.chunks(size);
        let Some(first) = chunks.next() else { continue };
        if chunks.all(|c| c == first) {
            return first.iter().collect();
        }
    }
    s.to_string()
}

pub fn is_branch_code(s: &str) -> bool {
    s.len() == 5 && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_whitelisted_product(name: &str, category: ProductCategory) -> bool {
    VALID_PRODUCTS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, names)| names.iter().any(|n| name.contains(n)))
        .unwrap_or(false)
}

/// Human label and description for a grade code.
pub fn grade_label(code: GradeCode) -> (&'static str, &'static str) {
    GRADE_LABELS
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, desc)| (*name, *desc))
        .unwrap_or(UNKNOWN_GRADE)
}

// ── Directory row → Branch ────────────────────────────────────────────────────

pub fn branch_row_to_branch(
    raw: &RawBranchRow,
    target: &Target,
    now: NaiveDateTime,
) -> Option<Branch> {
    let code = raw.code.as_deref()?.trim();
    let name = raw.name.as_deref()?.trim();
    if !is_branch_code(code) || name.is_empty() {
        return None;
    }

    let name = match raw.sub_name.as_deref().map(str::trim) {
        Some(sub) if !sub.is_empty() => format!("{}({})", name, sub),
        _ => name.to_string(),
    };

    let field = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();

    Some(Branch {
        code: code.to_string(),
        name,
        region: target.region.clone(),
        sub_region: target.sub_region.clone(),
        address: field(&raw.address),
        phone: field(&raw.phone),
        category: field(&raw.category),
        discovered_at: now,
    })
}

// ── Rate row → RateQuote ──────────────────────────────────────────────────────

pub fn rate_row_to_quote(raw: &RawRateRow, category: ProductCategory) -> Option<RateQuote> {
    let product_name = raw.product_name.trim();
    if !is_whitelisted_product(product_name, category) {
        return None;
    }

    let duration_months = if category.has_duration() {
        parse_duration(&raw.duration_text)
    } else {
        0
    };
    let rate_percent = parse_rate(&raw.rate_text);

    let valid = if category.has_duration() {
        duration_months > 0 && rate_percent > 0.0
    } else {
        rate_percent > 0.0
    };
    if !valid {
        debug!(
            "Rejected {} row {:?}: duration={:?} rate={:?}",
            category, product_name, raw.duration_text, raw.rate_text
        );
        return None;
    }

    Some(RateQuote {
        product_name: product_name.to_string(),
        product_category: category,
        duration_months,
        rate_percent,
        raw_duration_text: raw.duration_text.clone(),
        raw_rate_text: raw.rate_text.clone(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn target() -> Target {
        Target { region: "서울".into(), sub_region: "종로구".into(), collapsed: false }
    }

    fn row(name: &str, duration: &str, rate: &str) -> RawRateRow {
        RawRateRow {
            product_name: name.into(),
            duration_text: duration.into(),
            rate_text: rate.into(),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12개월이상"), 12);
        assert_eq!(parse_duration("36개월"), 36);
        assert_eq!(parse_duration("-"), 0);
        assert_eq!(parse_duration(""), 0);
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("3.25%"), 3.25);
        assert_eq!(parse_rate("연 2.1 %"), 2.1);
        assert_eq!(parse_rate("4."), 4.0);
        assert_eq!(parse_rate("0%"), 0.0);
        assert_eq!(parse_rate("N/A"), 0.0);
    }

    #[test]
    fn test_collapse_repeated_name() {
        assert_eq!(collapse_repeated_name("새마을금고새마을금고"), "새마을금고");
        assert_eq!(collapse_repeated_name("종로종로종로"), "종로");
        assert_eq!(collapse_repeated_name("가나가나가나가나"), "가나");
        assert_eq!(collapse_repeated_name("대한새마을금고"), "대한새마을금고");
        assert_eq!(collapse_repeated_name("가"), "가");
        assert_eq!(collapse_repeated_name(""), "");
    }

    #[test]
    fn test_term_deposit_quote() {
        let q = rate_row_to_quote(
            &row("MG더뱅킹정기예금", "12개월이상", "3.25%"),
            ProductCategory::TermDeposit,
        )
        .unwrap();
        assert_eq!(q.duration_months, 12);
        assert_eq!(q.rate_percent, 3.25);
        assert_eq!(q.raw_rate_text, "3.25%");
    }

    #[test]
    fn test_zero_rate_rejected_for_every_category() {
        for (category, names) in VALID_PRODUCTS {
            let r = row(names[0], "12개월", "0%");
            assert!(rate_row_to_quote(&r, *category).is_none(), "{}", category);
        }
    }

    #[test]
    fn test_sight_deposit_has_no_duration() {
        let q = rate_row_to_quote(
            &row("상상모바일통장", "6개월", "0.10%"),
            ProductCategory::SightDeposit,
        )
        .unwrap();
        assert_eq!(q.duration_months, 0);
    }

    #[test]
    fn test_term_deposit_needs_duration() {
        let r = row("MG더뱅킹정기예금", "", "3.0%");
        assert!(rate_row_to_quote(&r, ProductCategory::TermDeposit).is_none());
    }

    #[test]
    fn test_whitelist_excludes_other_rows() {
        let r = row("중도해지이율", "12개월", "1.0%");
        assert!(rate_row_to_quote(&r, ProductCategory::TermDeposit).is_none());
        // right name, wrong category
        let r = row("MG더뱅킹정기예금", "12개월", "3.0%");
        assert!(rate_row_to_quote(&r, ProductCategory::InstallmentDeposit).is_none());
    }

    #[test]
    fn test_branch_row_composes_sub_name() {
        let raw = RawBranchRow {
            code: Some("01234".into()),
            name: Some("종로".into()),
            sub_name: Some("본점".into()),
            phone: Some(" 02-123-4567 ".into()),
            ..Default::default()
        };
        let b = branch_row_to_branch(&raw, &target(), now()).unwrap();
        assert_eq!(b.name, "종로(본점)");
        assert_eq!(b.phone, "02-123-4567");
        assert_eq!(b.region, "서울");
        assert_eq!(b.address, "");
    }

    #[test]
    fn test_branch_row_requires_code_and_name() {
        let bad_code = RawBranchRow {
            code: Some("1234".into()),
            name: Some("종로".into()),
            ..Default::default()
        };
        assert!(branch_row_to_branch(&bad_code, &target(), now()).is_none());

        let no_name = RawBranchRow { code: Some("01234".into()), ..Default::default() };
        assert!(branch_row_to_branch(&no_name, &target(), now()).is_none());
    }

    #[test]
    fn test_grade_label_lookup() {
        assert_eq!(grade_label(GradeCode::One).0, "우수");
        assert_eq!(grade_label(GradeCode::Unknown), UNKNOWN_GRADE);
    }
}
