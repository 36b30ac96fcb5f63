use crate::dedup::dedup_quotes;
use crate::models::{Branch, ProductCategory, RateQuote, RawBranchRow, RawGrade, RawRateRow, Target};
use anyhow::{Result, bail};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::cleaner::{
    BRANCH_CATEGORIES, REGION_PREFIXES, branch_row_to_branch, collapse_repeated_name,
    rate_row_to_quote,
};

static TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static TD: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static TITLED_SPAN: Lazy<Selector> = Lazy::new(|| Selector::parse("span[title]").unwrap());
static CONTENTS_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input#contentsdata").unwrap());

// ── Directory page ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HiddenField {
    Code,
    Name,
    SubName,
    Category,
    Phone,
    Address,
}

/// `title` attributes of the hidden metadata spans in a directory row.
const HIDDEN_FIELDS: &[(&str, HiddenField)] = &[
    ("gmgoCd", HiddenField::Code),
    ("name", HiddenField::Name),
    ("divNm", HiddenField::SubName),
    ("gmgoType", HiddenField::Category),
    ("telephone", HiddenField::Phone),
    ("addr", HiddenField::Address),
];

const MIN_HIDDEN_FIELDS: usize = 5;

/// Rows with fewer cells are layout/header rows, not branches.
const MIN_TEXT_CELLS: usize = 6;

static LEADING_CODE_AND_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5})([가-힣]+)").unwrap());
static SUB_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(([^)]+)\)").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"0\d{1,2}-\d{3,4}-\d{4}").unwrap());
static NEXT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{5}").unwrap());
static ADDRESS_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("(?:{})", REGION_PREFIXES.join("|"))).unwrap());

/// Parse one directory response into branches for `target`.
///
/// Each row is tried with the hidden-field strategy first and the flattened
/// text heuristic second. Rows neither strategy can turn into a valid branch
/// are dropped silently. A document without any table rows is an error.
pub fn parse_branch_page(html: &str, target: &Target, now: NaiveDateTime) -> Result<Vec<Branch>> {
    let doc = Html::parse_document(html);

    let mut rows = doc.select(&TR).peekable();
    if rows.peek().is_none() {
        bail!("no table rows in directory page");
    }

    let branches = rows
        .filter_map(|tr| {
            extract_hidden_fields(&tr)
                .and_then(|raw| branch_row_to_branch(&raw, target, now))
                .or_else(|| {
                    extract_from_text(&tr).and_then(|raw| branch_row_to_branch(&raw, target, now))
                })
        })
        .collect::<Vec<_>>();

    debug!("{}: {} branches parsed", target, branches.len());
    Ok(branches)
}

fn is_hidden(span: &ElementRef) -> bool {
    span.value()
        .attr("style")
        .map(|s| {
            let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            s.to_ascii_lowercase().contains("display:none")
        })
        .unwrap_or(false)
}

/// Structured strategy: hidden `<span title=..>` metadata fields.
fn extract_hidden_fields(tr: &ElementRef) -> Option<RawBranchRow> {
    let mut raw = RawBranchRow::default();
    let mut found = 0usize;

    for span in tr.select(&TITLED_SPAN).filter(is_hidden) {
        let Some(title) = span.value().attr("title") else { continue };
        let Some((_, field)) = HIDDEN_FIELDS.iter().find(|(t, _)| *t == title) else {
            continue;
        };
        let value = Some(flatten_text(&span));
        found += 1;
        match field {
            HiddenField::Code => raw.code = value,
            HiddenField::Name => raw.name = value,
            HiddenField::SubName => raw.sub_name = value,
            HiddenField::Category => raw.category = value,
            HiddenField::Phone => raw.phone = value,
            HiddenField::Address => raw.address = value,
        }
    }

    if found < MIN_HIDDEN_FIELDS { None } else { Some(raw) }
}

/// Heuristic strategy over the row's flattened text. Best effort: the rules
/// live in the tables in `cleaner` and the regexes above.
fn extract_from_text(tr: &ElementRef) -> Option<RawBranchRow> {
    if tr.select(&TD).count() < MIN_TEXT_CELLS {
        return None;
    }

    let text = flatten_text(tr);
    let caps = LEADING_CODE_AND_NAME.captures(&text)?;
    let code = caps[1].to_string();
    let name = collapse_repeated_name(&caps[2]);

    let mut rest = &text[caps.get(0)?.end()..];
    let mut sub_name = None;
    if let Some(sub) = SUB_NAME.captures(rest) {
        sub_name = Some(sub[1].trim().to_string());
        rest = &rest[sub.get(0)?.end()..];
    }

    let phone = PHONE.find(rest).map(|m| m.as_str().to_string());
    let address = find_address(rest);
    let category = BRANCH_CATEGORIES
        .iter()
        .find(|kw| rest.contains(*kw))
        .map(|kw| kw.to_string());

    Some(RawBranchRow {
        code: Some(code),
        name: Some(name),
        sub_name,
        category,
        phone,
        address,
    })
}

/// From the first region prefix up to the next 5-digit code or end of text,
/// with a trailing phone number cut off.
fn find_address(text: &str) -> Option<String> {
    let start = ADDRESS_START.find(text)?.start();
    let from = &text[start..];
    let end = NEXT_CODE.find(from).map(|m| m.start()).unwrap_or(from.len());
    let mut address = &from[..end];
    if let Some(phone) = PHONE.find(address) {
        address = &address[..phone.start()];
    }
    let address = address.trim();
    if address.is_empty() { None } else { Some(address.to_string()) }
}

// ── Rate page ─────────────────────────────────────────────────────────────────

/// Row selectors for the rate table, most specific first.
pub const RATE_ROW_SELECTORS: &[&str] = &[
    ".tblWrap #divTmp1 tbody tr",
    ".tblWrap tbody tr",
    "table tbody tr",
    ".rate-table tbody tr",
    "tbody tr",
];

const BASE_DATE_SELECTORS: &[&str] = &[".base-date", ".date", "[class*=\"date\"]"];

static DATE_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}").unwrap());

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatePage {
    pub base_date: Option<String>,
    pub quotes: Vec<RateQuote>,
}

/// Parse one branch's rate page for a single product category.
pub fn parse_rate_page(html: &str, category: ProductCategory) -> Result<RatePage> {
    let doc = Html::parse_document(html);

    let Some(rows) = find_rate_rows(&doc) else {
        bail!("no rate table matched any of {} selectors", RATE_ROW_SELECTORS.len());
    };

    let quotes = rows
        .iter()
        .filter_map(|tr| rate_row(tr, category))
        .filter_map(|raw| rate_row_to_quote(&raw, category));

    Ok(RatePage {
        base_date: extract_base_date(&doc),
        quotes: dedup_quotes(quotes),
    })
}

fn find_rate_rows(doc: &Html) -> Option<Vec<ElementRef<'_>>> {
    for selector_str in RATE_ROW_SELECTORS {
        let Ok(sel) = Selector::parse(selector_str) else { continue };
        let rows: Vec<ElementRef> = doc.select(&sel).collect();
        if !rows.is_empty() {
            return Some(rows);
        }
    }
    None
}

/// Sight deposits: name | … | rate. Others: name | … | duration | rate.
fn rate_row(tr: &ElementRef, category: ProductCategory) -> Option<RawRateRow> {
    let cells: Vec<String> = tr.select(&TD).map(|td| flatten_text(&td)).collect();
    if cells.len() < 2 {
        return None;
    }

    let product_name = cells[0].clone();
    let rate_text = cells[cells.len() - 1].clone();
    let duration_text = if category.has_duration() {
        cells[cells.len() - 2].clone()
    } else {
        String::new()
    };

    Some(RawRateRow { product_name, duration_text, rate_text })
}

fn extract_base_date(doc: &Html) -> Option<String> {
    for selector_str in BASE_DATE_SELECTORS {
        let Ok(sel) = Selector::parse(selector_str) else { continue };
        let Some(el) = doc.select(&sel).next() else { continue };
        let text = flatten_text(&el);
        if text.is_empty() {
            continue;
        }
        return Some(
            DATE_TEXT
                .find(&text)
                .map(|m| m.as_str().to_string())
                .unwrap_or(text),
        );
    }

    let text = flatten_text(&doc.root_element());
    DATE_TEXT.find(&text).map(|m| m.as_str().to_string())
}

// ── Evaluation page ───────────────────────────────────────────────────────────

/// Record marker, agency, 8-digit evaluation date and 1-digit grade.
static GRADE_PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"31000001([^|]+)\|([0-9]{8})\|([0-9])").unwrap());

/// First (most recent) evaluation embedded in the page's `contentsdata` field.
pub fn parse_grade_page(html: &str) -> Option<RawGrade> {
    let doc = Html::parse_document(html);
    let payload = doc.select(&CONTENTS_INPUT).next()?.value().attr("value")?;

    let caps = GRADE_PAYLOAD.captures(payload)?;
    Some(RawGrade {
        agency: caps[1].trim().to_string(),
        evaluation_date: caps[2].to_string(),
        grade_digit: caps[3].to_string(),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Concatenate the element's text nodes, each trimmed, with no separator.
fn flatten_text(el: &ElementRef) -> String {
    el.text().map(str::trim).filter(|s| !s.is_empty()).collect()
}
