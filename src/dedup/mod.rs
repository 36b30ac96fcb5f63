//! First-seen-wins deduplication by composite key.

use crate::models::{Branch, RateQuote};
use std::collections::HashSet;
use std::hash::Hash;

/// Keep the first record for each key, preserving input order.
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

/// Branches are unique by code.
pub fn dedup_branches(branches: impl IntoIterator<Item = Branch>) -> Vec<Branch> {
    dedup_by_key(branches, |b| b.code.clone())
}

/// Quotes are unique by (name, duration, rate, category) within one branch.
pub fn dedup_quotes(quotes: impl IntoIterator<Item = RateQuote>) -> Vec<RateQuote> {
    dedup_by_key(quotes, RateQuote::dedup_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductCategory;

    fn quote(name: &str, months: u32, rate: f64, category: ProductCategory) -> RateQuote {
        RateQuote {
            product_name: name.into(),
            product_category: category,
            duration_months: months,
            rate_percent: rate,
            raw_duration_text: format!("{}개월", months),
            raw_rate_text: format!("{}%", rate),
        }
    }

    #[test]
    fn test_first_seen_order_is_kept() {
        let out = dedup_by_key(vec![(1, 'a'), (2, 'b'), (1, 'c'), (3, 'd'), (2, 'e')], |p| p.0);
        assert_eq!(out, vec![(1, 'a'), (2, 'b'), (3, 'd')]);
    }

    #[test]
    fn test_quote_key_uses_every_component() {
        use ProductCategory::*;
        let quotes = vec![
            quote("MG더뱅킹정기예금", 12, 3.25, TermDeposit),
            quote("MG더뱅킹정기예금", 12, 3.25, TermDeposit),
            quote("MG더뱅킹정기예금", 6, 3.25, TermDeposit),
            quote("MG더뱅킹정기예금", 12, 3.30, TermDeposit),
            quote("MG더뱅킹정기예금", 12, 3.25, InstallmentDeposit),
        ];
        let once = dedup_quotes(quotes);
        assert_eq!(once.len(), 4);

        let twice = dedup_quotes(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert!(dedup_quotes(Vec::new()).is_empty());
    }
}
