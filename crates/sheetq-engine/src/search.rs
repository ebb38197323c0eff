//! Row filter driven by a small query language.
//!
//! A query is a list of tokens separated by spaces or `+`:
//!
//! - `!term` excludes rows containing `term`,
//! - `a,b` or `a;b` keeps rows containing at least one of the alternatives,
//! - any other token must appear in the row.
//!
//! Full-width `，；！` and the ideographic space are accepted, and whitespace around `,`, `;`,
//! and `!` is ignored, so `apple , pear` means the same as `apple,pear`. Matching is a
//! case-insensitive substring test against each cell on its own.

use std::sync::OnceLock;

use regex::Regex;

use crate::row_store::{RowRecord, RowStore};

/// Fold full-width punctuation and drop whitespace touching `,` `;` or `!`.
pub fn normalize_query(query: &str) -> String {
    static PUNCT_SPACING_RE: OnceLock<Regex> = OnceLock::new();
    let re = PUNCT_SPACING_RE.get_or_init(|| Regex::new(r"\s*([,;!])\s*").expect("valid regex"));

    let folded: String = query
        .chars()
        .map(|c| match c {
            '，' => ',',
            '；' => ';',
            '！' => '!',
            '\u{3000}' => ' ',
            other => other,
        })
        .collect();
    re.replace_all(&folded, "$1").into_owned()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchCondition {
    pub and_terms: Vec<String>,
    pub or_terms: Vec<String>,
    pub not_terms: Vec<String>,
}

impl SearchCondition {
    /// Parse a raw query. Terms are stored lowercased.
    pub fn parse(query: &str) -> Self {
        let mut condition = SearchCondition::default();
        if query.trim().is_empty() {
            return condition;
        }

        let normalized = normalize_query(query);
        for token in normalized.split([' ', '+']).filter(|t| !t.is_empty()) {
            if let Some(rest) = token.strip_prefix('!') {
                push_term(&mut condition.not_terms, rest);
            } else if token.contains([',', ';']) {
                for alternative in token.split([',', ';']) {
                    push_term(&mut condition.or_terms, alternative);
                }
            } else {
                push_term(&mut condition.and_terms, token);
            }
        }
        condition
    }

    pub fn is_empty(&self) -> bool {
        self.and_terms.is_empty() && self.or_terms.is_empty() && self.not_terms.is_empty()
    }

    pub fn matches(&self, row: &RowRecord) -> bool {
        if self.is_empty() {
            return true;
        }

        let cells: Vec<String> = row
            .cells
            .iter()
            .filter_map(|cell| cell.search_text())
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase)
            .collect();
        let contains = |term: &str| cells.iter().any(|cell| cell.contains(term));

        if self.not_terms.iter().any(|term| contains(term)) {
            return false;
        }
        if !self.and_terms.iter().all(|term| contains(term)) {
            return false;
        }
        if !self.or_terms.is_empty() && !self.or_terms.iter().any(|term| contains(term)) {
            return false;
        }
        true
    }
}

fn push_term(terms: &mut Vec<String>, raw: &str) {
    let term = raw.trim();
    if !term.is_empty() {
        terms.push(term.to_lowercase());
    }
}

/// Snapshot of the rows of `store` matching `query`, renumbered from 1.
pub fn filter(store: &RowStore, query: &str) -> RowStore {
    let condition = SearchCondition::parse(query);
    filter_with(store, &condition)
}

pub fn filter_with(store: &RowStore, condition: &SearchCondition) -> RowStore {
    let rows = store
        .rows()
        .iter()
        .filter(|row| condition.matches(row))
        .zip(1u32..)
        .map(|(row, display_row)| RowRecord {
            display_row,
            cells: row.cells.clone(),
        })
        .collect();
    store.clone_with_rows(rows)
}
