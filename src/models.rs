use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Binding of named source-file columns to date/description/amount semantics.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub id: i64,
    pub name: String,
    pub date_column: String,
    pub description_column: String,
    pub amount_column: String,
    pub date_format: String,
}

/// Ordered pattern-to-account classification rule. Insertion order is
/// semantically significant: the first rule whose pattern matches wins.
#[derive(Debug, Clone)]
pub struct MatcherRule {
    pub id: i64,
    pub pattern: String,
    pub case_insensitive: bool,
    pub account_path: String,
}

/// Local mirror of one external-ledger account. The ledger is authoritative;
/// `in_ledger = false` marks an account defined locally but not yet synced.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub path: String,
    pub description: String,
    pub in_ledger: bool,
}

/// One imported transaction file. Keyed by canonical source path, so
/// re-importing the same file replaces the previous batch wholesale.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: i64,
    pub source_path: String,
    pub external_id: String,
    pub mapping_id: Option<i64>,
    pub committed: bool,
}

impl Batch {
    pub fn is_mapped(&self) -> bool {
        self.mapping_id.is_some()
    }
}

/// One classified transaction row belonging to a batch.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: i64,
    pub batch_id: i64,
    pub row_number: i64,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub is_payment: bool,
    pub rule_id: Option<i64>,
}

/// Verbatim header + rows captured at import time, so a batch can be
/// re-classified without re-reading the filesystem.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// One row of the ledger-agnostic standardized projection of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardRow {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub account_path: String,
}
