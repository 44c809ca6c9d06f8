use std::path::Path;

use regex::{Regex, RegexBuilder};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{CardbookError, Result};
use crate::models::{ColumnMapping, MatcherRule};

fn mapping_from_row(row: &Row) -> rusqlite::Result<ColumnMapping> {
    Ok(ColumnMapping {
        id: row.get(0)?,
        name: row.get(1)?,
        date_column: row.get(2)?,
        description_column: row.get(3)?,
        amount_column: row.get(4)?,
        date_format: row.get(5)?,
    })
}

fn rule_from_row(row: &Row) -> rusqlite::Result<MatcherRule> {
    Ok(MatcherRule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        case_insensitive: row.get(2)?,
        account_path: row.get(3)?,
    })
}

pub fn compile_pattern(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| CardbookError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// A rule matches when its pattern matches at the start of the description.
pub fn pattern_matches(re: &Regex, description: &str) -> bool {
    re.find(description).is_some_and(|m| m.start() == 0)
}

pub fn add_column_mapping(
    conn: &Connection,
    name: &str,
    date_column: &str,
    description_column: &str,
    amount_column: &str,
    date_format: &str,
) -> Result<ColumnMapping> {
    let exists: bool = conn
        .prepare("SELECT 1 FROM column_maps WHERE name = ?1")?
        .exists([name])?;
    if exists {
        return Err(CardbookError::DuplicateMapping(name.to_string()));
    }
    conn.execute(
        "INSERT INTO column_maps (name, date_column, description_column, amount_column, date_format) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![name, date_column, description_column, amount_column, date_format],
    )?;
    Ok(ColumnMapping {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        date_column: date_column.to_string(),
        description_column: description_column.to_string(),
        amount_column: amount_column.to_string(),
        date_format: date_format.to_string(),
    })
}

/// Adding an identical pattern twice is a no-op returning the existing rule.
pub fn add_matcher_rule(
    conn: &Connection,
    pattern: &str,
    case_insensitive: bool,
    account_path: &str,
) -> Result<MatcherRule> {
    compile_pattern(pattern, case_insensitive)?;

    if let Some(existing) = get_rule_by_pattern(conn, pattern)? {
        return Ok(existing);
    }
    conn.execute(
        "INSERT INTO matcher_rules (pattern, case_insensitive, account_path) VALUES (?1, ?2, ?3)",
        rusqlite::params![pattern, case_insensitive, account_path],
    )?;
    Ok(MatcherRule {
        id: conn.last_insert_rowid(),
        pattern: pattern.to_string(),
        case_insensitive,
        account_path: account_path.to_string(),
    })
}

/// Bulk-load a rule definition file: CSV rows of
/// `cc_desc_re, re_no_case ("True"/"False"), account_path`.
/// Returns the number of rules actually added; duplicates are skipped.
pub fn load_rule_file(conn: &Connection, path: &Path) -> Result<usize> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    let idx = |name: &str| headers.iter().position(|h| h == name);
    let (Some(re_idx), Some(case_idx), Some(acct_idx)) =
        (idx("cc_desc_re"), idx("re_no_case"), idx("account_path"))
    else {
        return Err(CardbookError::InvalidPattern {
            pattern: path.display().to_string(),
            reason: "rule file missing cc_desc_re/re_no_case/account_path columns".to_string(),
        });
    };

    let mut added = 0usize;
    for result in rdr.records() {
        let record = result?;
        let pattern = record.get(re_idx).unwrap_or("").trim().to_string();
        if pattern.is_empty() {
            continue;
        }
        let case_insensitive = record
            .get(case_idx)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let account_path = record.get(acct_idx).unwrap_or("").trim().to_string();

        if get_rule_by_pattern(conn, &pattern)?.is_none() {
            add_matcher_rule(conn, &pattern, case_insensitive, &account_path)?;
            added += 1;
        }
    }
    Ok(added)
}

pub fn list_mappings(conn: &Connection) -> Result<Vec<ColumnMapping>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, date_column, description_column, amount_column, date_format \
         FROM column_maps ORDER BY id",
    )?;
    let mappings = stmt
        .query_map([], mapping_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(mappings)
}

/// Rules in insertion order; first match wins during classification.
pub fn list_rules(conn: &Connection) -> Result<Vec<MatcherRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, pattern, case_insensitive, account_path FROM matcher_rules ORDER BY id",
    )?;
    let rules = stmt
        .query_map([], rule_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<Option<MatcherRule>> {
    let rule = conn
        .query_row(
            "SELECT id, pattern, case_insensitive, account_path FROM matcher_rules WHERE id = ?1",
            [id],
            rule_from_row,
        )
        .optional()?;
    Ok(rule)
}

pub fn get_rule_by_pattern(conn: &Connection, pattern: &str) -> Result<Option<MatcherRule>> {
    let rule = conn
        .query_row(
            "SELECT id, pattern, case_insensitive, account_path FROM matcher_rules WHERE pattern = ?1",
            [pattern],
            rule_from_row,
        )
        .optional()?;
    Ok(rule)
}

/// Rules with their compiled patterns, in insertion order. Compiled once per
/// classification pass rather than per row.
pub fn compiled_rules(conn: &Connection) -> Result<Vec<(MatcherRule, Regex)>> {
    let mut out = Vec::new();
    for rule in list_rules(conn)? {
        let re = compile_pattern(&rule.pattern, rule.case_insensitive)?;
        out.push((rule, re));
    }
    Ok(out)
}
