use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{CardbookError, Result};
use crate::models::{Batch, ColumnMapping, MatcherRule};
use crate::{importer, rules};

/// One currently-unmet prerequisite. Readiness is recomputed on demand as a
/// set of these, never transitioned by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataNeeded {
    Ledger,
    Batch,
    ColumnMapping,
    MatcherRule,
    Account,
    AccountSync,
}

/// The single highest-priority next action. `ImportBatch` doubles as the
/// initial and the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    ConfigureLedger,
    ImportBatch,
    AddColumnMapping,
    AddMatcherRule,
    AddAccount,
    SyncAccounts,
    CommitBatch,
}

// ---------------------------------------------------------------------------
// Ledger configuration
// ---------------------------------------------------------------------------

pub fn ledger_file(conn: &Connection) -> Result<Option<String>> {
    let path = conn
        .query_row("SELECT ledger_file FROM meta WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    Ok(path.flatten())
}

/// Bind the cache to one external ledger file. The binding is permanent:
/// pointing an existing cache at a different ledger is refused.
pub fn set_ledger_file(conn: &Connection, path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy().to_string();
    match ledger_file(conn)? {
        Some(existing) if existing != path_str => Err(CardbookError::LedgerUnavailable(format!(
            "cache is already bound to ledger {existing}"
        ))),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT INTO meta (id, ledger_file) VALUES (1, ?1) \
                 ON CONFLICT(id) DO UPDATE SET ledger_file = ?1",
                [&path_str],
            )?;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Readiness computation
// ---------------------------------------------------------------------------

fn unmatched_nonpayment_count(conn: &Connection, batch_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT count(*) FROM records WHERE batch_id = ?1 AND is_payment = 0 AND rule_id IS NULL",
        [batch_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Matched vs unmatched-non-payment row counts for one batch.
pub fn batch_match_counts(conn: &Connection, batch_id: i64) -> Result<(i64, i64)> {
    let matched: i64 = conn.query_row(
        "SELECT count(*) FROM records WHERE batch_id = ?1 AND rule_id IS NOT NULL",
        [batch_id],
        |row| row.get(0),
    )?;
    Ok((matched, unmatched_nonpayment_count(conn, batch_id)?))
}

/// A batch is ready to commit iff it is mapped and every record is either a
/// payment or carries a matcher whose target account is present in the ledger.
pub fn is_commit_ready(conn: &Connection, batch: &Batch) -> Result<bool> {
    if !batch.is_mapped() {
        return Ok(false);
    }
    let blocking: i64 = conn.query_row(
        "SELECT count(*) FROM records r \
         LEFT JOIN matcher_rules m ON r.rule_id = m.id \
         LEFT JOIN accounts a ON a.path = m.account_path \
         WHERE r.batch_id = ?1 AND r.is_payment = 0 \
           AND (r.rule_id IS NULL OR a.id IS NULL OR a.in_ledger = 0)",
        [batch.id],
        |row| row.get(0),
    )?;
    Ok(blocking == 0)
}

/// The set of currently unmet prerequisites across all stores.
pub fn data_needs(conn: &Connection) -> Result<BTreeSet<DataNeeded>> {
    let mut needs = BTreeSet::new();

    if ledger_file(conn)?.is_none() {
        needs.insert(DataNeeded::Ledger);
    }

    let batches = importer::list_batches(conn)?;
    if batches.is_empty() {
        needs.insert(DataNeeded::Batch);
    } else {
        for batch in &batches {
            if !batch.is_mapped() {
                needs.insert(DataNeeded::ColumnMapping);
            }
            if unmatched_nonpayment_count(conn, batch.id)? > 0 {
                needs.insert(DataNeeded::MatcherRule);
            }
        }
    }

    for rule in rules::list_rules(conn)? {
        match crate::accounts::get_account(conn, &rule.account_path)? {
            None => {
                needs.insert(DataNeeded::Account);
            }
            Some(account) if !account.in_ledger => {
                needs.insert(DataNeeded::AccountSync);
            }
            Some(_) => {}
        }
    }

    Ok(needs)
}

/// Report the single next action, in strict priority order over prerequisite
/// kinds. As soon as any batch exhibits a missing-mapping condition, that is
/// reported before matcher or account issues are even considered.
pub fn next_step(conn: &Connection) -> Result<NextStep> {
    let needs = data_needs(conn)?;
    if needs.contains(&DataNeeded::Ledger) {
        return Ok(NextStep::ConfigureLedger);
    }
    if needs.contains(&DataNeeded::Batch) {
        return Ok(NextStep::ImportBatch);
    }
    if needs.contains(&DataNeeded::ColumnMapping) {
        return Ok(NextStep::AddColumnMapping);
    }
    if needs.contains(&DataNeeded::MatcherRule) {
        return Ok(NextStep::AddMatcherRule);
    }
    if needs.contains(&DataNeeded::Account) {
        return Ok(NextStep::AddAccount);
    }
    if needs.contains(&DataNeeded::AccountSync) {
        return Ok(NextStep::SyncAccounts);
    }
    if !importer::uncommitted_batches(conn)?.is_empty() {
        return Ok(NextStep::CommitBatch);
    }
    Ok(NextStep::ImportBatch)
}

// ---------------------------------------------------------------------------
// Refresh sweeps — full batch reclassifications, never partial patches
// ---------------------------------------------------------------------------

fn reload_unmapped(conn: &Connection) -> Result<usize> {
    let mut reloaded = 0usize;
    for batch in importer::uncommitted_batches(conn)? {
        if !batch.is_mapped() {
            importer::reload_batch(conn, Path::new(&batch.source_path), &batch.external_id)?;
            reloaded += 1;
        }
    }
    Ok(reloaded)
}

fn reload_unmatched(conn: &Connection) -> Result<usize> {
    let mut reloaded = 0usize;
    for batch in importer::uncommitted_batches(conn)? {
        if unmatched_nonpayment_count(conn, batch.id)? > 0 {
            importer::reload_batch(conn, Path::new(&batch.source_path), &batch.external_id)?;
            reloaded += 1;
        }
    }
    Ok(reloaded)
}

/// Add a column mapping, then reload every currently-unmapped batch so the
/// new mapping can bind and its records materialize.
pub fn add_mapping_and_refresh(
    conn: &Connection,
    name: &str,
    date_column: &str,
    description_column: &str,
    amount_column: &str,
    date_format: &str,
) -> Result<ColumnMapping> {
    let mapping = rules::add_column_mapping(
        conn,
        name,
        date_column,
        description_column,
        amount_column,
        date_format,
    )?;
    reload_unmapped(conn)?;
    Ok(mapping)
}

/// Add a matcher rule, then reload every batch with unmatched non-payment
/// rows so the new rule can claim them.
pub fn add_rule_and_refresh(
    conn: &Connection,
    pattern: &str,
    case_insensitive: bool,
    account_path: &str,
) -> Result<MatcherRule> {
    let rule = rules::add_matcher_rule(conn, pattern, case_insensitive, account_path)?;
    reload_unmatched(conn)?;
    Ok(rule)
}

/// Bulk-load a rule file, then reload every batch with unmatched rows.
pub fn load_rule_file_and_refresh(conn: &Connection, path: &Path) -> Result<usize> {
    let added = rules::load_rule_file(conn, path)?;
    reload_unmatched(conn)?;
    Ok(added)
}

// ---------------------------------------------------------------------------
// Inspection helpers
// ---------------------------------------------------------------------------

/// Batches still blocked on a mapping and batches with unmatched rows.
pub fn unfinished_batches(conn: &Connection) -> Result<(Vec<Batch>, Vec<Batch>)> {
    let mut unmapped = Vec::new();
    let mut unmatched = Vec::new();
    for batch in importer::list_batches(conn)? {
        if !batch.is_mapped() {
            unmapped.push(batch.clone());
        }
        if unmatched_nonpayment_count(conn, batch.id)? > 0 {
            unmatched.push(batch);
        }
    }
    Ok((unmapped, unmatched))
}

pub fn committable_batches(conn: &Connection) -> Result<Vec<Batch>> {
    let mut ready = Vec::new();
    for batch in importer::uncommitted_batches(conn)? {
        if is_commit_ready(conn, &batch)? {
            ready.push(batch);
        }
    }
    Ok(ready)
}

/// Account paths referenced by rules but absent from the cache, and paths
/// present locally but not yet created in the ledger.
pub fn missing_accounts(conn: &Connection) -> Result<(Vec<String>, Vec<String>)> {
    let mut missing = Vec::new();
    let mut unsynced = Vec::new();
    let mut seen = BTreeSet::new();
    for rule in rules::list_rules(conn)? {
        if !seen.insert(rule.account_path.clone()) {
            continue;
        }
        match crate::accounts::get_account(conn, &rule.account_path)? {
            None => missing.push(rule.account_path),
            Some(account) if !account.in_ledger => unsynced.push(rule.account_path),
            Some(_) => {}
        }
    }
    Ok((missing, unsynced))
}
