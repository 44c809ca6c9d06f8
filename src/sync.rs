use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::error::{CardbookError, Result};
use crate::ledger::{find_by_path, walk_or_create, AccountKind, Ledger};
use crate::models::{Batch, StandardRow};
use crate::{accounts, importer, readiness, rules};

/// Create every locally-pending account in the external ledger, walking each
/// path hierarchically and creating only the missing segments. Idempotent:
/// a second run finds nothing pending and touches the ledger not at all.
/// Returns the number of accounts synced.
pub fn sync_pending_accounts<L: Ledger>(
    conn: &Connection,
    ledger: &mut L,
    currency: &str,
) -> Result<usize> {
    let pending = accounts::pending_accounts(conn)?;
    if pending.is_empty() {
        return Ok(0);
    }
    for account in &pending {
        walk_or_create(
            ledger,
            &account.path,
            AccountKind::Expense,
            currency,
            &account.description,
        )?;
    }
    ledger.persist()?;
    for account in &pending {
        accounts::mark_in_ledger(conn, &account.path)?;
    }
    Ok(pending.len())
}

fn resolve<L: Ledger>(ledger: &L, path: &str) -> Result<L::Handle> {
    find_by_path(ledger, path).ok_or_else(|| CardbookError::AccountNotFound(path.to_string()))
}

/// Commit a fully-classified batch to the external ledger as balanced
/// two-leg postings, one per record, in stored row order.
///
/// Non-payment records post the signed amount against the source (card)
/// account and the opposite sign against the matched destination. Payment
/// records post between the source account and `payments_account_path`, and
/// only when `include_payments` is set.
///
/// Returns the resulting balance of every touched account. A failure partway
/// through leaves already-written postings in place and the committed flag
/// unset; a retry will re-post those rows.
pub fn commit_batch<L: Ledger>(
    conn: &Connection,
    ledger: &mut L,
    batch: &Batch,
    source_account_path: &str,
    include_payments: bool,
    payments_account_path: Option<&str>,
    currency: &str,
) -> Result<BTreeMap<String, Decimal>> {
    let current = importer::get_batch_by_id(conn, batch.id)?
        .ok_or_else(|| CardbookError::UnknownBatch(batch.source_path.clone()))?;
    if current.committed {
        return Err(CardbookError::AlreadyCommitted(current.source_path));
    }
    if !readiness::is_commit_ready(conn, &current)? {
        return Err(CardbookError::NotReady(current.source_path));
    }

    let records = importer::get_records(conn, current.id)?;
    let source = resolve(ledger, source_account_path)?;

    let has_payments = records.iter().any(|r| r.is_payment);
    let payments = if include_payments && has_payments {
        let path = payments_account_path.ok_or(CardbookError::MissingPaymentsAccount)?;
        Some((path.to_string(), resolve(ledger, path)?))
    } else {
        None
    };

    let mut touched: BTreeSet<String> = BTreeSet::new();
    for record in &records {
        if record.is_payment {
            let Some((_, payments_account)) = payments.as_ref() else {
                continue;
            };
            ledger.create_posting(
                currency,
                record.date,
                "Payment",
                &[
                    (payments_account.clone(), -record.amount),
                    (source.clone(), record.amount),
                ],
            )?;
            continue;
        }

        let Some(rule_id) = record.rule_id else {
            return Err(CardbookError::NotReady(current.source_path.clone()));
        };
        let rule = rules::get_rule(conn, rule_id)?
            .ok_or_else(|| CardbookError::NotReady(current.source_path.clone()))?;
        let destination = resolve(ledger, &rule.account_path)?;
        ledger.create_posting(
            currency,
            record.date,
            &record.description,
            &[(source.clone(), record.amount), (destination, -record.amount)],
        )?;
        touched.insert(rule.account_path);
    }

    let mut balances = BTreeMap::new();
    for path in &touched {
        let handle = resolve(ledger, path)?;
        balances.insert(path.clone(), ledger.account_balance(&handle));
    }
    balances.insert(
        source_account_path.to_string(),
        ledger.account_balance(&source),
    );
    if let Some((path, handle)) = &payments {
        balances.insert(path.clone(), ledger.account_balance(handle));
    }

    ledger.persist()?;
    conn.execute("UPDATE batches SET committed = 1 WHERE id = ?1", [current.id])?;
    Ok(balances)
}

/// Pure projection of a batch into ledger-agnostic standardized rows; used
/// both to preview a commit and to emit the standardized report. Mutates
/// nothing.
pub fn standardize(
    conn: &Connection,
    batch: &Batch,
    include_payments: bool,
    payments_account_path: Option<&str>,
) -> Result<Vec<StandardRow>> {
    let mut rows = Vec::new();
    for record in importer::get_records(conn, batch.id)? {
        let account_path = if record.is_payment {
            if !include_payments {
                continue;
            }
            payments_account_path
                .ok_or(CardbookError::MissingPaymentsAccount)?
                .to_string()
        } else {
            let Some(rule_id) = record.rule_id else {
                return Err(CardbookError::UnresolvedDescription {
                    batch: batch.source_path.clone(),
                    description: record.description,
                });
            };
            rules::get_rule(conn, rule_id)?
                .ok_or_else(|| CardbookError::UnresolvedDescription {
                    batch: batch.source_path.clone(),
                    description: record.description.clone(),
                })?
                .account_path
        };
        rows.push(StandardRow {
            date: record.date,
            description: record.description,
            amount: record.amount,
            account_path,
        });
    }
    Ok(rows)
}

/// Write the standardized projection as the flat output file:
/// `Date,Description,Amount,DestinationAccount`.
pub fn write_standardized(
    conn: &Connection,
    batch: &Batch,
    out_path: &Path,
    include_payments: bool,
    payments_account_path: Option<&str>,
) -> Result<usize> {
    let rows = standardize(conn, batch, include_payments, payments_account_path)?;
    let mut wtr = csv::Writer::from_path(out_path)?;
    wtr.write_record(["Date", "Description", "Amount", "DestinationAccount"])?;
    for row in &rows {
        wtr.write_record([
            row.date.format("%Y-%m-%d").to_string(),
            row.description.clone(),
            row.amount.to_string(),
            row.account_path.clone(),
        ])?;
    }
    wtr.flush()?;
    Ok(rows.len())
}
