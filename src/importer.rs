use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::error::{CardbookError, Result};
use crate::models::{Batch, RawSnapshot, Record};
use crate::rules;

fn batch_from_row(row: &Row) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        source_path: row.get(1)?,
        external_id: row.get(2)?,
        mapping_id: row.get(3)?,
        committed: row.get(4)?,
    })
}

fn record_from_row(row: &Row) -> rusqlite::Result<Record> {
    let date_str: String = row.get(3)?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let amount_str: String = row.get(5)?;
    let amount = amount_str.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Record {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        row_number: row.get(2)?,
        date,
        description: row.get(4)?,
        amount,
        is_payment: row.get(6)?,
        rule_id: row.get(7)?,
    })
}

/// Import one raw transaction file as a batch.
///
/// The header and all data rows are captured verbatim so the batch can be
/// re-classified later without touching the filesystem. Any previous batch
/// for the same canonical path is deleted first, records cascading with it.
/// The whole import runs in one SQLite transaction: a bad row aborts
/// everything and leaves the prior batch in place.
pub fn import_batch(conn: &Connection, source_path: &Path, external_id: &str) -> Result<Batch> {
    let canonical = std::fs::canonicalize(source_path)?;
    let path_key = canonical.to_string_lossy().to_string();

    let mut rdr = csv::Reader::from_path(&canonical)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        raw_rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    let tx = conn.unchecked_transaction()?;

    tx.execute("DELETE FROM batches WHERE source_path = ?1", [&path_key])?;
    tx.execute(
        "INSERT INTO batches (source_path, external_id, mapping_id, committed) VALUES (?1, ?2, NULL, 0)",
        rusqlite::params![path_key, external_id],
    )?;
    let batch_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO batch_raw (batch_id, headers_json, rows_json) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            batch_id,
            serde_json::to_string(&headers)?,
            serde_json::to_string(&raw_rows)?,
        ],
    )?;

    // First mapping (in store order) whose three columns are all present in
    // the header wins. No match: keep the raw snapshot, materialize nothing.
    let mapping = rules::list_mappings(conn)?.into_iter().find(|m| {
        headers.iter().any(|h| *h == m.date_column)
            && headers.iter().any(|h| *h == m.description_column)
            && headers.iter().any(|h| *h == m.amount_column)
    });
    let Some(mapping) = mapping else {
        tx.commit()?;
        return Ok(Batch {
            id: batch_id,
            source_path: path_key,
            external_id: external_id.to_string(),
            mapping_id: None,
            committed: false,
        });
    };

    tx.execute(
        "UPDATE batches SET mapping_id = ?1 WHERE id = ?2",
        rusqlite::params![mapping.id, batch_id],
    )?;

    let col = |name: &str| headers.iter().position(|h| h.as_str() == name);
    let (Some(date_idx), Some(desc_idx), Some(amount_idx)) = (
        col(&mapping.date_column),
        col(&mapping.description_column),
        col(&mapping.amount_column),
    ) else {
        unreachable!("mapping columns were just checked against the header");
    };

    let matchers = rules::compiled_rules(conn)?;

    for (row_number, raw) in raw_rows.iter().enumerate() {
        let date_raw = raw.get(date_idx).map(|s| s.trim()).unwrap_or("");
        let date = NaiveDate::parse_from_str(date_raw, &mapping.date_format).map_err(|_| {
            CardbookError::DateParse {
                row: row_number,
                value: date_raw.to_string(),
                format: mapping.date_format.clone(),
            }
        })?;
        let description = raw.get(desc_idx).map(|s| s.trim()).unwrap_or("").to_string();
        let amount_raw = raw.get(amount_idx).map(|s| s.trim()).unwrap_or("");
        let amount: Decimal = amount_raw
            .parse()
            .map_err(|_| CardbookError::AmountParse {
                row: row_number,
                value: amount_raw.to_string(),
            })?;
        let is_payment = amount > Decimal::ZERO;

        let rule_id = matchers
            .iter()
            .find(|(_, re)| rules::pattern_matches(re, &description))
            .map(|(rule, _)| rule.id);

        tx.execute(
            "INSERT INTO records (batch_id, row_number, date, description, amount, is_payment, rule_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                batch_id,
                row_number as i64,
                date.format("%Y-%m-%d").to_string(),
                description,
                amount.to_string(),
                is_payment,
                rule_id,
            ],
        )?;
    }

    tx.commit()?;
    Ok(Batch {
        id: batch_id,
        source_path: path_key,
        external_id: external_id.to_string(),
        mapping_id: Some(mapping.id),
        committed: false,
    })
}

/// Full delete + re-import, used whenever rule or mapping state changes and
/// an existing batch's classification must be refreshed.
pub fn reload_batch(conn: &Connection, source_path: &Path, external_id: &str) -> Result<Batch> {
    import_batch(conn, source_path, external_id)
}

pub fn get_batch(conn: &Connection, source_path: &str) -> Result<Option<Batch>> {
    let batch = conn
        .query_row(
            "SELECT id, source_path, external_id, mapping_id, committed FROM batches WHERE source_path = ?1",
            [source_path],
            batch_from_row,
        )
        .optional()?;
    Ok(batch)
}

pub fn get_batch_by_id(conn: &Connection, id: i64) -> Result<Option<Batch>> {
    let batch = conn
        .query_row(
            "SELECT id, source_path, external_id, mapping_id, committed FROM batches WHERE id = ?1",
            [id],
            batch_from_row,
        )
        .optional()?;
    Ok(batch)
}

pub fn list_batches(conn: &Connection) -> Result<Vec<Batch>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_path, external_id, mapping_id, committed FROM batches ORDER BY id",
    )?;
    let batches = stmt
        .query_map([], batch_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

pub fn uncommitted_batches(conn: &Connection) -> Result<Vec<Batch>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_path, external_id, mapping_id, committed FROM batches \
         WHERE committed = 0 ORDER BY id",
    )?;
    let batches = stmt
        .query_map([], batch_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

/// Records of a batch in stored row order.
pub fn get_records(conn: &Connection, batch_id: i64) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_id, row_number, date, description, amount, is_payment, rule_id \
         FROM records WHERE batch_id = ?1 ORDER BY row_number",
    )?;
    let records = stmt
        .query_map([batch_id], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn raw_snapshot(conn: &Connection, batch_id: i64) -> Result<Option<RawSnapshot>> {
    let raw: Option<(String, String)> = conn
        .query_row(
            "SELECT headers_json, rows_json FROM batch_raw WHERE batch_id = ?1",
            [batch_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((headers_json, rows_json)) = raw else {
        return Ok(None);
    };
    Ok(Some(RawSnapshot {
        headers: serde_json::from_str(&headers_json)?,
        rows: serde_json::from_str(&rows_json)?,
    }))
}
