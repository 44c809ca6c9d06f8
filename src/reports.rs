use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::ledger::{account_defs, AccountKind, Ledger};
use crate::rules;

/// Distinct unmatched non-payment descriptions, each with the source files
/// it appeared in. Drives the human bulk-editing workflow that produces new
/// rule rows.
pub fn unmatched_descriptions(conn: &Connection) -> Result<Vec<(String, Vec<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT r.description, b.source_path FROM records r \
         JOIN batches b ON r.batch_id = b.id \
         WHERE r.rule_id IS NULL AND r.is_payment = 0 \
         ORDER BY r.description, b.source_path",
    )?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (description, source) in pairs {
        grouped.entry(description).or_default().insert(source);
    }
    Ok(grouped
        .into_iter()
        .map(|(description, files)| (description, files.into_iter().collect()))
        .collect())
}

/// CSV report `description,files` with the file list JSON-encoded in one cell.
pub fn write_unmatched_report(conn: &Connection, out_path: &Path) -> Result<usize> {
    let rows = unmatched_descriptions(conn)?;
    let mut wtr = csv::Writer::from_path(out_path)?;
    wtr.write_record(["description", "files"])?;
    for (description, files) in &rows {
        let files_json = serde_json::to_string(files)?;
        wtr.write_record([description.as_str(), files_json.as_str()])?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Rules whose destination account is not present in the ledger (absent from
/// the cache entirely, or cached but still pending sync), paired with the
/// referencing pattern. Drives human account creation before re-import.
pub fn rules_missing_accounts(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    for rule in rules::list_rules(conn)? {
        let present = crate::accounts::get_account(conn, &rule.account_path)?
            .map(|a| a.in_ledger)
            .unwrap_or(false);
        if !present && seen.insert(rule.account_path.clone()) {
            out.push((rule.account_path, rule.pattern));
        }
    }
    Ok(out)
}

/// CSV report `account_path,cc_desc_re` of accounts still to be created.
pub fn write_new_account_report(conn: &Connection, out_path: &Path) -> Result<usize> {
    let rows = rules_missing_accounts(conn)?;
    let mut wtr = csv::Writer::from_path(out_path)?;
    wtr.write_record(["account_path", "cc_desc_re"])?;
    for (account_path, pattern) in &rows {
        wtr.write_record([account_path.as_str(), pattern.as_str()])?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Export the ledger's expense account tree as CSV `account_path,description`.
pub fn write_account_defs<L: Ledger>(ledger: &L, out_path: &Path) -> Result<usize> {
    let defs = account_defs(ledger, AccountKind::Expense);
    let mut wtr = csv::Writer::from_path(out_path)?;
    wtr.write_record(["account_path", "description"])?;
    for def in &defs {
        wtr.write_record([def.path.as_str(), def.description.as_str()])?;
    }
    wtr.flush()?;
    Ok(defs.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::importer::import_batch;
    use crate::ledger::{walk_or_create, MemoryLedger};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn write_csv(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_unmatched_descriptions_grouped_by_file() {
        let (dir, conn) = test_db();
        let a = write_csv(
            dir.path(),
            "cc_a.csv",
            "Posted Date,Payee,Amount\n\
             01/05/2025,Kindle Svcs,-12.98\n\
             01/20/2025,Online payment,100.00\n",
        );
        let b = write_csv(
            dir.path(),
            "cc_b.csv",
            "Posted Date,Payee,Amount\n01/09/2025,Kindle Svcs,-3.99\n",
        );
        let batch_a = import_batch(&conn, &a, "MC1").unwrap();
        let batch_b = import_batch(&conn, &b, "MC2").unwrap();

        let rows = unmatched_descriptions(&conn).unwrap();
        assert_eq!(rows.len(), 1); // payment row excluded, description deduped
        assert_eq!(rows[0].0, "Kindle Svcs");
        assert_eq!(rows[0].1, vec![batch_a.source_path, batch_b.source_path]);
    }

    #[test]
    fn test_unmatched_report_round_trips() {
        let (dir, conn) = test_db();
        let a = write_csv(
            dir.path(),
            "cc_a.csv",
            "Posted Date,Payee,Amount\n01/05/2025,Kindle Svcs,-12.98\n",
        );
        import_batch(&conn, &a, "MC1").unwrap();
        let out = dir.path().join("no_match_results.csv");
        assert_eq!(write_unmatched_report(&conn, &out).unwrap(), 1);

        let mut rdr = csv::Reader::from_path(&out).unwrap();
        let row = rdr.records().next().unwrap().unwrap();
        assert_eq!(&row[0], "Kindle Svcs");
        let files: Vec<String> = serde_json::from_str(&row[1]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("cc_a.csv"));
    }

    #[test]
    fn test_rules_missing_accounts() {
        let (_dir, conn) = test_db();
        rules::add_matcher_rule(&conn, "^HEB", false, "Expenses:Groceries:Heb").unwrap();
        rules::add_matcher_rule(&conn, "^Kindle", false, "Expenses:Books:Online").unwrap();
        crate::accounts::add_account(&conn, "Expenses:Groceries:Heb", "").unwrap();
        crate::accounts::mark_in_ledger(&conn, "Expenses:Groceries:Heb").unwrap();

        let rows = rules_missing_accounts(&conn).unwrap();
        assert_eq!(rows, vec![("Expenses:Books:Online".to_string(), "^Kindle".to_string())]);
    }

    #[test]
    fn test_new_account_report() {
        let (dir, conn) = test_db();
        rules::add_matcher_rule(&conn, "^Kindle", false, "Expenses:Books:Online").unwrap();
        let out = dir.path().join("new_account_paths.csv");
        assert_eq!(write_new_account_report(&conn, &out).unwrap(), 1);
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.starts_with("account_path,cc_desc_re\n"));
        assert!(content.contains("Expenses:Books:Online,^Kindle"));
    }

    #[test]
    fn test_account_defs_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = MemoryLedger::new();
        walk_or_create(&mut ledger, "Expenses:Groceries", AccountKind::Expense, "USD", "food").unwrap();
        walk_or_create(&mut ledger, "Liabilities:MC1", AccountKind::Liability, "USD", "").unwrap();
        let out = dir.path().join("account_defs.csv");
        assert_eq!(write_account_defs(&ledger, &out).unwrap(), 1);
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.contains("Expenses:Groceries,food"));
        assert!(!content.contains("Liabilities"));
    }
}
