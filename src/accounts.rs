use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{CardbookError, Result};
use crate::ledger::AccountDef;
use crate::models::Account;

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        path: row.get(1)?,
        description: row.get(2)?,
        in_ledger: row.get(3)?,
    })
}

/// Rebuild the ledger-sourced side of the cache from the ledger's current
/// account tree. Locally-added accounts that have not been synced persist; a
/// pending account whose path now arrives from the ledger is flipped to
/// present rather than duplicated.
pub fn reload_from_ledger(conn: &Connection, defs: &[AccountDef]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM accounts WHERE in_ledger = 1", [])?;
    for def in defs {
        let updated = tx.execute(
            "UPDATE accounts SET in_ledger = 1, description = ?2 WHERE path = ?1",
            rusqlite::params![def.path, def.description],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO accounts (path, description, in_ledger) VALUES (?1, ?2, 1)",
                rusqlite::params![def.path, def.description],
            )?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn add_account(conn: &Connection, path: &str, description: &str) -> Result<Account> {
    let exists: bool = conn
        .prepare("SELECT 1 FROM accounts WHERE path = ?1")?
        .exists([path])?;
    if exists {
        return Err(CardbookError::DuplicatePath(path.to_string()));
    }
    conn.execute(
        "INSERT INTO accounts (path, description, in_ledger) VALUES (?1, ?2, 0)",
        rusqlite::params![path, description],
    )?;
    Ok(Account {
        id: conn.last_insert_rowid(),
        path: path.to_string(),
        description: description.to_string(),
        in_ledger: false,
    })
}

pub fn get_account(conn: &Connection, path: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT id, path, description, in_ledger FROM accounts WHERE path = ?1",
            [path],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt =
        conn.prepare("SELECT id, path, description, in_ledger FROM accounts ORDER BY path")?;
    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Accounts defined locally but not yet created in the external ledger.
pub fn pending_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, path, description, in_ledger FROM accounts WHERE in_ledger = 0 ORDER BY path",
    )?;
    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

pub fn mark_in_ledger(conn: &Connection, path: &str) -> Result<()> {
    conn.execute("UPDATE accounts SET in_ledger = 1 WHERE path = ?1", [path])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn def(path: &str, description: &str) -> AccountDef {
        AccountDef {
            path: path.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_add_and_get_account() {
        let (_dir, conn) = test_db();
        add_account(&conn, "Expenses:Books:Online", "e-books").unwrap();
        let acct = get_account(&conn, "Expenses:Books:Online").unwrap().unwrap();
        assert!(!acct.in_ledger);
        assert_eq!(acct.description, "e-books");
        assert!(get_account(&conn, "Expenses:Nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let (_dir, conn) = test_db();
        add_account(&conn, "Expenses:Misc", "").unwrap();
        let err = add_account(&conn, "Expenses:Misc", "again").unwrap_err();
        assert!(matches!(err, CardbookError::DuplicatePath(p) if p == "Expenses:Misc"));
    }

    #[test]
    fn test_reload_replaces_ledger_entries() {
        let (_dir, conn) = test_db();
        reload_from_ledger(&conn, &[def("Expenses:Old", "")]).unwrap();
        reload_from_ledger(&conn, &[def("Expenses:New", "fresh")]).unwrap();
        assert!(get_account(&conn, "Expenses:Old").unwrap().is_none());
        let acct = get_account(&conn, "Expenses:New").unwrap().unwrap();
        assert!(acct.in_ledger);
    }

    #[test]
    fn test_reload_keeps_pending_accounts() {
        let (_dir, conn) = test_db();
        add_account(&conn, "Expenses:Pending", "not yet synced").unwrap();
        reload_from_ledger(&conn, &[def("Expenses:Groceries", "")]).unwrap();
        let pending = get_account(&conn, "Expenses:Pending").unwrap().unwrap();
        assert!(!pending.in_ledger);
    }

    #[test]
    fn test_reload_covers_pending_account_now_in_ledger() {
        let (_dir, conn) = test_db();
        add_account(&conn, "Expenses:Books", "local def").unwrap();
        reload_from_ledger(&conn, &[def("Expenses:Books", "ledger def")]).unwrap();
        let accts = list_accounts(&conn).unwrap();
        assert_eq!(accts.len(), 1);
        assert!(accts[0].in_ledger);
        assert!(pending_accounts(&conn).unwrap().is_empty());
    }
}
