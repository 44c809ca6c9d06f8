use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{CardbookError, Result};

/// Hierarchy delimiter for account paths, e.g. `Expenses:Groceries:Heb`.
pub const PATH_SEP: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Root,
    Asset,
    Liability,
    Expense,
    Income,
}

/// Flat account definition extracted from (or destined for) the ledger tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountDef {
    pub path: String,
    pub description: String,
}

/// Contract the synchronizer expects from the external double-entry ledger.
///
/// All calls made within one `sync_pending_accounts` or `commit_batch`
/// invocation share one open session; `persist` ends the write session.
/// Handles are opaque and only valid against the ledger that issued them.
pub trait Ledger {
    type Handle: Clone;

    fn root_account(&self) -> Self::Handle;
    fn children(&self, parent: &Self::Handle) -> Vec<Self::Handle>;
    fn find_child(&self, parent: &Self::Handle, name: &str) -> Option<Self::Handle>;
    fn account_name(&self, account: &Self::Handle) -> String;
    fn account_kind(&self, account: &Self::Handle) -> AccountKind;
    fn account_description(&self, account: &Self::Handle) -> String;

    fn create_account(
        &mut self,
        parent: &Self::Handle,
        name: &str,
        kind: AccountKind,
        currency: &str,
        description: &str,
    ) -> Result<Self::Handle>;

    /// Record one balanced posting. Legs must sum to zero.
    fn create_posting(
        &mut self,
        currency: &str,
        date: NaiveDate,
        description: &str,
        legs: &[(Self::Handle, Decimal)],
    ) -> Result<()>;

    fn account_balance(&self, account: &Self::Handle) -> Decimal;

    fn persist(&mut self) -> Result<()>;
}

/// Walk an account path from the root, one segment per `find_child` call.
pub fn find_by_path<L: Ledger>(ledger: &L, path: &str) -> Option<L::Handle> {
    let mut current = ledger.root_account();
    for segment in path.split(PATH_SEP) {
        current = ledger.find_child(&current, segment)?;
    }
    Some(current)
}

/// Walk an account path from the root, creating any missing segment. Only the
/// leaf segment receives the description; intermediates get an empty one.
/// Returns the leaf handle and the number of accounts created, so a second
/// walk over an existing path reports zero creations.
pub fn walk_or_create<L: Ledger>(
    ledger: &mut L,
    path: &str,
    kind: AccountKind,
    currency: &str,
    description: &str,
) -> Result<(L::Handle, usize)> {
    let segments: Vec<&str> = path.split(PATH_SEP).collect();
    let mut current = ledger.root_account();
    let mut created = 0usize;
    for (idx, segment) in segments.iter().enumerate() {
        current = match ledger.find_child(&current, segment) {
            Some(child) => child,
            None => {
                let desc = if idx == segments.len() - 1 { description } else { "" };
                created += 1;
                ledger.create_account(&current, segment, kind, currency, desc)?
            }
        };
    }
    Ok((current, created))
}

/// Flatten the ledger's account tree into leaf definitions of one kind,
/// used to rebuild the shadow cache.
pub fn account_defs<L: Ledger>(ledger: &L, kind: AccountKind) -> Vec<AccountDef> {
    fn walk<L: Ledger>(
        ledger: &L,
        parent: &L::Handle,
        kind: AccountKind,
        prefix: Option<&str>,
        out: &mut Vec<AccountDef>,
    ) {
        for child in ledger.children(parent) {
            if ledger.account_kind(&child) != kind {
                continue;
            }
            let name = ledger.account_name(&child);
            let path = match prefix {
                Some(p) => format!("{p}{PATH_SEP}{name}"),
                None => name,
            };
            if ledger.children(&child).is_empty() {
                out.push(AccountDef {
                    path,
                    description: ledger.account_description(&child),
                });
            } else {
                walk(ledger, &child, kind, Some(&path), out);
            }
        }
    }

    let root = ledger.root_account();
    let mut out = Vec::new();
    walk(ledger, &root, kind, None, &mut out);
    out
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Node {
    name: String,
    kind: AccountKind,
    description: String,
    children: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Posting {
    #[allow(dead_code)]
    date: NaiveDate,
    #[allow(dead_code)]
    description: String,
    legs: Vec<(usize, Decimal)>,
}

/// Ledger implementation backed by plain vectors. Used by the test suite and
/// by callers without a real ledger backend. Tracks mutation and persist
/// counts so idempotence can be asserted.
#[derive(Debug)]
pub struct MemoryLedger {
    nodes: Vec<Node>,
    postings: Vec<Posting>,
    mutations: usize,
    persists: usize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger {
            nodes: vec![Node {
                name: "Root".to_string(),
                kind: AccountKind::Root,
                description: String::new(),
                children: Vec::new(),
            }],
            postings: Vec::new(),
            mutations: 0,
            persists: 0,
        }
    }

    /// Total account creations plus postings written.
    pub fn mutation_count(&self) -> usize {
        self.mutations
    }

    pub fn posting_count(&self) -> usize {
        self.postings.len()
    }

    pub fn persist_count(&self) -> usize {
        self.persists
    }
}

impl Ledger for MemoryLedger {
    type Handle = usize;

    fn root_account(&self) -> usize {
        0
    }

    fn children(&self, parent: &usize) -> Vec<usize> {
        self.nodes[*parent].children.clone()
    }

    fn find_child(&self, parent: &usize, name: &str) -> Option<usize> {
        self.nodes[*parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }

    fn account_name(&self, account: &usize) -> String {
        self.nodes[*account].name.clone()
    }

    fn account_kind(&self, account: &usize) -> AccountKind {
        self.nodes[*account].kind
    }

    fn account_description(&self, account: &usize) -> String {
        self.nodes[*account].description.clone()
    }

    fn create_account(
        &mut self,
        parent: &usize,
        name: &str,
        kind: AccountKind,
        _currency: &str,
        description: &str,
    ) -> Result<usize> {
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            children: Vec::new(),
        });
        self.nodes[*parent].children.push(id);
        self.mutations += 1;
        Ok(id)
    }

    fn create_posting(
        &mut self,
        _currency: &str,
        date: NaiveDate,
        description: &str,
        legs: &[(usize, Decimal)],
    ) -> Result<()> {
        let total: Decimal = legs.iter().map(|(_, amount)| *amount).sum();
        if !total.is_zero() {
            return Err(CardbookError::UnbalancedPosting(description.to_string()));
        }
        self.postings.push(Posting {
            date,
            description: description.to_string(),
            legs: legs.to_vec(),
        });
        self.mutations += 1;
        Ok(())
    }

    fn account_balance(&self, account: &usize) -> Decimal {
        self.postings
            .iter()
            .flat_map(|p| p.legs.iter())
            .filter(|(acct, _)| acct == account)
            .map(|(_, amount)| *amount)
            .sum()
    }

    fn persist(&mut self) -> Result<()> {
        self.persists += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_walk_or_create_builds_hierarchy() {
        let mut ledger = MemoryLedger::new();
        let (leaf, created) = walk_or_create(
            &mut ledger,
            "Expenses:Books:Online",
            AccountKind::Expense,
            "USD",
            "e-books",
        )
        .unwrap();
        assert_eq!(created, 3);
        assert_eq!(ledger.account_name(&leaf), "Online");
        assert_eq!(ledger.account_description(&leaf), "e-books");
        // Intermediate segments get an empty description
        let expenses = ledger.find_child(&ledger.root_account(), "Expenses").unwrap();
        assert_eq!(ledger.account_description(&expenses), "");
    }

    #[test]
    fn test_walk_or_create_is_idempotent() {
        let mut ledger = MemoryLedger::new();
        walk_or_create(&mut ledger, "Expenses:Misc", AccountKind::Expense, "USD", "").unwrap();
        let before = ledger.mutation_count();
        let (_, created) =
            walk_or_create(&mut ledger, "Expenses:Misc", AccountKind::Expense, "USD", "").unwrap();
        assert_eq!(created, 0);
        assert_eq!(ledger.mutation_count(), before);
    }

    #[test]
    fn test_find_by_path() {
        let mut ledger = MemoryLedger::new();
        walk_or_create(&mut ledger, "Expenses:Books:Online", AccountKind::Expense, "USD", "").unwrap();
        assert!(find_by_path(&ledger, "Expenses:Books:Online").is_some());
        assert!(find_by_path(&ledger, "Expenses:Books:Paper").is_none());
    }

    #[test]
    fn test_unbalanced_posting_rejected() {
        let mut ledger = MemoryLedger::new();
        let (a, _) = walk_or_create(&mut ledger, "Expenses:A", AccountKind::Expense, "USD", "").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let err = ledger
            .create_posting("USD", date, "broken", &[(a, dec("5.00"))])
            .unwrap_err();
        assert!(matches!(err, CardbookError::UnbalancedPosting(_)));
    }

    #[test]
    fn test_balance_sums_legs() {
        let mut ledger = MemoryLedger::new();
        let (a, _) = walk_or_create(&mut ledger, "Expenses:A", AccountKind::Expense, "USD", "").unwrap();
        let (b, _) = walk_or_create(&mut ledger, "Liabilities:Card", AccountKind::Liability, "USD", "").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        ledger
            .create_posting("USD", date, "x", &[(b, dec("-12.98")), (a, dec("12.98"))])
            .unwrap();
        ledger
            .create_posting("USD", date, "y", &[(b, dec("-1.02")), (a, dec("1.02"))])
            .unwrap();
        assert_eq!(ledger.account_balance(&a), dec("14.00"));
        assert_eq!(ledger.account_balance(&b), dec("-14.00"));
    }

    #[test]
    fn test_account_defs_leaf_only() {
        let mut ledger = MemoryLedger::new();
        walk_or_create(&mut ledger, "Expenses:Books:Online", AccountKind::Expense, "USD", "e-books").unwrap();
        walk_or_create(&mut ledger, "Expenses:Groceries", AccountKind::Expense, "USD", "food").unwrap();
        walk_or_create(&mut ledger, "Liabilities:Card", AccountKind::Liability, "USD", "").unwrap();
        let mut defs = account_defs(&ledger, AccountKind::Expense);
        defs.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            defs,
            vec![
                AccountDef {
                    path: "Expenses:Books:Online".to_string(),
                    description: "e-books".to_string()
                },
                AccountDef {
                    path: "Expenses:Groceries".to_string(),
                    description: "food".to_string()
                },
            ]
        );
    }
}
