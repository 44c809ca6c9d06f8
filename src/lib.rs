//! Credit-card batch classification and ledger reconciliation engine.
//!
//! Raw transaction files are imported as batches into a local SQLite cache,
//! classified against ordered regex matcher rules, and — once every row has
//! a resolved destination account that exists in the external double-entry
//! ledger — committed as balanced postings through the [`ledger::Ledger`]
//! contract. [`readiness`] reports the unmet prerequisites and the single
//! next action at any point in that pipeline.

pub mod accounts;
pub mod db;
pub mod error;
pub mod importer;
pub mod ledger;
pub mod models;
pub mod readiness;
pub mod reports;
pub mod rules;
pub mod sync;

pub use error::{CardbookError, Result};
pub use models::{Account, Batch, ColumnMapping, MatcherRule, RawSnapshot, Record, StandardRow};
pub use readiness::{DataNeeded, NextStep};
