//! Transaction module: saga bookkeeping and compensating rollback.
//!
//! Provides:
//! - `Transaction` / `Operation`: passive records of what a pipeline run did
//! - `RollbackRegistry`: operation kind → compensating action
//! - `TransactionManager`: lifecycle, commit, rollback, retention, statistics
//! - `TransactionJournal`: append-only audit log of finalized transactions

mod journal;
mod manager;
mod record;
mod registry;
mod scope;

pub use journal::*;
pub use manager::*;
pub use record::*;
pub use registry::*;
