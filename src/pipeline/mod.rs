//! Pipeline module: staged indexing of documents under a transaction.
//!
//! - `coordinator`: one document through every stage, rolled back on failure
//! - `batch`: many documents concurrently, one result each
//! - `stages`: stage execution, retry and store record construction

mod batch;
mod coordinator;
pub(crate) mod stages;

pub use batch::*;
pub use coordinator::*;
