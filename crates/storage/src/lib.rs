//! Docket storage for docketchain.
//!
//! The validator core talks to storage only through the [`DocketStore`]
//! port. Two backends are provided:
//! - [`SledDocketStore`]: embedded sled database, one key space per ledger
//! - [`MemoryDocketStore`]: volatile, for tests and single-process runs
//!
//! Both enforce the same append rule: a ledger starts at an approved genesis
//! docket and every later docket extends the current head by exactly one.
//!
//! # Example
//!
//! ```rust,no_run
//! use docketchain_storage::{DocketStore, SledDocketStore};
//!
//! # async fn run() -> docketchain_storage::Result<()> {
//! let store = SledDocketStore::open("./docket_data")?;
//! if let Some(head) = store.latest_docket("ledger-1").await? {
//!     println!("ledger-1 is at sequence {}", head.sequence_number);
//! }
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod sled_store;
pub mod store;

// Re-export commonly used types
pub use db::{BatchOp, Result, Storage, StorageError};
pub use sled_store::SledDocketStore;
pub use store::{DocketStore, MemoryDocketStore};
