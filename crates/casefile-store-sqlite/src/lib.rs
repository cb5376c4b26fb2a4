//! SQLite document storage for single-node Casefile deployments
//!
//! This crate implements the `DocumentStore` trait on a single SQLite
//! database holding JSON documents.
//!
//! # Features
//! - WAL journal for concurrent readers
//! - Field filters and timestamp ordering through `json_extract`
//! - Transactional `$set`/`$push` updates
//! - Versioned schema
//!
//! # Example
//! ```no_run
//! # use casefile_store_sqlite::SqliteDocumentStore;
//! # async fn example() -> casefile_core::Result<()> {
//! let store = SqliteDocumentStore::open("~/.casefile/casefile.db").await?;
//! # Ok(())
//! # }
//! ```

mod sqlite_document_store;

pub use sqlite_document_store::SqliteDocumentStore;
