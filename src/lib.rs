//! Liberation: export all of one account's email data into a downloadable
//! archive.
//!
//! The export runs as an asynchronous multi-stage job per account: messages
//! are reconstructed from normalized (deduplicated) header/body storage into
//! a maildir-shaped staging tree, optionally consolidated into a single mbox
//! container, bundled with two account-metadata documents, and packed into a
//! compressed tar archive. See [`pipeline`] for the stage graph.
//!
//! The relational store is reached only through the [`store::DataStore`]
//! contract; production wires a Postgres pool, tests an in-memory store. One
//! export runs per account at a time, enforced by the persisted status row.

pub mod archive;
pub mod compression;
pub mod config;
pub mod error;
pub mod maildir;
pub mod mbox;
pub mod message;
pub mod metadata;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod worker;

pub use compression::{Compression, StorageFormat};
pub use config::LiberationConfig;
pub use error::{LiberationError, Result};
pub use pipeline::{LiberationPipeline, LiberationReport};
pub use store::{DataStore, ExportRequest};
pub use worker::LiberationWorker;
