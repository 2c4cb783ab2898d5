//! Narrow data-access contract between the pipeline and the relational store.
//!
//! The pipeline never talks to the schema or query layer directly; everything
//! it needs is behind [`DataStore`]. Production uses [`PgStore`] over a sqlx
//! Postgres pool. [`MemoryStore`] is an in-process substitute for tests and
//! for driving the pipeline with a synchronous scheduler.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, run_migrations};

use crate::compression::{Compression, StorageFormat};
use crate::error::Result;
use crate::message::MessageParts;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One inbox owned by an account, as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct InboxRecord {
    pub id: i64,
    pub local_part: String,
    pub domain: String,
    pub created: DateTime<Utc>,
    pub flags: BTreeMap<String, bool>,
    pub description: Option<String>,
}

impl InboxRecord {
    /// The inbox's string form, used as its mailbox folder name and as the
    /// key in the address-book document.
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

/// Account profile data consumed by the metadata exporter.
#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub id: i64,
    pub username: String,
    pub is_active: bool,
    pub joined: DateTime<Utc>,
    pub groups: Vec<String>,
    pub pool_amount: i32,
    pub flags: BTreeMap<String, bool>,
}

/// What a user asked for when requesting an export.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExportRequest {
    pub storage: StorageFormat,
    pub compression: Compression,
}

/// Persisted liberation state for one account, polled by users and admins.
#[derive(Debug, Clone, Default)]
pub struct LiberationStatus {
    pub account_id: i64,
    pub running: bool,
    pub archive_name: Option<String>,
    pub task_handle: Option<String>,
    pub started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub compression: Option<Compression>,
}

/// A queued export claimed by a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub account_id: i64,
    pub request: ExportRequest,
    pub handle: String,
}

/// Read-only mailbox access plus the liberation status record ops.
///
/// Message and inbox reads tolerate rows disappearing between calls; that is
/// why [`fetch_message`](DataStore::fetch_message) returns an `Option`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Non-deleted inboxes owned by the account.
    async fn list_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>>;

    /// Every inbox owned by the account, deleted ones included. The
    /// address-book document covers them all.
    async fn list_all_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>>;

    /// Ids of the inbox's non-deleted messages.
    async fn list_message_ids(&self, inbox_id: i64) -> Result<Vec<i64>>;

    /// Normalized parts of one message, or `None` when it vanished or was
    /// marked deleted since enumeration.
    async fn fetch_message(&self, message_id: i64) -> Result<Option<MessageParts>>;

    async fn fetch_profile(&self, account_id: i64) -> Result<AccountProfile>;

    /// Create the running status row for a new export.
    ///
    /// At most one export runs per account; a second request while one is
    /// running fails with [`LiberationError::AlreadyRunning`] before anything
    /// touches the filesystem.
    ///
    /// [`LiberationError::AlreadyRunning`]: crate::error::LiberationError::AlreadyRunning
    async fn begin_liberation(&self, account_id: i64, request: &ExportRequest) -> Result<()>;

    /// Atomically claim the oldest unclaimed export, stamping its task handle.
    async fn claim_next_job(&self) -> Result<Option<ClaimedJob>>;

    /// Persist the output archive name chosen during Init.
    async fn set_archive_name(&self, account_id: i64, archive_name: &str) -> Result<()>;

    /// Terminal update: clear the running flag, stamp completion, record the
    /// compression scheme actually used.
    async fn finish_liberation(&self, account_id: i64, compression: Compression) -> Result<()>;

    /// Current status row, if the account ever requested an export.
    async fn liberation_status(&self, account_id: i64) -> Result<Option<LiberationStatus>>;
}
