//! In-memory [`DataStore`] used by tests and local experiments.

use super::{
    AccountProfile, ClaimedJob, DataStore, ExportRequest, InboxRecord, LiberationStatus,
};
use crate::compression::Compression;
use crate::error::{LiberationError, Result};
use crate::message::MessageParts;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    accounts: HashMap<i64, AccountProfile>,
    inboxes: Vec<StoredInbox>,
    messages: HashMap<i64, MessageParts>,
    message_index: HashMap<i64, Vec<i64>>,
    deleted_messages: HashSet<i64>,
    vanish_on_fetch: HashSet<i64>,
    statuses: HashMap<i64, StatusRow>,
    fail_inbox_listing: bool,
    fail_set_archive_name: bool,
}

struct StoredInbox {
    account_id: i64,
    deleted: bool,
    record: InboxRecord,
}

struct StatusRow {
    status: LiberationStatus,
    request: ExportRequest,
}

/// Test double for the relational store. Builder methods populate fixture
/// data; the knobs simulate the data-integrity anomalies the pipeline must
/// tolerate.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, profile: AccountProfile) {
        self.inner.lock().unwrap().accounts.insert(profile.id, profile);
    }

    pub fn add_inbox(&self, account_id: i64, record: InboxRecord, deleted: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.message_index.entry(record.id).or_default();
        inner.inboxes.push(StoredInbox {
            account_id,
            deleted,
            record,
        });
    }

    pub fn add_message(&self, inbox_id: i64, parts: MessageParts) {
        let mut inner = self.inner.lock().unwrap();
        inner.message_index.entry(inbox_id).or_default().push(parts.id);
        inner.messages.insert(parts.id, parts);
    }

    pub fn mark_message_deleted(&self, message_id: i64) {
        self.inner.lock().unwrap().deleted_messages.insert(message_id);
    }

    /// Keep the message enumerable but make `fetch_message` return `None`,
    /// simulating deletion between enumeration and extraction.
    pub fn vanish_on_fetch(&self, message_id: i64) {
        self.inner.lock().unwrap().vanish_on_fetch.insert(message_id);
    }

    /// Make `list_inboxes` fail, simulating a mid-pipeline store fault.
    pub fn fail_inbox_listing(&self, fail: bool) {
        self.inner.lock().unwrap().fail_inbox_listing = fail;
    }

    /// Make `set_archive_name` fail, simulating a status-row write fault
    /// right after the working directory was created.
    pub fn fail_set_archive_name(&self, fail: bool) {
        self.inner.lock().unwrap().fail_set_archive_name = fail;
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn list_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_inbox_listing {
            return Err(LiberationError::Store("inbox listing unavailable".into()));
        }
        Ok(inner
            .inboxes
            .iter()
            .filter(|i| i.account_id == account_id && !i.deleted)
            .map(|i| i.record.clone())
            .collect())
    }

    async fn list_all_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .inboxes
            .iter()
            .filter(|i| i.account_id == account_id)
            .map(|i| i.record.clone())
            .collect())
    }

    async fn list_message_ids(&self, inbox_id: i64) -> Result<Vec<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .message_index
            .get(&inbox_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| !inner.deleted_messages.contains(id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_message(&self, message_id: i64) -> Result<Option<MessageParts>> {
        let inner = self.inner.lock().unwrap();
        if inner.vanish_on_fetch.contains(&message_id)
            || inner.deleted_messages.contains(&message_id)
        {
            return Ok(None);
        }
        Ok(inner.messages.get(&message_id).cloned())
    }

    async fn fetch_profile(&self, account_id: i64) -> Result<AccountProfile> {
        let inner = self.inner.lock().unwrap();
        inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| LiberationError::Store(format!("no account {account_id}")))
    }

    async fn begin_liberation(&self, account_id: i64, request: &ExportRequest) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(row) = inner.statuses.get(&account_id) {
            if row.status.running {
                return Err(LiberationError::AlreadyRunning(account_id));
            }
        }
        inner.statuses.insert(
            account_id,
            StatusRow {
                status: LiberationStatus {
                    account_id,
                    running: true,
                    archive_name: None,
                    task_handle: None,
                    started: Some(Utc::now()),
                    last_finished: None,
                    compression: None,
                },
                request: *request,
            },
        );
        Ok(())
    }

    async fn claim_next_job(&self) -> Result<Option<ClaimedJob>> {
        let mut inner = self.inner.lock().unwrap();
        let mut candidates: Vec<&mut StatusRow> = inner
            .statuses
            .values_mut()
            .filter(|row| row.status.running && row.status.task_handle.is_none())
            .collect();
        candidates.sort_by_key(|row| row.status.started);

        let Some(row) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let handle = format!(
            "worker-{}-{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        );
        row.status.task_handle = Some(handle.clone());
        Ok(Some(ClaimedJob {
            account_id: row.status.account_id,
            request: row.request,
            handle,
        }))
    }

    async fn set_archive_name(&self, account_id: i64, archive_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_set_archive_name {
            return Err(LiberationError::Store("status row write failed".into()));
        }
        let row = inner
            .statuses
            .get_mut(&account_id)
            .ok_or_else(|| LiberationError::Store(format!("no status row for {account_id}")))?;
        row.status.archive_name = Some(archive_name.to_string());
        Ok(())
    }

    async fn finish_liberation(&self, account_id: i64, compression: Compression) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .statuses
            .get_mut(&account_id)
            .ok_or_else(|| LiberationError::Store(format!("no status row for {account_id}")))?;
        row.status.running = false;
        row.status.last_finished = Some(Utc::now());
        row.status.compression = Some(compression);
        Ok(())
    }

    async fn liberation_status(&self, account_id: i64) -> Result<Option<LiberationStatus>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.statuses.get(&account_id).map(|row| row.status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_begin_conflicts_while_running() {
        let store = MemoryStore::new();
        let request = ExportRequest::default();

        store.begin_liberation(1, &request).await.unwrap();
        let second = store.begin_liberation(1, &request).await;
        assert!(matches!(second, Err(LiberationError::AlreadyRunning(1))));

        // a finished export can be re-requested
        store.finish_liberation(1, Compression::Gzip).await.unwrap();
        store.begin_liberation(1, &request).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_is_once_per_job() {
        let store = MemoryStore::new();
        store
            .begin_liberation(7, &ExportRequest::default())
            .await
            .unwrap();

        let first = store.claim_next_job().await.unwrap();
        assert_eq!(first.unwrap().account_id, 7);
        assert!(store.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vanish_on_fetch_keeps_id_listed() {
        let store = MemoryStore::new();
        store.add_message(
            10,
            MessageParts {
                id: 42,
                headers: Vec::new(),
                body: Vec::new(),
            },
        );
        store.vanish_on_fetch(42);

        assert_eq!(store.list_message_ids(10).await.unwrap(), vec![42]);
        assert!(store.fetch_message(42).await.unwrap().is_none());
    }
}
