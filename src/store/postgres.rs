//! Postgres-backed [`DataStore`] over a sqlx connection pool.
//!
//! All mailbox reads are plain `SELECT`s; the only writes go to the
//! `liberation_status` table. Job claiming uses `FOR UPDATE SKIP LOCKED` so
//! any number of worker processes can poll the same table safely.

use super::{
    AccountProfile, ClaimedJob, DataStore, ExportRequest, InboxRecord, LiberationStatus,
};
use crate::compression::Compression;
use crate::error::{LiberationError, Result};
use crate::message::{MessageHeader, MessageParts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use std::collections::BTreeMap;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations. Idempotent; applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_inboxes_where(&self, account_id: i64, exclude_deleted: bool) -> Result<Vec<InboxRecord>> {
        let sql = if exclude_deleted {
            "SELECT id, local_part, domain, created, flags, description
             FROM inboxes WHERE account_id = $1 AND deleted = FALSE ORDER BY id"
        } else {
            "SELECT id, local_part, domain, created, flags, description
             FROM inboxes WHERE account_id = $1 ORDER BY id"
        };

        let rows: Vec<(i64, String, String, DateTime<Utc>, Value, Option<String>)> =
            sqlx::query_as(sql).bind(account_id).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(id, local_part, domain, created, flags, description)| InboxRecord {
                id,
                local_part,
                domain,
                created,
                flags: flags_from_json(&flags),
                description,
            })
            .collect())
    }
}

/// Flatten a JSONB flag object into name -> bool.
fn flags_from_json(value: &Value) -> BTreeMap<String, bool> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(name, set)| (name.clone(), set.as_bool().unwrap_or(false)))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DataStore for PgStore {
    async fn list_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>> {
        self.list_inboxes_where(account_id, true).await
    }

    async fn list_all_inboxes(&self, account_id: i64) -> Result<Vec<InboxRecord>> {
        self.list_inboxes_where(account_id, false).await
    }

    async fn list_message_ids(&self, inbox_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM messages WHERE inbox_id = $1 AND deleted = FALSE ORDER BY id",
        )
        .bind(inbox_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn fetch_message(&self, message_id: i64) -> Result<Option<MessageParts>> {
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM messages WHERE id = $1 AND deleted = FALSE")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let headers: Vec<(String, String, i32)> = sqlx::query_as(
            "SELECT name, data, ordinal FROM message_headers
             WHERE message_id = $1 ORDER BY ordinal",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        let body: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM message_bodies WHERE message_id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;

        // A message without its body blob is a dangling reference; treat it
        // the same as one that vanished.
        let Some((body,)) = body else {
            return Ok(None);
        };

        Ok(Some(MessageParts {
            id: message_id,
            headers: headers
                .into_iter()
                .map(|(name, data, ordinal)| MessageHeader {
                    name,
                    data,
                    ordinal,
                })
                .collect(),
            body,
        }))
    }

    async fn fetch_profile(&self, account_id: i64) -> Result<AccountProfile> {
        let (id, username, is_active, joined, groups, pool_amount, flags): (
            i64,
            String,
            bool,
            DateTime<Utc>,
            Vec<String>,
            i32,
            Value,
        ) = sqlx::query_as(
            "SELECT id, username, is_active, joined, groups, pool_amount, flags
             FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AccountProfile {
            id,
            username,
            is_active,
            joined,
            groups,
            pool_amount,
            flags: flags_from_json(&flags),
        })
    }

    async fn begin_liberation(&self, account_id: i64, request: &ExportRequest) -> Result<()> {
        let payload = serde_json::to_value(request)?;

        // The primary key on account_id is the single-job-per-account
        // constraint; the WHERE clause turns a concurrent request into zero
        // returned rows instead of a second status row.
        let created: Option<(i64,)> = sqlx::query_as(
            r#"INSERT INTO liberation_status (account_id, running, started, payload)
               VALUES ($1, TRUE, NOW(), $2)
               ON CONFLICT (account_id) DO UPDATE
               SET running = TRUE, started = NOW(), payload = EXCLUDED.payload,
                   archive_name = NULL, task_handle = NULL, compression = NULL,
                   last_finished = liberation_status.last_finished
               WHERE liberation_status.running = FALSE
               RETURNING account_id"#,
        )
        .bind(account_id)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        if created.is_none() {
            return Err(LiberationError::AlreadyRunning(account_id));
        }
        Ok(())
    }

    async fn claim_next_job(&self) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, Value)> = sqlx::query_as(
            r#"SELECT account_id, payload FROM liberation_status
               WHERE running = TRUE AND task_handle IS NULL
               ORDER BY started ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((account_id, payload)) = row else {
            return Ok(None);
        };

        let handle = format!(
            "worker-{}-{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        );
        sqlx::query("UPDATE liberation_status SET task_handle = $1 WHERE account_id = $2")
            .bind(&handle)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(ClaimedJob {
            account_id,
            request: serde_json::from_value(payload)?,
            handle,
        }))
    }

    async fn set_archive_name(&self, account_id: i64, archive_name: &str) -> Result<()> {
        sqlx::query("UPDATE liberation_status SET archive_name = $1 WHERE account_id = $2")
            .bind(archive_name)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_liberation(&self, account_id: i64, compression: Compression) -> Result<()> {
        sqlx::query(
            "UPDATE liberation_status
             SET running = FALSE, last_finished = NOW(), compression = $1
             WHERE account_id = $2",
        )
        .bind(compression.as_str())
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn liberation_status(&self, account_id: i64) -> Result<Option<LiberationStatus>> {
        let row: Option<(
            bool,
            Option<String>,
            Option<String>,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
            Option<String>,
        )> = sqlx::query_as(
            "SELECT running, archive_name, task_handle, started, last_finished, compression
             FROM liberation_status WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(running, archive_name, task_handle, started, last_finished, compression)| {
                LiberationStatus {
                    account_id,
                    running,
                    archive_name,
                    task_handle,
                    started,
                    last_finished,
                    compression: compression.as_deref().and_then(Compression::from_code),
                }
            },
        ))
    }
}
