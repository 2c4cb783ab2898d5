//! User notification and the cross-worker resource-reclamation signal.
//!
//! Both are best-effort side channels: the Finish stage persists the status
//! row first and only logs when either call fails. The reclaim broadcast is
//! fire-and-forget with no acknowledgment, matching its intent — liberation
//! is known to be memory-hungry under sustained load and workers are asked,
//! not ordered, to release what they can.

use crate::error::{LiberationError, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Queue a user-visible message for the account.
    async fn message_user(&self, account_id: i64, body: &str) -> Result<()>;

    /// Broadcast the reclaim signal to every worker process.
    async fn broadcast_reclaim(&self) -> Result<()>;
}

/// Production notifier: user messages become rows the front-end drains,
/// the reclaim signal is a Postgres `NOTIFY` on a maintenance channel.
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn message_user(&self, account_id: i64, body: &str) -> Result<()> {
        sqlx::query("INSERT INTO user_messages (account_id, body) VALUES ($1, $2)")
            .bind(account_id)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn broadcast_reclaim(&self) -> Result<()> {
        sqlx::query("NOTIFY liberation_maintenance, 'reclaim'")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Test notifier that records every call.
#[derive(Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<(i64, String)>>,
    reclaims: AtomicUsize,
    fail_sends: AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(i64, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn reclaim_count(&self) -> usize {
        self.reclaims.load(Ordering::SeqCst)
    }

    /// Make both notification calls fail, simulating an unreachable channel.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn message_user(&self, account_id: i64, body: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LiberationError::Store("notification channel down".into()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((account_id, body.to_string()));
        Ok(())
    }

    async fn broadcast_reclaim(&self) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(LiberationError::Store("notification channel down".into()));
        }
        self.reclaims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
