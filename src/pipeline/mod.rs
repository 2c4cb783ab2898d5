//! The liberation export pipeline.
//!
//! One [`LiberationPipeline`] run drives a full export for one account as a
//! directed task graph:
//!
//! 1. **Init** — create the collision-proof working directory and the empty
//!    staging mailbox; persist the archive name on the status row.
//! 2. **Enumerate** — fan out one task per non-deleted inbox: declare its
//!    mailbox folder and list its non-deleted message ids.
//! 3. **Extract** — fan out over chunks of message ids (staggered starts,
//!    globally rate limited); reconstruct each message into its folder and
//!    collect per-message failures instead of aborting.
//! 4. **Convert** — fan in; optionally consolidate the maildir tree into a
//!    single mbox container.
//! 5. **Describe** — write `profile.json` and `inbox.json`.
//! 6. **Archive** — tar the working directory with the requested compression
//!    and delete it.
//! 7. **Finish** — clear the running flag, stamp completion, notify the user,
//!    broadcast the reclaim signal.
//!
//! Accounts with no inboxes short-circuit from Init straight to Convert with
//! an empty extract result; the archive then holds just the empty mailbox
//! root and the two metadata documents.
//!
//! Any stage failure after Init leaves the status row `running = true` with
//! no completion stamp — that is the operator-visible stuck-job signal. The
//! orphaned working directory is deliberately not cleaned up.
//!
//! The pipeline owns no global state: the data store, the notifier, and all
//! scheduling knobs are injected at construction.

pub mod limiter;

use crate::archive;
use crate::compression::{Compression, StorageFormat};
use crate::config::LiberationConfig;
use crate::error::{LiberationError, Result};
use crate::maildir::{WorkingMailbox, job_basename};
use crate::mbox;
use crate::message::{failure_token, reconstruct};
use crate::metadata;
use crate::notify::Notifier;
use crate::retry::run_with_retry;
use crate::store::{DataStore, ExportRequest};
use chrono::{DateTime, SecondsFormat, Utc};
use limiter::RateLimiter;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Immutable per-job values, fixed at Init and shared by every stage.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub account_id: i64,
    pub basename: String,
    pub working_dir: PathBuf,
    pub mail_root: PathBuf,
    pub archive_name: String,
    pub compression: Compression,
    pub storage: StorageFormat,
    pub started: DateTime<Utc>,
    export_root: PathBuf,
}

impl JobContext {
    /// Where the finished archive lands.
    pub fn archive_path(&self) -> PathBuf {
        self.export_root.join(&self.archive_name)
    }

    /// Root directory name inside the archive, carrying the start timestamp.
    pub fn internal_root(&self) -> String {
        format!(
            "liberation-{}",
            self.started.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// What one finished run produced, for callers and tests.
#[derive(Debug)]
pub struct LiberationReport {
    pub inboxes: usize,
    pub messages_exported: usize,
    pub chunks: usize,
    pub failures: Vec<String>,
    pub archive_path: PathBuf,
}

pub struct LiberationPipeline {
    store: Arc<dyn DataStore>,
    notifier: Arc<dyn Notifier>,
    config: LiberationConfig,
}

impl LiberationPipeline {
    pub fn new(
        store: Arc<dyn DataStore>,
        notifier: Arc<dyn Notifier>,
        config: LiberationConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Create the status row for a new export request.
    ///
    /// Fails with [`LiberationError::AlreadyRunning`] while a previous export
    /// is still in flight; nothing is touched on disk in that case.
    pub async fn request(&self, account_id: i64, request: &ExportRequest) -> Result<()> {
        self.store.begin_liberation(account_id, request).await
    }

    /// Run the full pipeline for an already-created status row.
    pub async fn run(&self, account_id: i64, request: ExportRequest) -> Result<LiberationReport> {
        let ctx = self.init(account_id, &request).await?;

        let enumerated = self.enumerate(&ctx).await?;
        let inbox_count = enumerated.len();

        let (exported, chunks, failures) = self.extract(&ctx, enumerated).await?;
        self.convert(&ctx)?;
        self.describe(&ctx, &failures).await?;
        let archive_path = self.archive_stage(&ctx).await?;
        self.finish(&ctx).await?;

        Ok(LiberationReport {
            inboxes: inbox_count,
            messages_exported: exported,
            chunks,
            failures,
            archive_path,
        })
    }

    async fn init(&self, account_id: i64, request: &ExportRequest) -> Result<JobContext> {
        let profile = self.store.fetch_profile(account_id).await?;
        let basename = job_basename(&profile.username);
        let archive_name = format!("{}.{}", basename, request.compression.extension());
        let working_dir = self.config.export_root.join(&basename);

        run_with_retry(self.config.dir_retry, "working directory create", || {
            let path = working_dir.clone();
            async move { create_private_dir(&path) }
        })
        .await?;

        // The directory is useless without a status row pointing at it.
        if let Err(err) = self.store.set_archive_name(account_id, &archive_name).await {
            let _ = fs::remove_dir_all(&working_dir);
            return Err(err);
        }

        let mail_root = working_dir.join("emails");
        WorkingMailbox::create(&mail_root)?;

        log::info!(
            "account {}: liberation started, working dir {}",
            account_id,
            working_dir.display()
        );

        Ok(JobContext {
            account_id,
            basename,
            working_dir,
            mail_root,
            archive_name,
            compression: request.compression,
            storage: request.storage,
            started: Utc::now(),
            export_root: self.config.export_root.clone(),
        })
    }

    /// Fan out one task per inbox: declare the folder, list message ids.
    async fn enumerate(&self, ctx: &JobContext) -> Result<Vec<(String, Vec<i64>)>> {
        let inboxes = self.store.list_inboxes(ctx.account_id).await?;
        if inboxes.is_empty() {
            log::info!("account {}: no inboxes to export", ctx.account_id);
            return Ok(Vec::new());
        }

        let mut set = JoinSet::new();
        for inbox in inboxes {
            let store = Arc::clone(&self.store);
            let mailbox = WorkingMailbox::open(&ctx.mail_root);
            set.spawn(async move {
                let folder = inbox.address();
                mailbox.add_folder(&folder)?;
                let ids = store.list_message_ids(inbox.id).await?;
                Ok::<_, LiberationError>((folder, ids))
            });
        }

        let mut folders = Vec::new();
        while let Some(joined) = set.join_next().await {
            folders.push(joined??);
        }
        // JoinSet completion order is nondeterministic; keep downstream
        // chunking stable.
        folders.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(folders)
    }

    /// Fan out chunked extraction tasks; returns (exported, chunks, failures).
    async fn extract(
        &self,
        ctx: &JobContext,
        folders: Vec<(String, Vec<i64>)>,
    ) -> Result<(usize, usize, Vec<String>)> {
        let pairs: Vec<(String, i64)> = folders
            .into_iter()
            .flat_map(|(folder, ids)| ids.into_iter().map(move |id| (folder.clone(), id)))
            .collect();

        if pairs.is_empty() {
            return Ok((0, 0, Vec::new()));
        }

        let chunks: Vec<Vec<(String, i64)>> = pairs
            .chunks(self.config.chunk_size)
            .map(<[_]>::to_vec)
            .collect();
        let chunk_count = chunks.len();
        let limiter = Arc::new(RateLimiter::per_minute(self.config.message_rate_per_minute));

        log::info!(
            "account {}: extracting {} messages in {} chunk(s)",
            ctx.account_id,
            pairs.len(),
            chunk_count
        );

        let mut set = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            let limiter = Arc::clone(&limiter);
            let mailbox = WorkingMailbox::open(&ctx.mail_root);
            let skew = self.config.chunk_skew * index as u32;

            set.spawn(async move {
                tokio::time::sleep(skew).await;
                let mut exported = 0usize;
                let mut failures = Vec::new();

                for (folder, message_id) in chunk {
                    limiter.acquire().await;
                    match store.fetch_message(message_id).await {
                        Ok(Some(parts)) => {
                            let raw = reconstruct(&parts);
                            match mailbox.add(&folder, &raw) {
                                Ok(_) => exported += 1,
                                Err(err) => {
                                    log::warn!(
                                        "failed to stage message {:x}: {}",
                                        message_id,
                                        err
                                    );
                                    failures.push(failure_token(message_id));
                                }
                            }
                        }
                        Ok(None) => {
                            log::warn!("message {:x} vanished before extraction", message_id);
                            failures.push(failure_token(message_id));
                        }
                        Err(err) => {
                            log::warn!("failed to fetch message {:x}: {}", message_id, err);
                            failures.push(failure_token(message_id));
                        }
                    }
                }

                (exported, failures)
            });
        }

        let mut exported = 0usize;
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (chunk_exported, chunk_failures) = joined?;
            exported += chunk_exported;
            failures.extend(chunk_failures);
        }
        failures.sort();

        Ok((exported, chunk_count, failures))
    }

    fn convert(&self, ctx: &JobContext) -> Result<()> {
        match ctx.storage {
            StorageFormat::Maildir => Ok(()),
            StorageFormat::Mbox => {
                let mailbox = WorkingMailbox::open(&ctx.mail_root);
                let dest = ctx.working_dir.join("emails.mbox");
                mbox::convert(&mailbox, &dest)?;
                log::info!("account {}: converted mailbox to mbox", ctx.account_id);
                Ok(())
            }
        }
    }

    async fn describe(&self, ctx: &JobContext, failures: &[String]) -> Result<()> {
        metadata::write_documents(
            self.store.as_ref(),
            ctx.account_id,
            failures,
            &ctx.working_dir,
        )
        .await
    }

    async fn archive_stage(&self, ctx: &JobContext) -> Result<PathBuf> {
        let archive_path = ctx.archive_path();
        archive::create_archive(
            &ctx.working_dir,
            &archive_path,
            &ctx.internal_root(),
            ctx.compression,
            self.config.archive_retry,
        )
        .await?;
        Ok(archive_path)
    }

    async fn finish(&self, ctx: &JobContext) -> Result<()> {
        self.store
            .finish_liberation(ctx.account_id, ctx.compression)
            .await?;

        let body = format!(
            "Your request for your personal data has been completed. \
             Download your archive from /user/liberation/{}.",
            ctx.archive_name
        );
        if let Err(err) = self.notifier.message_user(ctx.account_id, &body).await {
            log::warn!("account {}: notification failed: {}", ctx.account_id, err);
        }
        if let Err(err) = self.notifier.broadcast_reclaim().await {
            log::warn!("reclaim broadcast failed: {}", err);
        }

        log::info!("finished liberation for account {}", ctx.account_id);
        Ok(())
    }
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
