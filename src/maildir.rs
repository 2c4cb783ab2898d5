//! The on-disk staging mailbox for one export job.
//!
//! A [`WorkingMailbox`] is a maildir-shaped tree exclusively owned by one job:
//! the root carries the usual `tmp`/`new`/`cur` trio, and each inbox gets a
//! Maildir++-style `.name` sub-folder created lazily. Message files use the
//! maildir unique-name convention (time, pid, process-wide sequence, random
//! component), which makes concurrent adds safe even when two extraction
//! chunks land on the same folder.

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const SUBDIRS: [&str; 3] = ["tmp", "new", "cur"];

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct WorkingMailbox {
    root: PathBuf,
}

impl WorkingMailbox {
    /// Create the mailbox tree at `root`.
    pub fn create(root: &Path) -> io::Result<Self> {
        for sub in SUBDIRS {
            fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Handle to an existing mailbox tree; does not touch the filesystem.
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}"))
    }

    /// Idempotently create the sub-folder for one inbox.
    pub fn add_folder(&self, name: &str) -> io::Result<()> {
        let dir = self.folder_dir(name);
        for sub in SUBDIRS {
            fs::create_dir_all(dir.join(sub))?;
        }
        Ok(())
    }

    /// Append one message to a folder, returning the file it landed in.
    ///
    /// Written to `tmp` first, then renamed into `new` so readers never see a
    /// partial file.
    pub fn add(&self, folder: &str, message: &[u8]) -> io::Result<PathBuf> {
        let dir = self.folder_dir(folder);
        let name = unique_name();
        let tmp = dir.join("tmp").join(&name);
        let dest = dir.join("new").join(&name);

        fs::write(&tmp, message)?;
        fs::rename(&tmp, &dest)?;
        Ok(dest)
    }

    /// Folder names present in the mailbox, sorted.
    pub fn folders(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(folder) = name.strip_prefix('.') {
                names.push(folder.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Message files in one folder (`new` then `cur`), sorted within each.
    pub fn messages(&self, folder: &str) -> io::Result<Vec<PathBuf>> {
        let dir = self.folder_dir(folder);
        let mut paths = Vec::new();
        for sub in ["new", "cur"] {
            let sub_dir = dir.join(sub);
            if !sub_dir.exists() {
                continue;
            }
            let mut batch: Vec<PathBuf> = fs::read_dir(&sub_dir)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<_>>()?;
            batch.sort();
            paths.extend(batch);
        }
        Ok(paths)
    }

    /// Remove one folder and everything under it.
    pub fn remove_folder(&self, name: &str) -> io::Result<()> {
        fs::remove_dir_all(self.folder_dir(name))
    }
}

fn unique_name() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let rand_part: u32 = rand::thread_rng().r#gen();
    format!(
        "{}.P{}Q{}R{:08x}.liberation",
        Utc::now().timestamp(),
        std::process::id(),
        seq,
        rand_part
    )
}

/// Collision-avoiding basename shared by the working directory and the
/// archive file: unix time, pid, a random salt, and a truncated hash of the
/// account identifier salted with the same value.
pub fn job_basename(username: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    format!(
        "{}_{}_{}_{}",
        Utc::now().timestamp(),
        std::process::id(),
        salt,
        &hex[..50]
    )
}
