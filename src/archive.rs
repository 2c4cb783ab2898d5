//! Final packaging of the working directory into a compressed tar archive.

use crate::compression::Compression;
use crate::error::Result;
use crate::retry::{RetryPolicy, run_with_retry};
use std::fs::{self, File};
use std::path::Path;

/// Create the archive and delete the working directory.
///
/// Opening the archive file is the step that fails on transient
/// infrastructure trouble (disk full, leftover entries), so only the open
/// runs under the retry policy. Once open, the whole working directory is
/// added recursively under `internal_root` and the directory is removed
/// afterwards whether or not the add succeeded; the first error wins.
pub async fn create_archive(
    working_dir: &Path,
    archive_path: &Path,
    internal_root: &str,
    compression: Compression,
    policy: RetryPolicy,
) -> Result<()> {
    let file = run_with_retry(policy, "archive open", || {
        let path = archive_path.to_path_buf();
        async move { File::create(&path) }
    })
    .await?;

    let packed = pack(file, working_dir, internal_root, compression);
    let cleanup = fs::remove_dir_all(working_dir);

    packed?;
    cleanup?;
    Ok(())
}

fn pack(
    file: File,
    working_dir: &Path,
    internal_root: &str,
    compression: Compression,
) -> Result<()> {
    let writer = compression.wrap(file);
    let mut builder = tar::Builder::new(writer);
    builder.append_dir_all(internal_root, working_dir)?;
    let writer = builder.into_inner()?;
    let file = writer.finish()?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    fn staged_dir(tmp: &TempDir) -> std::path::PathBuf {
        let dir = tmp.path().join("work");
        fs::create_dir_all(dir.join("emails")).unwrap();
        fs::write(dir.join("profile.json"), b"{}").unwrap();
        fs::write(dir.join("emails").join("msg"), b"hello").unwrap();
        dir
    }

    fn entry_names<R: Read>(archive: &mut tar::Archive<R>) -> Vec<String> {
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_plain_tar_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = staged_dir(&tmp);
        let archive_path = tmp.path().join("out.tar");

        create_archive(&dir, &archive_path, "root", Compression::None, policy())
            .await
            .unwrap();

        let mut archive = tar::Archive::new(File::open(&archive_path).unwrap());
        let names = entry_names(&mut archive);
        assert!(names.contains(&"root/profile.json".to_string()));
        assert!(names.contains(&"root/emails/msg".to_string()));
    }

    #[tokio::test]
    async fn test_gzip_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = staged_dir(&tmp);
        let archive_path = tmp.path().join("out.tar.gz");

        create_archive(&dir, &archive_path, "root", Compression::Gzip, policy())
            .await
            .unwrap();

        let reader = flate2::read::GzDecoder::new(File::open(&archive_path).unwrap());
        let mut archive = tar::Archive::new(reader);
        assert!(entry_names(&mut archive).contains(&"root/emails/msg".to_string()));
    }

    #[tokio::test]
    async fn test_bzip2_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let dir = staged_dir(&tmp);
        let archive_path = tmp.path().join("out.tar.bz2");

        create_archive(&dir, &archive_path, "root", Compression::Bzip2, policy())
            .await
            .unwrap();

        let reader = bzip2::read::BzDecoder::new(File::open(&archive_path).unwrap());
        let mut archive = tar::Archive::new(reader);
        assert!(entry_names(&mut archive).contains(&"root/emails/msg".to_string()));
    }

    #[tokio::test]
    async fn test_working_dir_removed_after_archive() {
        let tmp = TempDir::new().unwrap();
        let dir = staged_dir(&tmp);
        let archive_path = tmp.path().join("out.tar");

        create_archive(&dir, &archive_path, "root", Compression::None, policy())
            .await
            .unwrap();

        assert!(!dir.exists());
        assert!(archive_path.is_file());
    }

    #[tokio::test]
    async fn test_open_failure_exhausts_retries() {
        let tmp = TempDir::new().unwrap();
        let dir = staged_dir(&tmp);
        // parent directory of the archive path does not exist
        let archive_path = tmp.path().join("missing").join("out.tar");

        let result = create_archive(
            &dir,
            &archive_path,
            "root",
            Compression::None,
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
        .await;

        assert!(matches!(
            result,
            Err(crate::error::LiberationError::RetriesExhausted { attempts: 2, .. })
        ));
        // working directory is only cleaned up once the archive was opened
        assert!(dir.exists());
    }
}
