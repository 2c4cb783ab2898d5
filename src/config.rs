//! Environment-driven configuration for the liberation pipeline.

use crate::compression::{Compression, StorageFormat};
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Runtime configuration for liberation jobs and the worker loop.
///
/// Every knob has an environment variable and a production default. Tests
/// construct the struct directly with short delays instead of going through
/// the environment.
#[derive(Debug, Clone)]
pub struct LiberationConfig {
    /// Root directory that holds working directories and finished archives.
    pub export_root: PathBuf,
    /// Compression applied when a request does not specify one.
    pub default_compression: Compression,
    /// Mailbox layout used when a request does not specify one.
    pub default_storage: StorageFormat,
    /// Message ids per extraction task.
    pub chunk_size: usize,
    /// Stagger between consecutive extraction chunk starts.
    pub chunk_skew: Duration,
    /// Global ceiling on message fetches, per minute. Zero disables the limit.
    pub message_rate_per_minute: u32,
    /// Retry policy for working-directory creation.
    pub dir_retry: RetryPolicy,
    /// Retry policy for opening the archive file.
    pub archive_retry: RetryPolicy,
    /// How long the worker sleeps when no job is queued.
    pub poll_interval: Duration,
    /// Back-off after a store error in the worker loop.
    pub error_backoff: Duration,
}

impl LiberationConfig {
    pub fn from_env() -> Self {
        let default_compression = env::var("LIBERATION_COMPRESSION")
            .ok()
            .and_then(|value| Compression::from_code(&value))
            .unwrap_or_default();
        let default_storage = env::var("LIBERATION_STORAGE")
            .ok()
            .and_then(|value| StorageFormat::from_code(&value))
            .unwrap_or_default();

        Self {
            export_root: PathBuf::from(env_string("LIBERATION_PATH", "./liberation")),
            default_compression,
            default_storage,
            chunk_size: env_usize("LIBERATION_CHUNK_SIZE", 100).max(1),
            chunk_skew: env_duration_millis("LIBERATION_CHUNK_SKEW_MS", 10_000),
            message_rate_per_minute: env_u32("LIBERATION_MESSAGE_RATE", 1_000),
            dir_retry: RetryPolicy::new(
                env_u32("LIBERATION_MKDIR_RETRIES", 3),
                env_duration_millis("LIBERATION_MKDIR_RETRY_MS", 180_000),
            ),
            archive_retry: RetryPolicy::new(
                env_u32("LIBERATION_TAR_RETRIES", 3),
                env_duration_millis("LIBERATION_TAR_RETRY_MS", 600_000),
            ),
            poll_interval: env_duration_millis("LIBERATION_POLL_INTERVAL_MS", 5_000),
            error_backoff: env_duration_millis("LIBERATION_ERROR_BACKOFF_MS", 10_000),
        }
    }
}

impl Default for LiberationConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper tests use names nothing sets, so the default branch is what is
    // exercised regardless of the surrounding environment.

    #[test]
    fn test_env_helpers_fall_back_to_defaults() {
        assert_eq!(env_string("LIBERATION_TEST_UNSET_STR", "./liberation"), "./liberation");
        assert_eq!(env_usize("LIBERATION_TEST_UNSET_USIZE", 100), 100);
        assert_eq!(env_u32("LIBERATION_TEST_UNSET_U32", 1_000), 1_000);
        assert_eq!(
            env_duration_millis("LIBERATION_TEST_UNSET_MS", 600_000),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_chunk_size_floor() {
        assert_eq!(env_usize("LIBERATION_TEST_UNSET_CHUNK", 100).max(1), 100);
        assert_eq!(env_usize("LIBERATION_TEST_UNSET_CHUNK", 0).max(1), 1);
    }
}
