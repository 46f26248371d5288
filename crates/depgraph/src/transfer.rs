//! # Bounded Parallel Transfers
//!
//! Recipes and binaries move as a set of files per revision: the
//! archives first, the manifest last. The manifest-last ordering is a
//! correctness property, not cosmetics: a revision is considered
//! complete once its manifest exists, so the manifest must be the final
//! file written on upload and the first thing checked on download.
//!
//! The pool bounds concurrency with a semaphore sized from
//! [`config::DownloadConfig::parallel`]. Cancellation is cooperative at
//! file boundaries: a fatal failure stops workers before their next
//! file, never mid-write. Transient failures are retried with a fixed
//! wait; authentication failures share a global budget across the whole
//! pool so a bad credential fails fast instead of once per file.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use config::DownloadConfig;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[cfg(test)]
mod test;

//================================================================================================
// Statics
//================================================================================================

/// Authentication failures tolerated across one pool before aborting.
const AUTH_ATTEMPT_LIMIT: u32 = 3;

//================================================================================================
// Types
//================================================================================================

/// How one file transfer attempt failed.
#[derive(Debug, Clone)]
pub enum FetchFailure {
    /// Worth retrying after a wait.
    Transient(String),
    /// The server rejected our credentials.
    Auth(String),
    /// Retrying cannot help.
    Fatal(String),
}

/// A pool-level transfer failure.
#[derive(Error, Debug)]
pub enum TransferError {
    /// A file kept failing transiently until the retry budget ran out.
    #[error("transfer of `{file}` failed after {attempts} attempts: {reason}")]
    Exhausted {
        /// The file that failed.
        file: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// The last transient failure.
        reason: String,
    },
    /// The shared authentication budget ran out.
    #[error("too many failed login attempts, aborting transfer")]
    TooManyLoginAttempts,
    /// A non-retryable failure.
    #[error("transfer of `{file}` failed: {reason}")]
    Fatal {
        /// The file that failed.
        file: String,
        /// What went wrong.
        reason: String,
    },
    /// A worker task panicked.
    #[error("transfer worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Executes per-file transfer closures with bounded concurrency.
pub struct TransferPool {
    parallel: usize,
    retry: u32,
    retry_wait: Duration,
}

//================================================================================================
// Impls
//================================================================================================

impl TransferPool {
    /// A pool sized and tuned from the download configuration.
    pub fn from_config(config: &DownloadConfig) -> Self {
        TransferPool {
            parallel: config.parallel.max(1),
            retry: config.retry,
            retry_wait: Duration::from_secs(config.retry_wait),
        }
    }

    /// Transfers every file through `fetch`, manifest last.
    ///
    /// Files run concurrently up to the pool bound. Manifests form a
    /// second batch that only starts once every archive has fully
    /// joined: a revision must never look complete while one of its
    /// archives is still in flight. The first fatal or auth-exhausted
    /// failure wins as the returned error; workers observe it at their
    /// next file boundary and stop picking up work.
    pub async fn run<F, Fut>(&self, files: Vec<String>, fetch: F) -> Result<(), TransferError>
    where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FetchFailure>> + Send + 'static,
    {
        let (manifests, archives): (Vec<String>, Vec<String>) =
            files.into_iter().partition(|f| is_manifest(f));
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let cancelled = Arc::new(AtomicBool::new(false));
        let auth_failures = Arc::new(AtomicU32::new(0));

        self.run_batch(order_files(archives), &fetch, &semaphore, &cancelled, &auth_failures)
            .await?;
        self.run_batch(order_files(manifests), &fetch, &semaphore, &cancelled, &auth_failures)
            .await
    }

    /// Spawns one batch of files into the pool and joins all of them.
    async fn run_batch<F, Fut>(
        &self,
        files: Vec<String>,
        fetch: &F,
        semaphore: &Arc<Semaphore>,
        cancelled: &Arc<AtomicBool>,
        auth_failures: &Arc<AtomicU32>,
    ) -> Result<(), TransferError>
    where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FetchFailure>> + Send + 'static,
    {
        let mut workers = JoinSet::new();
        for file in files {
            let semaphore = Arc::clone(semaphore);
            let cancelled = Arc::clone(cancelled);
            let auth_failures = Arc::clone(auth_failures);
            let fetch = fetch.clone();
            let retry = self.retry;
            let retry_wait = self.retry_wait;
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| TransferError::Fatal {
                        file: file.clone(),
                        reason: e.to_string(),
                    })?;
                if cancelled.load(Ordering::Acquire) {
                    debug!(%file, "transfer cancelled before start");
                    return Ok(());
                }
                let result =
                    transfer_one(&file, retry, retry_wait, &auth_failures, &fetch).await;
                if result.is_err() {
                    cancelled.store(true, Ordering::Release);
                }
                result
            });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined? {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

/// One file with retries: transient failures wait and retry, auth
/// failures draw on the shared budget, fatal failures stop immediately.
async fn transfer_one<F, Fut>(
    file: &str,
    retry: u32,
    retry_wait: Duration,
    auth_failures: &AtomicU32,
    fetch: &F,
) -> Result<(), TransferError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<(), FetchFailure>>,
{
    let mut last_reason = String::new();
    for attempt in 1..=retry + 1 {
        match fetch(file.to_string()).await {
            Ok(()) => {
                debug!(%file, attempt, "transferred");
                return Ok(());
            },
            Err(FetchFailure::Transient(reason)) => {
                warn!(%file, attempt, %reason, "transient transfer failure");
                last_reason = reason;
                if attempt <= retry {
                    tokio::time::sleep(retry_wait).await;
                }
            },
            Err(FetchFailure::Auth(reason)) => {
                warn!(%file, %reason, "authentication failure");
                if auth_failures.fetch_add(1, Ordering::AcqRel) + 1 >= AUTH_ATTEMPT_LIMIT {
                    return Err(TransferError::TooManyLoginAttempts);
                }
                last_reason = reason;
            },
            Err(FetchFailure::Fatal(reason)) => {
                return Err(TransferError::Fatal {
                    file: file.to_string(),
                    reason,
                });
            },
        }
    }
    Err(TransferError::Exhausted {
        file: file.to_string(),
        attempts: retry + 1,
        reason: last_reason,
    })
}

/// Stable transfer order: archives first, the manifest strictly last.
fn order_files(mut files: Vec<String>) -> Vec<String> {
    files.sort_by_key(|f| (is_manifest(f), f.clone()));
    files
}

fn is_manifest(file: &str) -> bool {
    file == "manifest.txt" || file.ends_with("/manifest.txt")
}
