// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Advisory lock files protecting the working copy and the store.
//!
//! Mirrors the teacher's `repolock` crate: a directory-level lock
//! (`.dir_lock`) serializes lock acquisition and content writing, an
//! advisory `<name>.lock` file is the thing callers hold, and `<name>.data`
//! carries human-readable contents (hostname:pid) for contention
//! diagnostics. Callers must always acquire the working-copy lock before
//! the store lock to avoid deadlocking against a concurrent writer doing
//! the same (spec §4.6 lock ordering).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::errors::TxnError;

const WORKING_COPY_NAME: &str = "wlock";
const STORE_NAME: &str = "lock";

pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn lock_working_copy(dir: &Path, contents: &[u8]) -> Result<LockGuard, TxnError> {
    try_lock(dir, WORKING_COPY_NAME, contents)
}

pub fn lock_store(dir: &Path, contents: &[u8]) -> Result<LockGuard, TxnError> {
    try_lock(dir, STORE_NAME, contents)
}

/// Acquire both locks in the mandated order: working copy, then store.
pub struct RepoLocks {
    pub wlock: LockGuard,
    pub store_lock: LockGuard,
}

pub fn lock_repo(wc_dir: &Path, store_dir: &Path, contents: &[u8]) -> Result<RepoLocks, TxnError> {
    let wlock = lock_working_copy(wc_dir, contents)?;
    let store_lock = lock_store(store_dir, contents)?;
    Ok(RepoLocks { wlock, store_lock })
}

/// Loop trying to acquire a lock until `timeout` elapses, backing off by
/// `backoff` between attempts and logging once contention has lasted past
/// `warn_after`. A dead lock owner does not need separate detection here:
/// `fs2`'s advisory lock is released by the kernel the instant the holding
/// process exits, so a stale `host:pid` in the `.data` file is purely
/// diagnostic (spec §4.6 "if the named process on that host is dead, break
/// the lock" — the OS already does this for us).
pub fn lock(
    dir: &Path,
    name: &str,
    contents: &[u8],
    timeout: Duration,
    warn_after: Duration,
    backoff: Duration,
    logger: Option<&slog::Logger>,
) -> Result<LockGuard, TxnError> {
    let start = Instant::now();
    loop {
        match try_lock(dir, name, contents) {
            Ok(guard) => return Ok(guard),
            Err(err @ TxnError::LockContended(_)) => {
                let elapsed = start.elapsed();
                if let Some(logger) = logger {
                    if elapsed >= warn_after {
                        slog::warn!(logger, "lock contended"; "name" => name);
                    } else {
                        slog::debug!(logger, "lock contended"; "name" => name);
                    }
                }
                if elapsed >= timeout {
                    return Err(err);
                }
                sleep(backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

fn try_lock(dir: &Path, name: &str, contents: &[u8]) -> Result<LockGuard, TxnError> {
    fs::create_dir_all(dir)?;
    let dir_lock_path = dir.join(".dir_lock");
    let dir_lock = OpenOptions::new().write(true).create(true).open(&dir_lock_path)?;
    dir_lock.lock_exclusive().map_err(|_| TxnError::LockContended(dir_lock_path.clone()))?;

    let name = name.replace('.', "_");
    let lock_path = dir.join(format!("{}.lock", name));
    let data_path = dir.join(format!("{}.data", name));

    let lock_file = OpenOptions::new().write(true).create(true).open(&lock_path)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => {}
        Err(_) => {
            let _ = dir_lock.unlock();
            return Err(TxnError::LockContended(lock_path));
        }
    }

    let mut data_file = File::create(&data_path)?;
    data_file.write_all(contents)?;
    data_file.flush()?;

    let _ = dir_lock.unlock();
    Ok(LockGuard { _file: lock_file, path: lock_path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_attempt_is_contended() {
        let dir = tempfile::tempdir().unwrap();
        let first = lock_store(dir.path(), b"host:1").unwrap();
        assert!(matches!(lock_store(dir.path(), b"host:2"), Err(TxnError::LockContended(_))));
        drop(first);
        assert!(lock_store(dir.path(), b"host:2").is_ok());
    }

    #[test]
    fn data_file_records_contents() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = lock_working_copy(dir.path(), b"host:42").unwrap();
        let data = std::fs::read(dir.path().join("wlock.data")).unwrap();
        assert_eq!(data, b"host:42");
    }

    #[test]
    fn lock_repo_acquires_both() {
        let dir = tempfile::tempdir().unwrap();
        let locks = lock_repo(dir.path(), dir.path(), b"host:1").unwrap();
        assert!(locks.wlock.path().ends_with("wlock.lock"));
        assert!(locks.store_lock.path().ends_with("lock.lock"));
    }

    #[test]
    fn lock_loop_succeeds_once_holder_drops() {
        let dir = tempfile::tempdir().unwrap();
        let first = lock_store(dir.path(), b"host:1").unwrap();

        let path = dir.path().to_path_buf();
        let dropper = std::thread::spawn(move || {
            sleep(Duration::from_millis(10));
            drop(first);
        });

        let second = lock(
            &path,
            STORE_NAME,
            b"host:2",
            Duration::from_secs(5),
            Duration::from_millis(100),
            Duration::from_millis(2),
            None,
        );
        assert!(second.is_ok());
        dropper.join().unwrap();
    }

    #[test]
    fn lock_loop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let _first = lock_store(dir.path(), b"host:1").unwrap();
        let result = lock(
            dir.path(),
            STORE_NAME,
            b"host:2",
            Duration::from_millis(10),
            Duration::from_millis(5),
            Duration::from_millis(2),
            None,
        );
        assert!(matches!(result, Err(TxnError::LockContended(_))));
    }
}
