// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

/// Error taxonomy for the journal/transaction/lock machinery (spec §7).
#[derive(Debug, Error)]
pub enum TxnError {
    #[error("abandoned transaction found: a journal already exists")]
    AbandonedTransaction,
    #[error("lock {0:?} is held by another process")]
    LockContended(std::path::PathBuf),
    #[error("pretxnclose hook {0:?} aborted the transaction: {1}")]
    HookAborted(String, String),
    #[error("backup checksum mismatch restoring {0:?}")]
    BackupChecksumMismatch(std::path::PathBuf),
    #[error("malformed journal entry: {0:?}")]
    MalformedJournal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
