// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Journal, transaction, and repo lock machinery (spec §4.6).
//!
//! A transaction journals every file it is about to mutate before the
//! first byte of that file changes, so a crash at any point leaves the
//! repository either fully committed or cleanly revertible. Locking is a
//! separate, advisory layer: callers take the working-copy lock before the
//! store lock and hold both for the duration of a transaction.

pub mod errors;
pub mod journal;
pub mod lock;
pub mod transaction;
pub mod vfs;

pub use errors::TxnError;
pub use journal::JournalEntry;
pub use lock::{lock, lock_repo, lock_store, lock_working_copy, LockGuard, RepoLocks};
pub use transaction::{recover, Transaction};
pub use vfs::{Vfs, VfsTag};
