// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Journal-backed transactions with commit/abort/recover and nesting
//! (spec §4.6, SPEC_FULL §2.4).

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use sha1::{Digest, Sha1};

use crate::errors::TxnError;
use crate::journal::{self, JournalEntry, JOURNAL_NAME};
use crate::vfs::{Vfs, VfsTag};

struct Backup {
    tag: VfsTag,
    name: String,
    backup_name: String,
    /// `None` means `name` did not exist yet when the backup was taken;
    /// abort should remove it rather than restore empty contents.
    checksum: Option<[u8; 20]>,
}

fn sha1_of(bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.input(bytes);
    let digest = hasher.result();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

type PretxncloseHook<'vfs> = Box<dyn FnMut() -> Result<(), TxnError> + 'vfs>;
type Hook<'vfs> = Box<dyn FnMut() + 'vfs>;

enum Outcome {
    Open,
    Committed,
    Aborted,
}

struct Inner<'vfs> {
    vfs: &'vfs Vfs,
    entries: Vec<JournalEntry>,
    seen: HashSet<(VfsTag, String)>,
    backups: Vec<Backup>,
    pretxnclose: Vec<(String, PretxncloseHook<'vfs>)>,
    txnclose: Vec<(String, Hook<'vfs>)>,
    txnabort: Vec<(String, Hook<'vfs>)>,
    nest_depth: u32,
    outcome: Outcome,
    logger: Option<slog::Logger>,
}

/// A running transaction. Cheap to clone via [`Transaction::nest`]; every
/// clone shares the same underlying journal and hook lists, and only the
/// outermost one's [`Transaction::close`] actually finalizes anything.
#[derive(Clone)]
pub struct Transaction<'vfs> {
    inner: Rc<RefCell<Inner<'vfs>>>,
}

impl<'vfs> Transaction<'vfs> {
    pub fn begin(vfs: &'vfs Vfs) -> Result<Self, TxnError> {
        Self::begin_with_logger(vfs, None)
    }

    pub fn begin_with_logger(
        vfs: &'vfs Vfs,
        logger: Option<slog::Logger>,
    ) -> Result<Self, TxnError> {
        if vfs.exists(VfsTag::Store, JOURNAL_NAME) {
            return Err(TxnError::AbandonedTransaction);
        }
        // Writing the (empty) journal file is itself the commitment that a
        // transaction is now open; every `add()` call appends to and
        // fsyncs it before the caller is allowed to touch the named file.
        vfs.write(VfsTag::Store, JOURNAL_NAME, b"")?;
        Ok(Transaction {
            inner: Rc::new(RefCell::new(Inner {
                vfs,
                entries: Vec::new(),
                seen: HashSet::new(),
                backups: Vec::new(),
                pretxnclose: Vec::new(),
                txnclose: Vec::new(),
                txnabort: Vec::new(),
                nest_depth: 1,
                outcome: Outcome::Open,
                logger,
            })),
        })
    }

    /// Record that `name` is about to be mutated, if this is the first
    /// time this transaction has seen it. Only the first recorded
    /// pre-length for a given path is ever honored on abort (spec §2.4).
    pub fn add(&self, tag: VfsTag, name: &str) -> Result<(), TxnError> {
        let mut inner = self.inner.borrow_mut();
        let key = (tag, name.to_string());
        if inner.seen.contains(&key) {
            return Ok(());
        }
        let pre_length = inner.vfs.len(tag, name)?;
        let entry = JournalEntry { tag, path: name.to_string(), pre_length };
        let mut journal_file = inner.vfs.open_append(VfsTag::Store, JOURNAL_NAME)?;
        journal::append_entry(&mut journal_file, &entry)?;
        inner.entries.push(entry);
        inner.seen.insert(key);
        Ok(())
    }

    /// Copy `name` aside to `backup_name` for whole-file restore on abort
    /// (the `journal.dirstate`/`journal.bookmarks`/`journal.phaseroots`
    /// family, spec §4.6), recording a checksum to restore against.
    pub fn add_backup(&self, tag: VfsTag, name: &str, backup_name: &str) -> Result<(), TxnError> {
        let mut inner = self.inner.borrow_mut();
        let checksum = if inner.vfs.exists(tag, name) {
            inner.vfs.copy(tag, name, backup_name)?;
            let contents = inner.vfs.read(tag, backup_name)?;
            Some(sha1_of(&contents))
        } else {
            None
        };
        inner.backups.push(Backup {
            tag,
            name: name.to_string(),
            backup_name: backup_name.to_string(),
            checksum,
        });
        Ok(())
    }

    pub fn on_pretxnclose(
        &self,
        name: impl Into<String>,
        hook: impl FnMut() -> Result<(), TxnError> + 'vfs,
    ) {
        self.inner.borrow_mut().pretxnclose.push((name.into(), Box::new(hook)));
    }

    pub fn on_txnclose(&self, name: impl Into<String>, hook: impl FnMut() + 'vfs) {
        self.inner.borrow_mut().txnclose.push((name.into(), Box::new(hook)));
    }

    pub fn on_txnabort(&self, name: impl Into<String>, hook: impl FnMut() + 'vfs) {
        self.inner.borrow_mut().txnabort.push((name.into(), Box::new(hook)));
    }

    /// A handle that defers the real close until the outermost transaction
    /// closes; pre-close validators still run exactly once overall.
    pub fn nest(&self) -> Self {
        self.inner.borrow_mut().nest_depth += 1;
        Transaction { inner: Rc::clone(&self.inner) }
    }

    /// Commit this handle. Only the outermost handle's call actually runs
    /// `pretxnclose` validators, fsyncs, unlinks the journal and fires
    /// `txnclose` hooks; an inner handle's call just decrements the nest
    /// count (spec §4.6 "Nested transactions").
    pub fn close(self) -> Result<(), TxnError> {
        let depth = {
            let mut inner = self.inner.borrow_mut();
            inner.nest_depth -= 1;
            inner.nest_depth
        };
        if depth > 0 {
            return Ok(());
        }
        if !matches!(self.inner.borrow().outcome, Outcome::Open) {
            return Ok(());
        }

        // Take the hook list out so running it doesn't hold `inner`
        // borrowed for the duration (a hook may itself call `abort()`,
        // which needs its own borrow).
        let mut pretxnclose = std::mem::take(&mut self.inner.borrow_mut().pretxnclose);
        for (name, hook) in pretxnclose.iter_mut() {
            if let Err(err) = hook() {
                let msg = err.to_string();
                self.abort()?;
                return Err(TxnError::HookAborted(name.clone(), msg));
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.vfs.remove(VfsTag::Store, JOURNAL_NAME)?;
        for backup in inner.backups.iter() {
            inner.vfs.remove(backup.tag, &backup.backup_name)?;
        }
        inner.outcome = Outcome::Committed;
        if let Some(logger) = &inner.logger {
            slog::debug!(logger, "transaction committed");
        }
        let mut txnclose = std::mem::take(&mut inner.txnclose);
        drop(inner);
        for (_, hook) in txnclose.iter_mut() {
            hook();
        }
        Ok(())
    }

    /// Force an abort regardless of nesting depth: any nested failure
    /// aborts the whole transaction (spec §4.6 "Abort").
    pub fn abort(&self) -> Result<(), TxnError> {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.outcome, Outcome::Open) {
            return Ok(());
        }
        for entry in inner.entries.iter().rev() {
            inner.vfs.truncate(entry.tag, &entry.path, entry.pre_length)?;
        }
        for backup in &inner.backups {
            match backup.checksum {
                None => inner.vfs.remove(backup.tag, &backup.name)?,
                Some(expected) => {
                    let contents = inner.vfs.read(backup.tag, &backup.backup_name)?;
                    if sha1_of(&contents) != expected {
                        return Err(TxnError::BackupChecksumMismatch(
                            inner.vfs.path(backup.tag, &backup.backup_name),
                        ));
                    }
                    inner.vfs.write(backup.tag, &backup.name, &contents)?;
                    inner.vfs.remove(backup.tag, &backup.backup_name)?;
                }
            }
        }
        inner.vfs.remove(VfsTag::Store, JOURNAL_NAME)?;
        inner.outcome = Outcome::Aborted;
        if let Some(logger) = &inner.logger {
            slog::debug!(logger, "transaction aborted");
        }
        let mut txnabort = std::mem::take(&mut inner.txnabort);
        drop(inner);
        for (_, hook) in txnabort.iter_mut() {
            hook();
        }
        Ok(())
    }
}

impl<'vfs> Drop for Transaction<'vfs> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) != 1 {
            return;
        }
        let open = matches!(self.inner.borrow().outcome, Outcome::Open);
        if open {
            let _ = self.abort();
        }
    }
}

/// Run the abort path for a journal left behind by a process that died
/// before closing its transaction (spec §4.6 "Recover"): on repo open, a
/// journal without a matching lock signals this should run.
pub fn recover(vfs: &Vfs) -> Result<bool, TxnError> {
    if !vfs.exists(VfsTag::Store, JOURNAL_NAME) {
        return Ok(false);
    }
    let contents = vfs.read(VfsTag::Store, JOURNAL_NAME)?;
    let entries = journal::parse(&String::from_utf8_lossy(&contents))?;
    for entry in entries.iter().rev() {
        vfs.truncate(entry.tag, &entry.path, entry.pre_length)?;
    }
    for (tag, backup_name, name) in [
        (VfsTag::WorkingCopy, "journal.dirstate", "dirstate"),
        (VfsTag::WorkingCopy, "journal.branch", "branch"),
        (VfsTag::WorkingCopy, "journal.desc", "desc"),
        (VfsTag::WorkingCopy, "journal.bookmarks", "bookmarks"),
        (VfsTag::Store, "journal.phaseroots", "phaseroots"),
    ] {
        if vfs.exists(tag, backup_name) {
            let contents = vfs.read(tag, backup_name)?;
            vfs.write(tag, name, &contents)?;
            vfs.remove(tag, backup_name)?;
        }
    }
    vfs.remove(VfsTag::Store, JOURNAL_NAME)?;
    Ok(true)
}
