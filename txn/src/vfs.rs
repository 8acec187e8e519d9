// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! A minimal stand-in for the original's `vfs` objects: every path the
//! journal/transaction machinery touches is named relative to one of two
//! roots, store or working-copy, rather than as an absolute path (spec
//! §4.6 "vfs-tag").

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsTag {
    /// `.hg/store`: the revlog data files, index files, phase roots.
    Store,
    /// `.hg`: dirstate, bookmarks, branch cache.
    WorkingCopy,
}

pub struct Vfs {
    store_root: PathBuf,
    wc_root: PathBuf,
}

impl Vfs {
    pub fn new(store_root: impl Into<PathBuf>, wc_root: impl Into<PathBuf>) -> Self {
        Vfs { store_root: store_root.into(), wc_root: wc_root.into() }
    }

    fn root(&self, tag: VfsTag) -> &Path {
        match tag {
            VfsTag::Store => &self.store_root,
            VfsTag::WorkingCopy => &self.wc_root,
        }
    }

    pub fn path(&self, tag: VfsTag, name: &str) -> PathBuf {
        self.root(tag).join(name)
    }

    pub fn exists(&self, tag: VfsTag, name: &str) -> bool {
        self.path(tag, name).exists()
    }

    /// Current length of `name`, or 0 if it doesn't exist yet: the
    /// "pre-length" a journal entry for a brand-new file records.
    pub fn len(&self, tag: VfsTag, name: &str) -> io::Result<u64> {
        match fs::metadata(self.path(tag, name)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub fn read(&self, tag: VfsTag, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(tag, name))
    }

    pub fn write(&self, tag: VfsTag, name: &str, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path(tag, name).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(self.path(tag, name), contents)
    }

    pub fn open_append(&self, tag: VfsTag, name: &str) -> io::Result<File> {
        if let Some(parent) = self.path(tag, name).parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(self.path(tag, name))
    }

    pub fn truncate(&self, tag: VfsTag, name: &str, len: u64) -> io::Result<()> {
        let path = self.path(tag, name);
        if !path.exists() && len == 0 {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)
    }

    pub fn remove(&self, tag: VfsTag, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path(tag, name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn copy(&self, tag: VfsTag, from: &str, to: &str) -> io::Result<()> {
        if let Some(parent) = self.path(tag, to).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path(tag, from), self.path(tag, to))?;
        Ok(())
    }
}
