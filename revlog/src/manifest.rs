// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The manifest: a revlog whose revisions are sorted path -> file-node
//! maps (spec §4.3).
//!
//! Text format, one line per tracked path, sorted by path:
//!
//! ```text
//! <path>\0<file node, hex>[<flag>]\n
//! ```
//!
//! `<flag>` is a single character (`x` executable, `l` symlink) or absent
//! for a regular file. Only the flat manifest is implemented; a tree
//! manifest (directory-sharded, for very large trees) is a straightforward
//! follow-on that reuses this same line format per directory and is not
//! needed at the scale this crate targets.

use std::collections::BTreeMap;
use std::str::FromStr;

use revlog_types::Node;

use crate::errors::RevlogError;
use crate::revidx::RevIdx;
use crate::store::Revlog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFlag {
    Executable,
    Symlink,
}

impl FileFlag {
    fn as_char(self) -> char {
        match self {
            FileFlag::Executable => 'x',
            FileFlag::Symlink => 'l',
        }
    }

    fn from_char(c: char) -> Result<Self, RevlogError> {
        match c {
            'x' => Ok(FileFlag::Executable),
            'l' => Ok(FileFlag::Symlink),
            other => Err(RevlogError::Corrupt(format!("unknown manifest flag {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub node: Node,
    pub flag: Option<FileFlag>,
}

/// A manifest revision, decoded into a path-sorted map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestText {
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl ManifestText {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (path, entry) in &self.entries {
            out.extend_from_slice(path.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.node.to_hex().as_bytes());
            if let Some(flag) = entry.flag {
                out.push(flag.as_char() as u8);
            }
            out.push(b'\n');
        }
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, RevlogError> {
        let mut entries = BTreeMap::new();
        for line in raw.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let nul = line
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| RevlogError::Corrupt("manifest line missing NUL separator".into()))?;
            let path = std::str::from_utf8(&line[..nul])
                .map_err(|_| RevlogError::Corrupt("manifest path is not utf-8".into()))?
                .to_string();
            let rest = std::str::from_utf8(&line[nul + 1..])
                .map_err(|_| RevlogError::Corrupt("manifest node is not utf-8".into()))?;
            let (hex, flag) = if rest.len() > 40 {
                let flag_char = rest[40..]
                    .chars()
                    .next()
                    .ok_or_else(|| RevlogError::Corrupt("manifest flag byte missing".into()))?;
                (&rest[..40], Some(FileFlag::from_char(flag_char)?))
            } else {
                (rest, None)
            };
            let node = Node::from_str(hex).map_err(|e| RevlogError::Corrupt(format!("bad manifest node: {}", e)))?;
            entries.insert(path, ManifestEntry { node, flag });
        }
        Ok(ManifestText { entries })
    }

    /// The paths that differ between `self` and `other` (added, removed,
    /// or changed), used to compute a changeset's file list and to find
    /// candidate ancestors for link-shadowing (spec §4.2).
    pub fn diff_paths<'a>(&'a self, other: &'a ManifestText) -> Vec<&'a str> {
        let mut out = Vec::new();
        for (path, entry) in &self.entries {
            match other.entries.get(path) {
                Some(other_entry) if other_entry == entry => {}
                _ => out.push(path.as_str()),
            }
        }
        for path in other.entries.keys() {
            if !self.entries.contains_key(path) {
                out.push(path.as_str());
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

pub struct Manifest {
    revlog: Revlog,
}

impl Manifest {
    pub fn new(revlog: Revlog) -> Self {
        Manifest { revlog }
    }

    pub fn revlog(&self) -> &Revlog {
        &self.revlog
    }

    pub fn revlog_mut(&mut self) -> &mut Revlog {
        &mut self.revlog
    }

    pub fn read(&self, rev: RevIdx) -> Result<ManifestText, RevlogError> {
        let raw = self.revlog.revision(rev, false)?;
        ManifestText::decode(&raw)
    }

    pub fn add(
        &mut self,
        text: &ManifestText,
        link: RevIdx,
        p1: Option<RevIdx>,
        p2: Option<RevIdx>,
    ) -> Result<Node, RevlogError> {
        self.revlog.addrevision(text.encode(), link, p1, p2)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(byte: u8, flag: Option<FileFlag>) -> ManifestEntry {
        ManifestEntry { node: Node::new([byte; 20]), flag }
    }

    #[test]
    fn encode_decode_roundtrips() {
        let mut text = ManifestText::default();
        text.entries.insert("a.txt".to_string(), entry(1, None));
        text.entries.insert("bin/run.sh".to_string(), entry(2, Some(FileFlag::Executable)));
        text.entries.insert("link".to_string(), entry(3, Some(FileFlag::Symlink)));

        let encoded = text.encode();
        let decoded = ManifestText::decode(&encoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn diff_paths_reports_added_removed_and_changed() {
        let mut old = ManifestText::default();
        old.entries.insert("same.txt".to_string(), entry(1, None));
        old.entries.insert("removed.txt".to_string(), entry(2, None));
        old.entries.insert("changed.txt".to_string(), entry(3, None));

        let mut new = ManifestText::default();
        new.entries.insert("same.txt".to_string(), entry(1, None));
        new.entries.insert("changed.txt".to_string(), entry(4, None));
        new.entries.insert("added.txt".to_string(), entry(5, None));

        let diff = old.diff_paths(&new);
        assert_eq!(diff, vec!["added.txt", "changed.txt", "removed.txt"]);
    }
}
