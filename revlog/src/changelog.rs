// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The changelog: a revlog whose revisions are structured changeset
//! records rather than opaque bytes (spec §4.3).
//!
//! Each changeset's text has the classic Mercurial layout:
//!
//! ```text
//! <manifest node, hex>
//! <user>
//! <date> <tz offset>[ <key>:<value>\0...]
//! <file path>
//! <file path>
//! ...
//!
//! <description>
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;

use revlog_types::Node;

use crate::errors::RevlogError;
use crate::revidx::RevIdx;
use crate::store::Revlog;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogEntry {
    pub manifest_node: Node,
    pub user: String,
    /// Seconds since the epoch, UTC.
    pub date: i64,
    /// Timezone offset in seconds east of UTC, stored negated the way
    /// Mercurial's own changelog does (`date tz` with `tz` such that
    /// `local = utc - tz`).
    pub tz_offset: i32,
    pub extra: BTreeMap<String, String>,
    pub files: Vec<String>,
    pub description: String,
}

impl ChangelogEntry {
    fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&self.manifest_node.to_hex());
        out.push('\n');
        out.push_str(&self.user);
        out.push('\n');
        out.push_str(&self.date.to_string());
        out.push(' ');
        out.push_str(&self.tz_offset.to_string());
        for (k, v) in &self.extra {
            out.push(' ');
            out.push_str(k);
            out.push(':');
            out.push_str(v);
        }
        out.push('\n');
        for file in &self.files {
            out.push_str(file);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.description);
        out.into_bytes()
    }

    fn decode(raw: &[u8]) -> Result<Self, RevlogError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| RevlogError::Corrupt("changeset text is not utf-8".into()))?;
        let mut lines = text.splitn(3, '\n');
        let manifest_line = lines.next().ok_or_else(|| RevlogError::Corrupt("empty changeset".into()))?;
        let user = lines.next().ok_or_else(|| RevlogError::Corrupt("changeset missing user line".into()))?;
        let rest = lines.next().ok_or_else(|| RevlogError::Corrupt("changeset missing body".into()))?;

        let manifest_node = Node::from_str(manifest_line)
            .map_err(|e| RevlogError::Corrupt(format!("bad manifest node: {}", e)))?;

        let mut body_lines = rest.split('\n');
        let date_line = body_lines.next().ok_or_else(|| RevlogError::Corrupt("changeset missing date line".into()))?;
        let mut date_parts = date_line.split(' ');
        let date = date_parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| RevlogError::Corrupt("bad changeset date".into()))?;
        let tz_offset = date_parts
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(|| RevlogError::Corrupt("bad changeset timezone".into()))?;
        let mut extra = BTreeMap::new();
        for field in date_parts {
            if let Some((k, v)) = field.split_once(':') {
                extra.insert(k.to_string(), v.to_string());
            }
        }

        let mut files = Vec::new();
        let mut description_lines: Vec<&str> = Vec::new();
        let mut in_files = true;
        for line in body_lines {
            if in_files {
                if line.is_empty() {
                    in_files = false;
                } else {
                    files.push(line.to_string());
                }
            } else {
                description_lines.push(line);
            }
        }
        let description = description_lines.join("\n");

        Ok(ChangelogEntry { manifest_node, user, date, tz_offset, extra, files, description })
    }
}

/// Thin wrapper around `Revlog` that speaks changesets instead of bytes.
pub struct Changelog {
    revlog: Revlog,
}

impl Changelog {
    pub fn new(revlog: Revlog) -> Self {
        Changelog { revlog }
    }

    pub fn revlog(&self) -> &Revlog {
        &self.revlog
    }

    pub fn revlog_mut(&mut self) -> &mut Revlog {
        &mut self.revlog
    }

    pub fn len(&self) -> usize {
        self.revlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revlog.is_empty()
    }

    pub fn read(&self, rev: RevIdx) -> Result<ChangelogEntry, RevlogError> {
        let raw = self.revlog.revision(rev, false)?;
        ChangelogEntry::decode(&raw)
    }

    /// Commit one changeset, keyed to itself as its own link revision
    /// (spec §4.1: a changelog revision's linkrev is always its own
    /// revision number).
    pub fn add(
        &mut self,
        entry: &ChangelogEntry,
        p1: Option<RevIdx>,
        p2: Option<RevIdx>,
    ) -> Result<Node, RevlogError> {
        let link = RevIdx::from(self.revlog.len());
        self.revlog.addrevision(entry.encode(), link, p1, p2)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> ChangelogEntry {
        let mut extra = BTreeMap::new();
        extra.insert("branch".to_string(), "default".to_string());
        ChangelogEntry {
            manifest_node: Node::new([9u8; 20]),
            user: "alice <alice@example.com>".to_string(),
            date: 1_700_000_000,
            tz_offset: 0,
            extra,
            files: vec!["a.txt".to_string(), "dir/b.txt".to_string()],
            description: "first commit\n\nlonger body".to_string(),
        }
    }

    #[test]
    fn encode_decode_roundtrips() {
        let entry = sample();
        let encoded = entry.encode();
        let decoded = ChangelogEntry::decode(&encoded).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn add_then_read_roundtrips_through_revlog() {
        use crate::config::RevlogConfig;
        let mut cl = Changelog::new(Revlog::new(RevlogConfig::default()));
        let entry = sample();
        let node = cl.add(&entry, None, None).unwrap();
        let rev = cl.revlog().rev(&node).unwrap();
        assert_eq!(cl.read(rev).unwrap(), entry);
    }
}
