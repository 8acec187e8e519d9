// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The journal file: a text list of `(vfs-tag, path, pre-length)` triples,
//! one per line, written before the path it names is ever mutated (spec
//! §4.6, SPEC_FULL §2.4).

use std::fs::File;
use std::io::{Read, Write};

use crate::errors::TxnError;
use crate::vfs::VfsTag;

pub const JOURNAL_NAME: &str = "journal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub tag: VfsTag,
    pub path: String,
    pub pre_length: u64,
}

fn tag_str(tag: VfsTag) -> &'static str {
    match tag {
        VfsTag::Store => "store",
        VfsTag::WorkingCopy => "plain",
    }
}

fn parse_tag(s: &str) -> Result<VfsTag, TxnError> {
    match s {
        "store" => Ok(VfsTag::Store),
        "plain" => Ok(VfsTag::WorkingCopy),
        other => Err(TxnError::MalformedJournal(other.to_string())),
    }
}

pub fn encode_entry(entry: &JournalEntry) -> String {
    format!("{}\t{}\t{}\n", tag_str(entry.tag), entry.path, entry.pre_length)
}

pub fn append_entry(file: &mut File, entry: &JournalEntry) -> std::io::Result<()> {
    file.write_all(encode_entry(entry).as_bytes())?;
    file.sync_data()
}

pub fn parse(contents: &str) -> Result<Vec<JournalEntry>, TxnError> {
    let mut out = Vec::new();
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let tag = parts.next().ok_or_else(|| TxnError::MalformedJournal(line.to_string()))?;
        let path = parts.next().ok_or_else(|| TxnError::MalformedJournal(line.to_string()))?;
        let pre_length = parts
            .next()
            .ok_or_else(|| TxnError::MalformedJournal(line.to_string()))?
            .parse::<u64>()
            .map_err(|_| TxnError::MalformedJournal(line.to_string()))?;
        out.push(JournalEntry { tag: parse_tag(tag)?, path: path.to_string(), pre_length });
    }
    Ok(out)
}

pub fn read(file: &mut impl Read) -> Result<Vec<JournalEntry>, TxnError> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    parse(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text() {
        let entries = vec![
            JournalEntry { tag: VfsTag::Store, path: "00changelog.i".to_string(), pre_length: 128 },
            JournalEntry { tag: VfsTag::WorkingCopy, path: "dirstate".to_string(), pre_length: 0 },
        ];
        let text: String = entries.iter().map(encode_entry).collect();
        assert_eq!(parse(&text).unwrap(), entries);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("store\tfoo\n").is_err());
        assert!(parse("bogus\tfoo\t0\n").is_err());
        assert!(parse("store\tfoo\tnotanumber\n").is_err());
    }
}
