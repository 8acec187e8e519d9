// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The filelog: a revlog holding one tracked file's history, with an
//! optional copy-metadata prefix (spec §4.3).
//!
//! A revision that records a copy/rename carries a metadata block at the
//! very start of its raw text:
//!
//! ```text
//! \x01\n
//! copy: <source path>\n
//! copyrev: <source node, hex>\n
//! \x01\n
//! <file content>
//! ```
//!
//! A file whose content happens to start with `\x01\n` but carries no
//! metadata still gets an (empty) metadata block, so the leading marker is
//! never ambiguous with real content.

use std::str::FromStr;

use revlog_types::Node;

use crate::errors::RevlogError;
use crate::revidx::RevIdx;
use crate::store::Revlog;

const META_MARKER: &[u8] = b"\x01\n";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMeta {
    pub copy_path: Option<String>,
    pub copy_rev: Option<Node>,
}

impl FileMeta {
    fn is_empty(&self) -> bool {
        self.copy_path.is_none() && self.copy_rev.is_none()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(path) = &self.copy_path {
            out.extend_from_slice(b"copy: ");
            out.extend_from_slice(path.as_bytes());
            out.push(b'\n');
        }
        if let Some(rev) = &self.copy_rev {
            out.extend_from_slice(b"copyrev: ");
            out.extend_from_slice(rev.to_hex().as_bytes());
            out.push(b'\n');
        }
        out
    }

    fn decode(raw: &[u8]) -> Result<Self, RevlogError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| RevlogError::Corrupt("file metadata block is not utf-8".into()))?;
        let mut meta = FileMeta::default();
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("copy: ") {
                meta.copy_path = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("copyrev: ") {
                meta.copy_rev = Some(
                    Node::from_str(value)
                        .map_err(|e| RevlogError::Corrupt(format!("bad copyrev: {}", e)))?,
                );
            }
        }
        Ok(meta)
    }
}

/// Split a raw filelog revision into its metadata block (if any) and its
/// actual content.
fn split_meta(raw: &[u8]) -> Result<(FileMeta, &[u8]), RevlogError> {
    if !raw.starts_with(META_MARKER) {
        return Ok((FileMeta::default(), raw));
    }
    let rest = &raw[META_MARKER.len()..];
    let end = rest
        .windows(META_MARKER.len())
        .position(|w| w == META_MARKER)
        .ok_or_else(|| RevlogError::Corrupt("unterminated file metadata block".into()))?;
    let meta = FileMeta::decode(&rest[..end])?;
    let content = &rest[end + META_MARKER.len()..];
    Ok((meta, content))
}

fn join_meta(meta: &FileMeta, content: &[u8]) -> Vec<u8> {
    if meta.is_empty() && !content.starts_with(META_MARKER) {
        return content.to_vec();
    }
    let mut out = Vec::with_capacity(content.len() + 16);
    out.extend_from_slice(META_MARKER);
    out.extend_from_slice(&meta.encode());
    out.extend_from_slice(META_MARKER);
    out.extend_from_slice(content);
    out
}

pub struct Filelog {
    revlog: Revlog,
}

impl Filelog {
    pub fn new(revlog: Revlog) -> Self {
        Filelog { revlog }
    }

    pub fn revlog(&self) -> &Revlog {
        &self.revlog
    }

    pub fn revlog_mut(&mut self) -> &mut Revlog {
        &mut self.revlog
    }

    /// Read a revision's actual content, stripping any copy-metadata
    /// prefix (the filelog-level analogue of `revlog::revision`, spec
    /// §4.1 step 5 plus this layer's own metadata unwrap).
    pub fn read(&self, rev: RevIdx) -> Result<(Vec<u8>, FileMeta), RevlogError> {
        let raw = self.revlog.revision(rev, false)?;
        let (meta, content) = split_meta(&raw)?;
        Ok((content.to_vec(), meta))
    }

    pub fn add(
        &mut self,
        content: &[u8],
        meta: &FileMeta,
        link: RevIdx,
        p1: Option<RevIdx>,
        p2: Option<RevIdx>,
    ) -> Result<Node, RevlogError> {
        self.revlog.addrevision(join_meta(meta, content), link, p1, p2)
    }
}
