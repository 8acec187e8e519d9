// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! 20-byte content hashes ("nodes") and the revision-hashing rule.

use std::fmt;
use std::str::FromStr;

use ascii::{AsciiStr, AsciiString};
use sha1::{Digest, Sha1};

use crate::errors::NodeError;

pub const NODE_LEN: usize = 20;

/// A 20-byte content hash identifying a revision.
///
/// The all-zero node (`Node::NULL`) is the sentinel used as the parent of a
/// root revision, as an unknown delta base, and as the "file deleted" marker
/// in manifest diffs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node([u8; NODE_LEN]);

impl Node {
    pub const NULL: Node = Node([0u8; NODE_LEN]);

    pub fn new(bytes: [u8; NODE_LEN]) -> Self {
        Node(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, NodeError> {
        if bytes.len() != NODE_LEN {
            return Err(NodeError::BadLength(bytes.len()));
        }
        let mut out = [0u8; NODE_LEN];
        out.copy_from_slice(bytes);
        Ok(Node(out))
    }

    pub fn is_null(&self) -> bool {
        *self == Node::NULL
    }

    pub fn as_bytes(&self) -> &[u8; NODE_LEN] {
        &self.0
    }

    /// Short hex form: the first 12 hex digits (6 bytes), as Mercurial shows
    /// in UI contexts.
    pub fn short_hex(&self) -> String {
        self.to_hex()[..12].to_string()
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(NODE_LEN * 2);
        for b in &self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    pub fn to_ascii(&self) -> AsciiString {
        AsciiStr::from_ascii(self.to_hex().as_bytes())
            .expect("hex digits are ascii")
            .to_owned()
    }

    /// Hash a revision's content the way changelog/manifest/filelog
    /// revisions are hashed: `H(sorted(p1, p2) || content)`.
    ///
    /// Parents are sorted by byte value, not by which one is "p1" at the
    /// call site, so that a revision's node does not depend on parent
    /// order. `p1`/`p2` default to `Node::NULL` when absent.
    pub fn hash_revision(p1: &Node, p2: &Node, content: &[u8]) -> Node {
        let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
        let mut hasher = Sha1::new();
        hasher.input(&lo.0);
        hasher.input(&hi.0);
        hasher.input(content);
        let digest = hasher.result();
        let mut out = [0u8; NODE_LEN];
        out.copy_from_slice(&digest);
        Node(out)
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::NULL
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.short_hex())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Node {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Node {
    type Err = NodeError;

    fn from_str(hex: &str) -> Result<Self, Self::Err> {
        if hex.len() != NODE_LEN * 2 {
            return Err(NodeError::BadHexLength(hex.len()));
        }
        let mut out = [0u8; NODE_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(|_| NodeError::BadHex(hex.to_string()))?;
            out[i] = u8::from_str_radix(s, 16).map_err(|_| NodeError::BadHex(hex.to_string()))?;
        }
        Ok(Node(out))
    }
}

/// Resolve a (possibly ambiguous) hex prefix against a set of known nodes
/// supplied in iteration order. Used for partial-hex lookup; ambiguous
/// prefixes are an error rather than "pick the first".
pub fn resolve_prefix<'a, I>(prefix: &str, nodes: I) -> Result<Node, NodeError>
where
    I: IntoIterator<Item = &'a Node>,
{
    if prefix.len() == NODE_LEN * 2 {
        return prefix.parse();
    }
    if prefix.is_empty() || prefix.len() > NODE_LEN * 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NodeError::BadHex(prefix.to_string()));
    }
    let mut found: Option<Node> = None;
    for node in nodes {
        if node.to_hex().starts_with(prefix) {
            if let Some(existing) = found {
                if existing != *node {
                    return Err(NodeError::AmbiguousPrefix(prefix.to_string()));
                }
            } else {
                found = Some(*node);
            }
        }
    }
    found.ok_or_else(|| NodeError::UnknownPrefix(prefix.to_string()))
}
