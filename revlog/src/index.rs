// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The packed binary index format (spec §6, "Revlog v1 index entry").
//!
//! Each entry is 64 bytes, big-endian:
//!
//! ```text
//! offset_and_flags   u64   (48-bit byte offset << 16) | 16-bit flags
//! compressed_size    i32
//! uncompressed_size  i32
//! base_rev           i32
//! link_rev           i32
//! p1_rev             i32
//! p2_rev             i32
//! node               [u8; 20]
//! padding            [u8; 12]
//! ```
//!
//! Entry 0 is special: its low 16 bits carry the format version and feature
//! flags instead of per-revision flags, and its true data offset is defined
//! to be zero (the header lives where flags would otherwise be encoded).

use byteorder::{BigEndian, ByteOrder};

use revlog_types::flags::{RevisionFlags, RevlogFeatures, RevlogVersion};
use revlog_types::{Node, NODE_LEN};

use crate::errors::RevlogError;
use crate::revidx::RevIdx;

pub const ENTRY_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: RevlogVersion,
    pub features: RevlogFeatures,
}

impl Header {
    pub fn is_inline(&self) -> bool {
        self.features.contains(RevlogFeatures::INLINE_DATA)
    }

    pub fn is_general_delta(&self) -> bool {
        self.features.contains(RevlogFeatures::GENERAL_DELTA)
    }

    fn encode_word(&self) -> u16 {
        (self.version.as_u16() & 0x000f) | (self.features.bits() << 4)
    }

    fn decode_word(word: u16) -> Result<Self, RevlogError> {
        let version_bits = word & 0x000f;
        let version = RevlogVersion::from_u16(version_bits as u16)
            .ok_or(RevlogError::BadVersion(version_bits))?;
        let features = RevlogFeatures::from_bits_truncate(word >> 4);
        Ok(Header { version, features })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub offset: u64,
    pub flags: RevisionFlags,
    pub compressed_len: i32,
    pub uncompressed_len: i32,
    pub base_rev: Option<RevIdx>,
    pub link_rev: RevIdx,
    pub p1: Option<RevIdx>,
    pub p2: Option<RevIdx>,
    pub node: Node,
}

fn rev_or_null(v: i32) -> Option<RevIdx> {
    if v < 0 {
        None
    } else {
        Some(RevIdx::new(v))
    }
}

fn rev_field(v: Option<RevIdx>) -> i32 {
    v.map(|r| r.as_i32()).unwrap_or(-1)
}

impl Entry {
    /// Parse the entry at `idx` (0-based) from the fixed-size region `buf`.
    /// `is_first` selects the header/offset special-casing for revision 0.
    pub fn parse(buf: &[u8], is_first: bool) -> Result<Self, RevlogError> {
        if buf.len() < ENTRY_SIZE {
            return Err(RevlogError::TruncatedIndex {
                needed: ENTRY_SIZE,
                available: buf.len(),
            });
        }
        let raw = BigEndian::read_u64(&buf[0..8]);
        let low16 = (raw & 0xffff) as u16;
        let (offset, flags) = if is_first {
            (0u64, RevisionFlags::empty())
        } else {
            (raw >> 16, RevisionFlags::from_bits_truncate(low16))
        };

        let compressed_len = BigEndian::read_i32(&buf[8..12]);
        let uncompressed_len = BigEndian::read_i32(&buf[12..16]);
        let base_rev = rev_or_null(BigEndian::read_i32(&buf[16..20]));
        let link_rev = rev_or_null(BigEndian::read_i32(&buf[20..24]))
            .ok_or_else(|| RevlogError::Corrupt("link_rev must not be null".into()))?;
        let p1 = rev_or_null(BigEndian::read_i32(&buf[24..28]));
        let p2 = rev_or_null(BigEndian::read_i32(&buf[28..32]));
        let node = Node::from_slice(&buf[32..32 + NODE_LEN])
            .map_err(|e| RevlogError::Corrupt(format!("bad node: {}", e)))?;

        Ok(Entry {
            offset,
            flags,
            compressed_len,
            uncompressed_len,
            base_rev,
            link_rev,
            p1,
            p2,
            node,
        })
    }

    pub fn write(&self, idx: RevIdx, header: Option<Header>, out: &mut Vec<u8>) {
        let low16 = match header {
            Some(h) => h.encode_word(),
            None => self.flags.bits(),
        };
        let offset = if idx == RevIdx::zero() { 0 } else { self.offset };
        let raw = (offset << 16) | low16 as u64;

        let mut buf = [0u8; ENTRY_SIZE];
        BigEndian::write_u64(&mut buf[0..8], raw);
        BigEndian::write_i32(&mut buf[8..12], self.compressed_len);
        BigEndian::write_i32(&mut buf[12..16], self.uncompressed_len);
        BigEndian::write_i32(&mut buf[16..20], rev_field(self.base_rev));
        BigEndian::write_i32(&mut buf[20..24], self.link_rev.as_i32());
        BigEndian::write_i32(&mut buf[24..28], rev_field(self.p1));
        BigEndian::write_i32(&mut buf[28..32], rev_field(self.p2));
        buf[32..32 + NODE_LEN].copy_from_slice(self.node.as_bytes());
        out.extend_from_slice(&buf);
    }

    /// `true` if this entry is a full snapshot rather than a delta: the
    /// on-disk convention is that a snapshot's `base_rev` equals its own
    /// revision number, which we represent as `base_rev == None` once
    /// resolved against `idx` (spec §3: "if base_rev == rev, the payload is
    /// a full snapshot").
    pub fn is_snapshot(&self, idx: RevIdx) -> bool {
        match self.base_rev {
            None => true,
            Some(b) => b == idx,
        }
    }

    pub fn resolved_base(&self, idx: RevIdx) -> Option<RevIdx> {
        match self.base_rev {
            Some(b) if b != idx => Some(b),
            _ => None,
        }
    }
}

pub fn parse_header(first_entry_raw: &[u8]) -> Result<Header, RevlogError> {
    if first_entry_raw.len() < 8 {
        return Err(RevlogError::TruncatedIndex { needed: 8, available: first_entry_raw.len() });
    }
    let raw = BigEndian::read_u64(&first_entry_raw[0..8]);
    Header::decode_word((raw & 0xffff) as u16)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_entry(node: Node, base: Option<RevIdx>, link: RevIdx) -> Entry {
        Entry {
            offset: 0,
            flags: RevisionFlags::empty(),
            compressed_len: 10,
            uncompressed_len: 10,
            base_rev: base,
            link_rev: link,
            p1: None,
            p2: None,
            node,
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = Header {
            version: RevlogVersion::V1,
            features: RevlogFeatures::INLINE_DATA | RevlogFeatures::GENERAL_DELTA,
        };
        let mut out = Vec::new();
        let entry = sample_entry(Node::NULL, None, RevIdx::zero());
        entry.write(RevIdx::zero(), Some(header), &mut out);
        let parsed_header = parse_header(&out).unwrap();
        assert_eq!(parsed_header, header);
    }

    #[test]
    fn entry_roundtrip_non_first() {
        let node = Node::new([7u8; NODE_LEN]);
        let entry = sample_entry(node, Some(RevIdx::new(3)), RevIdx::new(9));
        let mut out = Vec::new();
        entry.write(RevIdx::new(4), None, &mut out);
        let parsed = Entry::parse(&out, false).unwrap();
        assert_eq!(parsed.node, node);
        assert_eq!(parsed.base_rev, Some(RevIdx::new(3)));
        assert_eq!(parsed.link_rev, RevIdx::new(9));
    }

    #[test]
    fn rejects_truncated_entry() {
        let err = Entry::parse(&[0u8; 10], false).unwrap_err();
        assert!(matches!(err, RevlogError::TruncatedIndex { .. }));
    }

    #[test]
    fn snapshot_detection() {
        let entry = sample_entry(Node::NULL, None, RevIdx::zero());
        assert!(entry.is_snapshot(RevIdx::zero()));

        let delta_entry = sample_entry(Node::NULL, Some(RevIdx::new(2)), RevIdx::zero());
        assert!(!delta_entry.is_snapshot(RevIdx::new(5)));
        assert_eq!(delta_entry.resolved_base(RevIdx::new(5)), Some(RevIdx::new(2)));
    }
}
