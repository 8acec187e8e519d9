// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Per-delta header layout (spec §6 "Per-delta header", §4.4).
//!
//! v1: node, p1, p2, linknode — the delta base is never on the wire, it is
//! implicitly "the previous entry in the stream" (or `p1` for the first
//! entry of a group).
//! v2: adds an explicit `deltabase` field, enabling general-delta transport.
//! v3: adds a trailing `flags: u16` field on top of v2.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use revlog_types::{Node, RevisionFlags, NODE_LEN};

use crate::errors::CgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgVersion {
    V1,
    V2,
    V3,
}

impl CgVersion {
    pub fn wire_tag(self) -> &'static str {
        match self {
            CgVersion::V1 => "01",
            CgVersion::V2 => "02",
            CgVersion::V3 => "03",
        }
    }

    pub fn from_wire_tag(tag: &str) -> Result<Self, CgError> {
        match tag {
            "01" => Ok(CgVersion::V1),
            "02" => Ok(CgVersion::V2),
            "03" => Ok(CgVersion::V3),
            other => Err(CgError::UnknownVersion(other.to_string())),
        }
    }

    /// Number of node-sized/flag fields the on-wire header carries,
    /// excluding the 4-byte chunk length prefix.
    fn header_len(self) -> usize {
        match self {
            CgVersion::V1 => NODE_LEN * 4,
            CgVersion::V2 => NODE_LEN * 5,
            CgVersion::V3 => NODE_LEN * 5 + 2,
        }
    }

    /// How many directory-manifest/file group lists follow the flat
    /// manifest group (spec §4.4 wire layout): v3 interposes a list of
    /// per-directory manifest groups before the file groups.
    pub fn group_list_count(self) -> usize {
        match self {
            CgVersion::V1 | CgVersion::V2 => 1,
            CgVersion::V3 => 2,
        }
    }
}

/// A decoded per-delta header plus the raw delta bytes that followed it in
/// the chunk (still needs `delta_base` resolution for v1, see
/// `resolve_v1_base`).
#[derive(Debug, Clone)]
pub struct DeltaHeader {
    pub node: Node,
    pub p1: Node,
    pub p2: Node,
    /// Only meaningful as-is for v2/v3; for v1 it is `p1` and must be
    /// overridden by `resolve_v1_base` with "previous node in stream" once
    /// one exists.
    pub delta_base: Node,
    pub link_node: Node,
    pub flags: RevisionFlags,
}

impl DeltaHeader {
    pub fn encode(&self, version: CgVersion, out: &mut Vec<u8>) {
        out.extend_from_slice(self.node.as_bytes());
        out.extend_from_slice(self.p1.as_bytes());
        out.extend_from_slice(self.p2.as_bytes());
        if version != CgVersion::V1 {
            out.extend_from_slice(self.delta_base.as_bytes());
        }
        out.extend_from_slice(self.link_node.as_bytes());
        if version == CgVersion::V3 {
            out.write_u16::<BigEndian>(self.flags.bits()).expect("write to Vec cannot fail");
        }
    }

    pub fn decode(version: CgVersion, buf: &[u8]) -> Result<Self, CgError> {
        if buf.len() < version.header_len() {
            return Err(CgError::UnexpectedEof { got: buf.len(), expected: version.header_len() });
        }
        let mut pos = 0usize;
        let mut next_node = |pos: &mut usize| -> Result<Node, CgError> {
            let n = Node::from_slice(&buf[*pos..*pos + NODE_LEN])?;
            *pos += NODE_LEN;
            Ok(n)
        };
        let node = next_node(&mut pos)?;
        let p1 = next_node(&mut pos)?;
        let p2 = next_node(&mut pos)?;
        let delta_base = if version != CgVersion::V1 { next_node(&mut pos)? } else { p1 };
        let link_node = next_node(&mut pos)?;
        let flags = if version == CgVersion::V3 {
            let mut rest = &buf[pos..pos + 2];
            RevisionFlags::from_bits_truncate(rest.read_u16::<BigEndian>()?)
        } else {
            RevisionFlags::empty()
        };
        Ok(DeltaHeader { node, p1, p2, delta_base, link_node, flags })
    }

    pub fn header_len(version: CgVersion) -> usize {
        version.header_len()
    }
}

/// v1's delta base is never transmitted: it is implicitly the previous
/// entry's node in this group's stream, or `p1` for the very first entry
/// (spec §4.4, §9 "Changegroup v1's per-delta... breaks when the first
/// entry claims a non-null p1 not present yet in the target revlog").
///
/// Returns the resolved base, or an error if the first entry's `p1` is
/// itself not null and not already known — detected at header time rather
/// than surfacing as a later hash mismatch, per the spec's "possibly-buggy
/// source behavior" note.
pub fn resolve_v1_base(
    header: &DeltaHeader,
    prev_in_stream: Option<Node>,
    target_has_node: impl Fn(&Node) -> bool,
) -> Result<Node, CgError> {
    let base = match prev_in_stream {
        Some(prev) => prev,
        None => header.p1,
    };
    if !base.is_null() && !target_has_node(&base) {
        return Err(CgError::DanglingV1Parent(base));
    }
    Ok(base)
}
