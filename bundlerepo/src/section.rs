// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Reading one changegroup section while recording each entry's byte
//! offset in the bundle file, instead of decoding its delta eagerly the
//! way `changegroup::unpacker` does. `BundleRevlog` seeks back to these
//! offsets on demand (spec §4.5: "read their bytes by seeking the bundle
//! file to the stored offset").

use byteorder::{BigEndian, ByteOrder};

use changegroup::{CgError, CgVersion, DeltaHeader};
use revlog_types::Node;

use crate::errors::BundleError;
use crate::source::BundleSource;

pub struct RawEntry {
    pub node: Node,
    pub p1: Node,
    pub p2: Node,
    /// `Node::NULL` means this entry is a literal full text.
    pub delta_base: Node,
    pub link_node: Node,
    pub flags: revlog_types::RevisionFlags,
    pub offset: u64,
    pub length: u64,
}

/// Read every entry of one group (changelog, manifest, or a single file),
/// advancing `pos` past the terminating zero-length chunk.
pub fn read_section(
    source: &BundleSource,
    pos: &mut u64,
    version: CgVersion,
) -> Result<Vec<RawEntry>, BundleError> {
    let header_len = DeltaHeader::header_len(version) as u64;
    let mut out = Vec::new();
    let mut chain: Option<Node> = None;

    loop {
        let len_bytes = source.read_at(*pos, 4)?;
        let len = BigEndian::read_i32(&len_bytes);
        *pos += 4;
        if len == 0 {
            break;
        }
        if len < 5 {
            return Err(CgError::InvalidChunkLength(len).into());
        }
        let payload_len = (len - 4) as u64;
        if payload_len < header_len {
            return Err(CgError::UnexpectedEof { got: payload_len as usize, expected: header_len as usize }.into());
        }
        let header_bytes = source.read_at(*pos, header_len)?;
        let header = DeltaHeader::decode(version, &header_bytes)?;

        let delta_base = if version == CgVersion::V1 {
            chain.unwrap_or(header.p1)
        } else {
            header.delta_base
        };

        let delta_offset = *pos + header_len;
        let delta_len = payload_len - header_len;
        *pos += payload_len;
        chain = Some(header.node);

        out.push(RawEntry {
            node: header.node,
            p1: header.p1,
            p2: header.p2,
            delta_base,
            link_node: header.link_node,
            flags: header.flags,
            offset: delta_offset,
            length: delta_len,
        });
    }
    Ok(out)
}
