// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Receive-side decoding: turn a changegroup byte stream into per-revlog
//! entries ready for `Revlog::addgroup` (spec §4.4 "Unpacker").
//!
//! This module only resolves wire framing and v1's implicit delta-base
//! chaining. Turning a `link_node` into the target changelog's local
//! `RevIdx` is left to the caller via `resolve_group`'s `linkmapper`,
//! because that mapping only exists once changelog revisions have actually
//! been appended — the same reason the original `revlog.addgroup` takes a
//! `linkmapper` callback rather than doing the translation itself.

use std::collections::HashSet;
use std::io::Read;

use revlog::revidx::RevIdx;
use revlog::store::{GroupEntry, Revlog};
use revlog_types::{Delta, Node, RevisionFlags};

use crate::chunk;
use crate::errors::CgError;
use crate::header::{CgVersion, DeltaHeader};

#[derive(Debug, Clone)]
pub struct UnpackedEntry {
    pub node: Node,
    pub p1: Node,
    pub p2: Node,
    /// `Node::NULL` means the delta is a literal full text.
    pub delta_base: Node,
    pub link_node: Node,
    pub flags: RevisionFlags,
    pub delta: Delta,
}

#[derive(Debug, Clone, Default)]
pub struct UnpackedSection {
    pub entries: Vec<UnpackedEntry>,
}

#[derive(Debug, Clone)]
pub struct UnpackedFile {
    pub path: Vec<u8>,
    pub section: UnpackedSection,
}

#[derive(Debug, Clone)]
pub struct UnpackedChangegroup {
    pub version: CgVersion,
    pub changelog: UnpackedSection,
    pub manifest: UnpackedSection,
    /// Per-directory manifest groups (v3 tree manifests only; always empty
    /// for v1/v2 and for the flat-manifest-only repos this crate targets).
    pub dirmanifests: Vec<UnpackedFile>,
    pub files: Vec<UnpackedFile>,
}

fn read_section<R: Read>(r: &mut R, version: CgVersion) -> Result<UnpackedSection, CgError> {
    let header_len = DeltaHeader::header_len(version);
    let mut entries = Vec::new();
    let mut chain: Option<Node> = None;
    while let Some(chunk) = chunk::read_chunk(r)? {
        if chunk.len() < header_len {
            return Err(CgError::UnexpectedEof { got: chunk.len(), expected: header_len });
        }
        let header = DeltaHeader::decode(version, &chunk[..header_len])?;
        let delta_base = if version == CgVersion::V1 {
            chain.unwrap_or(header.p1)
        } else {
            header.delta_base
        };
        let delta = Delta::decode(&chunk[header_len..])?;
        chain = Some(header.node);
        entries.push(UnpackedEntry {
            node: header.node,
            p1: header.p1,
            p2: header.p2,
            delta_base,
            link_node: header.link_node,
            flags: header.flags,
            delta,
        });
    }
    Ok(UnpackedSection { entries })
}

fn read_named_group_list<R: Read>(
    r: &mut R,
    version: CgVersion,
) -> Result<Vec<UnpackedFile>, CgError> {
    let mut out = Vec::new();
    loop {
        match chunk::read_chunk(r)? {
            None => break,
            Some(path) => {
                let section = read_section(r, version)?;
                out.push(UnpackedFile { path, section });
            }
        }
    }
    Ok(out)
}

/// Parse a whole changegroup stream (spec §4.4 wire layout).
pub fn unpack<R: Read>(r: &mut R, version: CgVersion) -> Result<UnpackedChangegroup, CgError> {
    let changelog = read_section(r, version)?;
    let manifest = read_section(r, version)?;
    let dirmanifests = if version.group_list_count() == 2 {
        read_named_group_list(r, version)?
    } else {
        Vec::new()
    };
    let files = read_named_group_list(r, version)?;
    Ok(UnpackedChangegroup { version, changelog, manifest, dirmanifests, files })
}

/// Every node currently present in `revlog`, for seeding `resolve_group`'s
/// `known` set (the nodes a v1 delta's implicit base is allowed to name).
pub fn node_set(revlog: &Revlog) -> HashSet<Node> {
    (0..revlog.len())
        .map(RevIdx::from)
        .filter_map(|rev| revlog.node(rev).ok())
        .collect()
}

/// Resolve an `UnpackedSection` into `GroupEntry`s ready for
/// `Revlog::addgroup`, translating each entry's `link_node` through
/// `linkmapper` and catching v1's dangling-parent case at this layer
/// (spec §9: "detect this at header time and fail with a clear error"
/// rather than let it surface later as a hash mismatch).
///
/// `known` should start as the target revlog's existing node set
/// (`node_set`); it is extended in place as entries are resolved so later
/// entries in the same section may reference earlier ones.
pub fn resolve_group(
    section: &UnpackedSection,
    known: &mut HashSet<Node>,
    mut linkmapper: impl FnMut(Node) -> Result<RevIdx, CgError>,
) -> Result<Vec<GroupEntry>, CgError> {
    let mut out = Vec::with_capacity(section.entries.len());
    for e in &section.entries {
        if !e.delta_base.is_null() && !known.contains(&e.delta_base) {
            return Err(CgError::DanglingV1Parent(e.delta_base));
        }
        let link = linkmapper(e.link_node)?;
        out.push(GroupEntry {
            node: e.node,
            p1: e.p1,
            p2: e.p2,
            delta_base: e.delta_base,
            link,
            flags: e.flags,
            delta: e.delta.clone(),
        });
        known.insert(e.node);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::DeltaHeader;
    use crate::packer;

    fn node(b: u8) -> Node {
        Node::new([b; 20])
    }

    #[test]
    fn empty_changegroup_is_valid() {
        let mut buf = Vec::new();
        chunk::write_group_end(&mut buf).unwrap(); // changelog
        chunk::write_group_end(&mut buf).unwrap(); // manifest
        chunk::write_group_end(&mut buf).unwrap(); // files terminator
        let mut cursor = std::io::Cursor::new(buf);
        let cg = unpack(&mut cursor, CgVersion::V2).unwrap();
        assert!(cg.changelog.entries.is_empty());
        assert!(cg.manifest.entries.is_empty());
        assert!(cg.files.is_empty());
    }

    #[test]
    fn v3_has_empty_dirmanifest_list_by_default() {
        let mut buf = Vec::new();
        chunk::write_group_end(&mut buf).unwrap(); // changelog
        chunk::write_group_end(&mut buf).unwrap(); // manifest
        chunk::write_group_end(&mut buf).unwrap(); // dirmanifest list terminator
        chunk::write_group_end(&mut buf).unwrap(); // files terminator
        let mut cursor = std::io::Cursor::new(buf);
        let cg = unpack(&mut cursor, CgVersion::V3).unwrap();
        assert!(cg.dirmanifests.is_empty());
    }

    #[test]
    fn v1_chain_resolves_base_to_previous_node() {
        let mut buf = Vec::new();
        let h1 = DeltaHeader {
            node: node(1),
            p1: Node::NULL,
            p2: Node::NULL,
            delta_base: Node::NULL,
            link_node: node(1),
            flags: RevisionFlags::empty(),
        };
        let mut chunk1 = Vec::new();
        h1.encode(CgVersion::V1, &mut chunk1);
        Delta::new_fulltext(b"one".to_vec()).encode(&mut chunk1);
        chunk::write_chunk(&mut buf, &chunk1).unwrap();

        let h2 = DeltaHeader {
            node: node(2),
            p1: node(1),
            p2: Node::NULL,
            delta_base: Node::NULL,
            link_node: node(2),
            flags: RevisionFlags::empty(),
        };
        let mut chunk2 = Vec::new();
        h2.encode(CgVersion::V1, &mut chunk2);
        Delta::new_fulltext(b"two".to_vec()).encode(&mut chunk2);
        chunk::write_chunk(&mut buf, &chunk2).unwrap();
        chunk::write_group_end(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let section = read_section(&mut cursor, CgVersion::V1).unwrap();
        assert_eq!(section.entries[0].delta_base, Node::NULL);
        assert_eq!(section.entries[1].delta_base, node(1));
    }

    #[test]
    fn resolve_group_catches_dangling_v1_parent() {
        let section = UnpackedSection {
            entries: vec![UnpackedEntry {
                node: node(9),
                p1: node(1),
                p2: Node::NULL,
                delta_base: node(1),
                link_node: node(9),
                flags: RevisionFlags::empty(),
                delta: Delta::new_fulltext(b"x".to_vec()),
            }],
        };
        let mut known = HashSet::new();
        let err = resolve_group(&section, &mut known, |_n| Ok(RevIdx::zero())).unwrap_err();
        assert!(matches!(err, CgError::DanglingV1Parent(_)));
    }

    #[test]
    fn pack_then_unpack_roundtrips_a_linear_section() {
        use revlog::config::RevlogConfig;
        let mut revlog = Revlog::new(RevlogConfig::default());
        let n0 = revlog.addrevision(b"AAAA\n".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = revlog.rev(&n0).unwrap();
        let n1 = revlog
            .addrevision(b"AAAA\nBBBB\n".to_vec(), RevIdx::new(1), Some(r0), None)
            .unwrap();

        let clnode_of = |rev: RevIdx| -> Result<Node, CgError> { Ok(revlog.node(rev)?) };
        let mut known = HashSet::new();
        let bytes = packer::pack_section(&revlog, &[n0, n1], CgVersion::V2, &clnode_of, &mut known).unwrap();

        let mut cursor = std::io::Cursor::new(bytes);
        let section = read_section(&mut cursor, CgVersion::V2).unwrap();
        assert_eq!(section.entries.len(), 2);
        assert_eq!(section.entries[0].node, n0);
        assert_eq!(section.entries[1].node, n1);
    }
}
