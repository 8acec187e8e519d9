// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Send-side encoding: read deltas out of changelog/manifest/filelog
//! revlogs and frame them as a changegroup (spec §4.4 "Packer (send
//! side)").
//!
//! The delta-base policy below favors reusing each revision's *existing*
//! on-disk delta when its base is already known to the receiver (either
//! because it was part of the common set the caller discovered, or
//! because this same pack call already emitted it earlier in the
//! section); otherwise it falls back to a full text. This keeps outgoing
//! streams small without ever naming a base the other side can't resolve.

use std::collections::HashSet;

use revlog::revidx::RevIdx;
use revlog::store::Revlog;
use revlog_types::{Delta, Node};

use crate::chunk;
use crate::errors::CgError;
use crate::header::{CgVersion, DeltaHeader};

fn choose_delta(
    revlog: &Revlog,
    rev: RevIdx,
    prev: Option<RevIdx>,
    version: CgVersion,
    known: &HashSet<Node>,
) -> Result<(Node, Delta), CgError> {
    match version {
        CgVersion::V1 => match prev {
            // v1 always deltas against the previous entry in the stream.
            Some(base_rev) => Ok((revlog.node(base_rev)?, revlog.revdiff(base_rev, rev)?)),
            None => {
                let (p1rev, _) = revlog.parentrevs(rev)?;
                if p1rev.is_null() {
                    Ok((Node::NULL, Delta::new_fulltext(revlog.revision(rev, true)?)))
                } else {
                    Ok((revlog.node(p1rev)?, revlog.revdiff(p1rev, rev)?))
                }
            }
        },
        CgVersion::V2 | CgVersion::V3 => {
            if let Some(base_rev) = revlog.delta_parent(rev)? {
                let base_node = revlog.node(base_rev)?;
                if known.contains(&base_node) {
                    return Ok((base_node, revlog.revdiff(base_rev, rev)?));
                }
            }
            if let Some(base_rev) = prev {
                let base_node = revlog.node(base_rev)?;
                if known.contains(&base_node) {
                    return Ok((base_node, revlog.revdiff(base_rev, rev)?));
                }
            }
            Ok((Node::NULL, Delta::new_fulltext(revlog.revision(rev, true)?)))
        }
    }
}

/// Pack one revlog's worth of revisions (a changelog, the flat manifest,
/// or a single file's history) into a framed, terminated group.
///
/// `clnode_of` maps a changelog `RevIdx` (as returned by `revlog.linkrev`)
/// to that changeset's node — every revlog's `link_rev` lives in the same
/// changelog revision space, so one closure serves changelog, manifest
/// and every file section alike. `known` tracks which nodes the receiver
/// can already resolve a delta base against; it is extended with every
/// node this call emits.
pub fn pack_section(
    revlog: &Revlog,
    nodes: &[Node],
    version: CgVersion,
    clnode_of: &dyn Fn(RevIdx) -> Result<Node, CgError>,
    known: &mut HashSet<Node>,
) -> Result<Vec<u8>, CgError> {
    let mut out = Vec::new();
    let mut prev: Option<RevIdx> = None;
    for node in nodes {
        let rev = revlog.rev(node)?;
        let (p1, p2) = revlog.parents(node)?;
        let link_node = clnode_of(revlog.linkrev(rev)?)?;
        let (delta_base, delta) = choose_delta(revlog, rev, prev, version, known)?;
        let header = DeltaHeader { node: *node, p1, p2, delta_base, link_node, flags: revlog.flags(rev)? };

        let mut chunk = Vec::new();
        header.encode(version, &mut chunk);
        delta.encode(&mut chunk);
        chunk::write_chunk(&mut out, &chunk)?;

        known.insert(*node);
        prev = Some(rev);
    }
    chunk::write_group_end(&mut out)?;
    Ok(out)
}

/// One file's (or, for v3, one directory manifest's) contribution to a
/// named group list: a path plus the nodes to send for it, in the order
/// the caller has already determined (spec §4.4 step 4: lexicographic by
/// path).
pub struct FileToSend<'a> {
    pub path: Vec<u8>,
    pub revlog: &'a Revlog,
    pub nodes: Vec<Node>,
}

fn pack_named_group_list(
    files: &[FileToSend<'_>],
    version: CgVersion,
    clnode_of: &dyn Fn(RevIdx) -> Result<Node, CgError>,
    known: &mut HashSet<Node>,
) -> Result<Vec<u8>, CgError> {
    let mut out = Vec::new();
    for f in files {
        chunk::write_chunk(&mut out, &f.path)?;
        out.extend_from_slice(&pack_section(f.revlog, &f.nodes, version, clnode_of, known)?);
    }
    chunk::write_group_end(&mut out)?;
    Ok(out)
}

/// Assemble a complete changegroup: changelog group, flat manifest group,
/// an empty directory-manifest list (this crate does not model tree
/// manifests, so v3's extra section is always present-but-empty), and the
/// per-file groups (spec §4.4 wire layout).
pub fn pack_changegroup(
    changelog: &Revlog,
    changelog_nodes: &[Node],
    manifest: &Revlog,
    manifest_nodes: &[Node],
    files: &[FileToSend<'_>],
    version: CgVersion,
) -> Result<Vec<u8>, CgError> {
    let mut out = Vec::new();
    let mut known: HashSet<Node> = HashSet::new();
    let clnode_of = |rev: RevIdx| -> Result<Node, CgError> { Ok(changelog.node(rev)?) };

    out.extend_from_slice(&pack_section(changelog, changelog_nodes, version, &clnode_of, &mut known)?);
    out.extend_from_slice(&pack_section(manifest, manifest_nodes, version, &clnode_of, &mut known)?);

    if version.group_list_count() == 2 {
        chunk::write_group_end(&mut out)?;
    }

    out.extend_from_slice(&pack_named_group_list(files, version, &clnode_of, &mut known)?);
    Ok(out)
}
