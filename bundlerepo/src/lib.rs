// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The bundle-repo overlay: a revlog whose prefix lives in an on-disk
//! store and whose tail comes from a changegroup bundle file (spec §4.5).
//!
//! This crate only overlays the changelog and the flat manifest; per-file
//! overlays follow the identical pattern (`BundleRevlog::build` takes any
//! underlying `Revlog`) but assembling them needs the full set of touched
//! paths out of the manifest diff, which is exchange-layer glue this crate
//! does not otherwise need.

pub mod errors;
mod overlay;
mod section;
pub mod source;

pub use errors::BundleError;
pub use overlay::BundleRevlog;
pub use source::BundleSource;

use changegroup::CgVersion;
use revlog::revidx::RevIdx;
use revlog::store::Revlog;
use revlog_types::Node;

/// Open a bundle file's changelog and flat-manifest groups as overlays on
/// top of the matching on-disk revlogs, in one call: the manifest
/// overlay's linknodes are resolved against the changelog overlay that was
/// just built, exactly as the packer emitted them.
pub struct BundleOverlay<'a> {
    pub changelog: BundleRevlog<'a>,
    pub manifest: BundleRevlog<'a>,
}

impl<'a> BundleOverlay<'a> {
    pub fn open(
        changelog: &'a Revlog,
        manifest: &'a Revlog,
        source: &'a BundleSource,
        mut pos: u64,
        version: CgVersion,
    ) -> Result<Self, BundleError> {
        let cl_overlay = BundleRevlog::build(changelog, source, &mut pos, version, None)?;
        let link_node_to_rev: &dyn Fn(Node) -> Option<RevIdx> = &|node: Node| cl_overlay.rev_for_node(node);
        let manifest_overlay =
            BundleRevlog::build(manifest, source, &mut pos, version, Some(link_node_to_rev))?;
        Ok(BundleOverlay { changelog: cl_overlay, manifest: manifest_overlay })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use changegroup::packer::pack_section;
    use revlog::config::RevlogConfig;
    use std::collections::HashSet;
    use std::io::Write;

    fn build_linear(n: usize) -> (Revlog, Vec<Node>) {
        let mut r = Revlog::new(RevlogConfig::default());
        let mut prev = None;
        let mut nodes = Vec::new();
        for i in 0..n {
            let content = format!("c{}\n", i).into_bytes();
            let node = r.addrevision(content, RevIdx::from(i), prev, None).unwrap();
            prev = Some(r.rev(&node).unwrap());
            nodes.push(node);
        }
        (r, nodes)
    }

    #[test]
    fn overlay_routes_tail_revisions_to_the_bundle() {
        let (underlying, nodes) = build_linear(4);

        // Build the "sender's" full six-revision history (same first four
        // nodes, since content+parents are identical) and pack the tail.
        let (full, full_nodes) = build_linear(6);
        let clnode_of = |rev: RevIdx| -> Result<Node, changegroup::CgError> { Ok(full.node(rev)?) };
        let mut known: HashSet<Node> = nodes.iter().copied().collect();
        let packed =
            pack_section(&full, &full_nodes[4..], changegroup::CgVersion::V2, &clnode_of, &mut known)
                .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("b.hg");
        let mut f = std::fs::File::create(&bundle_path).unwrap();
        f.write_all(b"HG10UN").unwrap();
        f.write_all(&packed).unwrap();
        drop(f);

        let (source, mut pos, version) = BundleSource::open(&bundle_path).unwrap();
        let overlay = BundleRevlog::build(&underlying, &source, &mut pos, version, None).unwrap();

        assert_eq!(overlay.len(), 6);
        assert_eq!(overlay.node(RevIdx::from(4)).unwrap(), full_nodes[4]);
        assert_eq!(overlay.node(RevIdx::from(5)).unwrap(), full_nodes[5]);
        assert_eq!(overlay.revision(RevIdx::from(4)).unwrap(), b"c4\n");
        assert_eq!(overlay.revision(RevIdx::from(5)).unwrap(), b"c5\n");
        assert_eq!(overlay.revision(RevIdx::from(1)).unwrap(), b"c1\n");

        let rev4 = overlay.rev(&full_nodes[4]).unwrap();
        let rev1 = overlay.rev(&nodes[1]).unwrap();
        assert_eq!(rev4, RevIdx::from(4));
        assert_eq!(rev1, RevIdx::from(1));
    }

    #[test]
    fn write_operations_fail_not_supported() {
        let (underlying, _nodes) = build_linear(1);
        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("empty.hg");
        let mut f = std::fs::File::create(&bundle_path).unwrap();
        f.write_all(b"HG10UN").unwrap();
        changegroup::chunk::write_group_end(&mut f).unwrap();
        drop(f);

        let (source, mut pos, version) = BundleSource::open(&bundle_path).unwrap();
        let mut overlay = BundleRevlog::build(&underlying, &source, &mut pos, version, None).unwrap();
        assert!(overlay.addrevision().is_err());
        assert!(overlay.addgroup().is_err());
        assert!(overlay.strip().is_err());
        assert!(overlay.checksize().is_err());
    }

    #[test]
    fn revdiff_reuses_stored_delta_across_two_bundle_revisions() {
        let (underlying, nodes) = build_linear(4);
        let (full, full_nodes) = build_linear(6);
        let clnode_of = |rev: RevIdx| -> Result<Node, changegroup::CgError> { Ok(full.node(rev)?) };
        let mut known: HashSet<Node> = nodes.iter().copied().collect();
        let packed =
            pack_section(&full, &full_nodes[4..], changegroup::CgVersion::V2, &clnode_of, &mut known)
                .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let bundle_path = dir.path().join("b.hg");
        let mut f = std::fs::File::create(&bundle_path).unwrap();
        f.write_all(b"HG10UN").unwrap();
        f.write_all(&packed).unwrap();
        drop(f);

        let (source, mut pos, version) = BundleSource::open(&bundle_path).unwrap();
        let overlay = BundleRevlog::build(&underlying, &source, &mut pos, version, None).unwrap();

        let delta = overlay.revdiff(RevIdx::from(4), RevIdx::from(5)).unwrap();
        assert_eq!(delta.apply(b"c4\n"), b"c5\n");
    }
}
