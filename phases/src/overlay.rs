// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The bundle-repo phase override (spec §4.5 "Life cycle": "A phase cache
//! override marks all bundle revisions as draft").

use bundlerepo::BundleRevlog;
use revlog::revidx::RevIdx;

use crate::phase::Phase;

/// The phase of `rev` as seen through a mounted bundle: any revision whose
/// bytes come from the bundle file itself (not the underlying on-disk
/// store) is always draft, regardless of what the on-disk phase roots
/// would otherwise say. Revisions that route to the underlying store fall
/// back to `fallback`, which callers compute from the real `PhaseRoots`.
pub fn bundle_phase_of(overlay: &BundleRevlog, rev: RevIdx, fallback: Phase) -> Phase {
    match overlay.bundle_revs().next() {
        Some(first_bundle_rev) if rev.as_i32() >= first_bundle_rev.as_i32() => Phase::Draft,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlerepo::BundleSource;
    use changegroup::packer::pack_section;
    use revlog::config::RevlogConfig;
    use revlog::store::Revlog;
    use revlog_types::Node;
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
    fn bundle_revisions_are_always_draft() {
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

        assert_eq!(bundle_phase_of(&overlay, RevIdx::from(1), Phase::Public), Phase::Public);
        assert_eq!(bundle_phase_of(&overlay, RevIdx::from(4), Phase::Public), Phase::Draft);
        assert_eq!(bundle_phase_of(&overlay, RevIdx::from(5), Phase::Secret), Phase::Draft);
    }
}
