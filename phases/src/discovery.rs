// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Set-reconciliation discovery (spec §4.7 "Discovery"):
//! `findcommonincoming`/`findcommonoutgoing` reduced to their algorithmic
//! core — sample local revisions, ask a `known` oracle (the `known` peer
//! RPC of spec §6) which of their nodes the other side already has, and
//! fold the answers into a common/missing partition of the local
//! ancestry. The peer crate's in-memory double supplies the oracle in
//! tests; a real implementation would back it with `Peer::known`.

use std::collections::HashSet;

use revlog::ops::{ancestors, heads};
use revlog::revidx::RevIdx;
use revlog::store::Revlog;
use revlog_types::Node;

use crate::errors::PhasesError;

/// Local revisions are sampled in batches of this size per round, newest
/// first, mirroring the "exchange boolean-vectors over sampled subsets"
/// language of spec §4.7 without reproducing the original's randomized
/// sampling (noted as a simplification in DESIGN.md).
const SAMPLE_SIZE: usize = 200;

/// The result of reconciling the local ancestry of a set of heads against
/// a `known` oracle: the largest common ancestor-closed set found, and
/// everything else (missing).
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Nodes present on both sides.
    pub common: Vec<Node>,
    /// The heads of `common` within the local ancestry searched.
    pub common_heads: Vec<Node>,
    /// Local nodes not found common: the candidate outgoing set.
    pub missing: Vec<Node>,
}

/// Reconcile the ancestry of `local_heads` against `known`, which answers
/// "does the other side have this node?" for a batch of nodes at a time
/// (spec §6 `known(nodes) -> [bool]`).
///
/// Terminates in at most `len(ancestry)/SAMPLE_SIZE + 1` rounds: each round
/// either marks at least one node common (shrinking `undecided` by that
/// node's whole undecided ancestry) or consumes `SAMPLE_SIZE` nodes into
/// `missing` for good, so `undecided` is strictly decreasing.
pub fn find_common(
    local: &Revlog,
    local_heads: &[RevIdx],
    mut known: impl FnMut(&[Node]) -> Result<Vec<bool>, PhasesError>,
) -> Result<Discovery, PhasesError> {
    let mut undecided: Vec<i32> = ancestors(local, local_heads, RevIdx::zero(), true)?
        .into_iter()
        .map(|r| r.as_i32())
        .collect();
    // Sample newest-first: recent history is most likely to already be
    // shared after an earlier partial exchange.
    undecided.sort_unstable_by(|a, b| b.cmp(a));

    let mut common: HashSet<i32> = HashSet::new();
    let mut missing: HashSet<i32> = HashSet::new();
    let mut cursor = 0usize;

    while cursor < undecided.len() {
        let end = (cursor + SAMPLE_SIZE).min(undecided.len());
        let sample: Vec<i32> = undecided[cursor..end]
            .iter()
            .copied()
            .filter(|r| !common.contains(r) && !missing.contains(r))
            .collect();
        if sample.is_empty() {
            cursor = end;
            continue;
        }
        let nodes: Vec<Node> =
            sample.iter().map(|&r| local.node(RevIdx::new(r))).collect::<Result<_, _>>()?;
        let answers = known(&nodes)?;
        if answers.len() != sample.len() {
            return Err(PhasesError::MalformedRoots(
                "known() returned the wrong number of answers".to_string(),
            ));
        }
        for (&rev, is_known) in sample.iter().zip(answers.iter()) {
            if *is_known {
                for anc in ancestors(local, &[RevIdx::new(rev)], RevIdx::zero(), true)? {
                    common.insert(anc.as_i32());
                }
            } else {
                missing.insert(rev);
            }
        }
        cursor = end;
    }

    // Anything never classified known stays missing: a node whose remote
    // status we never learned (sampling exhausted without a `true`
    // answer reaching it) cannot be assumed common.
    for &rev in &undecided {
        if !common.contains(&rev) {
            missing.insert(rev);
        }
    }

    let common_revs: Vec<RevIdx> = common.iter().map(|&v| RevIdx::new(v)).collect();
    let common_heads_revs = heads(local, &common_revs)?;

    let mut common_nodes: Vec<Node> =
        common_revs.iter().map(|&r| local.node(r)).collect::<Result<_, _>>()?;
    common_nodes.sort();
    let common_heads: Vec<Node> =
        common_heads_revs.into_iter().map(|r| local.node(r)).collect::<Result<_, _>>()?;
    let missing_nodes: Vec<Node> = missing
        .iter()
        .map(|&v| local.node(RevIdx::new(v)))
        .collect::<Result<_, _>>()?;

    Ok(Discovery { common: common_nodes, common_heads, missing: missing_nodes })
}

/// `findcommonincoming`: what the remote has that isn't reachable from our
/// own heads, expressed the way this crate can resolve it without a real
/// peer connection — the common ancestry plus which of the remote's
/// advertised heads we don't already have locally (the actual missing
/// *content* is what a subsequent `getbundle` would fetch).
pub fn find_common_incoming(
    local: &Revlog,
    local_heads: &[RevIdx],
    remote_heads: &[Node],
    known: impl FnMut(&[Node]) -> Result<Vec<bool>, PhasesError>,
) -> Result<(Discovery, Vec<Node>), PhasesError> {
    let discovery = find_common(local, local_heads, known)?;
    let missing_heads: Vec<Node> =
        remote_heads.iter().filter(|n| local.rev(n).is_err()).copied().collect();
    Ok((discovery, missing_heads))
}

/// `findcommonoutgoing`: the dual — everything in our own ancestry the
/// other side doesn't have, plus the heads of that missing set (what a
/// subsequent `getbundle`/push would need to send).
pub fn find_common_outgoing(
    local: &Revlog,
    local_heads: &[RevIdx],
    known: impl FnMut(&[Node]) -> Result<Vec<bool>, PhasesError>,
) -> Result<Discovery, PhasesError> {
    find_common(local, local_heads, known)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revlog::config::RevlogConfig;

    fn linear(n: usize) -> (Revlog, Vec<Node>) {
        let mut r = Revlog::new(RevlogConfig::default());
        let mut prev = None;
        let mut nodes = Vec::new();
        for i in 0..n {
            let node =
                r.addrevision(format!("c{}", i).into_bytes(), RevIdx::from(i), prev, None).unwrap();
            prev = Some(r.rev(&node).unwrap());
            nodes.push(node);
        }
        (r, nodes)
    }

    #[test]
    fn fully_known_ancestry_is_entirely_common() {
        let (r, nodes) = linear(5);
        let tip = r.rev(&nodes[4]).unwrap();
        let disc = find_common(&r, &[tip], |ns| Ok(vec![true; ns.len()])).unwrap();
        assert_eq!(disc.common.len(), 5);
        assert_eq!(disc.common_heads, vec![nodes[4]]);
        assert!(disc.missing.is_empty());
    }

    #[test]
    fn fully_unknown_ancestry_is_entirely_missing() {
        let (r, nodes) = linear(5);
        let tip = r.rev(&nodes[4]).unwrap();
        let disc = find_common(&r, &[tip], |ns| Ok(vec![false; ns.len()])).unwrap();
        assert!(disc.common.is_empty());
        assert_eq!(disc.missing.len(), 5);
    }

    #[test]
    fn a_known_node_pulls_in_its_whole_ancestry_as_common() {
        let (r, nodes) = linear(6);
        let tip = r.rev(&nodes[5]).unwrap();
        let boundary = nodes[2];
        let disc = find_common(&r, &[tip], |ns| {
            Ok(ns.iter().map(|n| *n == boundary).collect())
        })
        .unwrap();
        // node 2's ancestry (0,1,2) becomes common; 3,4,5 are not directly
        // answered `true` for and so remain missing.
        assert!(disc.common.contains(&nodes[0]));
        assert!(disc.common.contains(&nodes[2]));
        assert!(disc.missing.contains(&nodes[5]));
    }

    #[test]
    fn outgoing_is_the_dual_of_common() {
        let (r, nodes) = linear(4);
        let tip = r.rev(&nodes[3]).unwrap();
        let boundary = nodes[1];
        let disc = find_common_outgoing(&r, &[tip], |ns| {
            Ok(ns.iter().map(|n| *n == boundary).collect())
        })
        .unwrap();
        assert!(disc.common.contains(&nodes[0]));
        assert!(disc.common.contains(&nodes[1]));
        assert!(disc.missing.contains(&nodes[2]));
        assert!(disc.missing.contains(&nodes[3]));
    }

    #[test]
    fn incoming_reports_remote_heads_we_lack() {
        let (r, nodes) = linear(3);
        let tip = r.rev(&nodes[2]).unwrap();
        let unknown_remote_head = Node::new([0xAB; 20]);
        let (disc, missing_heads) = find_common_incoming(
            &r,
            &[tip],
            &[nodes[2], unknown_remote_head],
            |ns| Ok(vec![true; ns.len()]),
        )
        .unwrap();
        assert_eq!(disc.common_heads, vec![nodes[2]]);
        assert_eq!(missing_heads, vec![unknown_remote_head]);
    }
}
