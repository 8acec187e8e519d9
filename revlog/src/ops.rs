// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Ancestry queries (spec §4.1 public contract) and link-revision
//! adjustment (spec §4.2, "Link revisions and link-shadowing").

use std::collections::{BinaryHeap, HashSet};

use crate::errors::RevlogError;
use crate::revidx::RevIdx;
use crate::store::Revlog;

/// Iterate the ancestors of `start`, in decreasing-revision order, down to
/// (but not below) `stoprev`. `inclusive` controls whether `start` itself
/// is yielded.
///
/// Revision numbers in a revlog are assigned so that every parent precedes
/// its children (spec invariant 2), so a simple max-heap walk visits
/// ancestors in a valid topological (descendants-before-ancestors) order
/// without needing a separate toposort.
pub fn ancestors(
    revlog: &Revlog,
    starts: &[RevIdx],
    stoprev: RevIdx,
    inclusive: bool,
) -> Result<Vec<RevIdx>, RevlogError> {
    let mut heap: BinaryHeap<i32> = BinaryHeap::new();
    let mut seen: HashSet<i32> = HashSet::new();
    for &s in starts {
        if s.as_i32() >= stoprev.as_i32() && seen.insert(s.as_i32()) {
            heap.push(s.as_i32());
        }
    }

    let mut out = Vec::new();
    let start_set: HashSet<i32> = starts.iter().map(|r| r.as_i32()).collect();

    while let Some(v) = heap.pop() {
        let rev = RevIdx::new(v);
        if start_set.contains(&v) && !inclusive {
            // skip yielding but still walk its parents
        } else {
            out.push(rev);
        }
        let (p1, p2) = revlog.parentrevs(rev)?;
        for p in [p1, p2].iter() {
            if !p.is_null() && p.as_i32() >= stoprev.as_i32() && seen.insert(p.as_i32()) {
                heap.push(p.as_i32());
            }
        }
    }
    Ok(out)
}

/// `true` if `candidate` is an ancestor of `rev` (or equal to it).
pub fn is_ancestor(revlog: &Revlog, candidate: RevIdx, rev: RevIdx) -> Result<bool, RevlogError> {
    if candidate == rev {
        return Ok(true);
    }
    let all = ancestors(revlog, &[rev], RevIdx::zero(), false)?;
    Ok(all.contains(&candidate))
}

/// `true` if `rev` is a descendant of `candidate` (the dual of
/// `is_ancestor`).
pub fn descendant(revlog: &Revlog, candidate: RevIdx, rev: RevIdx) -> Result<bool, RevlogError> {
    is_ancestor(revlog, candidate, rev)
}

/// The heads (revisions with no children) among `revs`, or of the whole
/// revlog if `revs` is empty.
pub fn heads(revlog: &Revlog, revs: &[RevIdx]) -> Result<Vec<RevIdx>, RevlogError> {
    let universe: Vec<RevIdx> = if revs.is_empty() {
        (0..revlog.len()).map(RevIdx::from).collect()
    } else {
        revs.to_vec()
    };
    let set: HashSet<i32> = universe.iter().map(|r| r.as_i32()).collect();
    let mut is_parent: HashSet<i32> = HashSet::new();
    for &rev in &universe {
        let (p1, p2) = revlog.parentrevs(rev)?;
        if set.contains(&p1.as_i32()) {
            is_parent.insert(p1.as_i32());
        }
        if set.contains(&p2.as_i32()) {
            is_parent.insert(p2.as_i32());
        }
    }
    Ok(universe
        .into_iter()
        .filter(|r| !is_parent.contains(&r.as_i32()))
        .collect())
}

/// The heads of the set of revisions that are ancestors of both `a` and
/// `b` (spec §4.7 "largest set of nodes present on both sides", here
/// specialized to a single revlog's ancestor sets rather than a two-repo
/// exchange).
pub fn common_ancestors_heads(
    revlog: &Revlog,
    a: RevIdx,
    b: RevIdx,
) -> Result<Vec<RevIdx>, RevlogError> {
    let anc_a: HashSet<i32> = ancestors(revlog, &[a], RevIdx::zero(), true)?
        .into_iter()
        .map(|r| r.as_i32())
        .collect();
    let anc_b: HashSet<i32> = ancestors(revlog, &[b], RevIdx::zero(), true)?
        .into_iter()
        .map(|r| r.as_i32())
        .collect();
    let common: Vec<RevIdx> = anc_a.intersection(&anc_b).map(|&v| RevIdx::new(v)).collect();
    heads(revlog, &common)
}

/// Walk changelog ancestors of `src` looking for the revision that
/// actually introduces a given file revision, per spec §4.2.
///
/// `introduces(rev)` should return `true` iff changelog revision `rev`'s
/// touched-files set contains the path and its manifest maps the path to
/// the expected file node. Callers that need correct linkrevs (annotate,
/// blame, follow) must use this instead of the filelog's stored
/// `link_rev`, which may be "shadowed" by history rewriting.
///
/// Bounded by `step_budget` (spec §9: unbounded walks on pathological
/// histories can be very slow); on exhaustion the caller's stored linkrev
/// should be used instead, with a warning.
pub fn introrev<F>(
    changelog: &Revlog,
    src: RevIdx,
    step_budget: usize,
    mut introduces: F,
) -> Result<Option<RevIdx>, RevlogError>
where
    F: FnMut(RevIdx) -> Result<bool, RevlogError>,
{
    let mut heap: BinaryHeap<i32> = BinaryHeap::new();
    let mut seen: HashSet<i32> = HashSet::new();
    heap.push(src.as_i32());
    seen.insert(src.as_i32());

    let mut steps = 0usize;
    while let Some(v) = heap.pop() {
        steps += 1;
        if steps > step_budget {
            return Ok(None);
        }
        let rev = RevIdx::new(v);
        if introduces(rev)? {
            return Ok(Some(rev));
        }
        let (p1, p2) = changelog.parentrevs(rev)?;
        for p in [p1, p2].iter() {
            if !p.is_null() && seen.insert(p.as_i32()) {
                heap.push(p.as_i32());
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RevlogConfig;

    fn linear_revlog(n: usize) -> Revlog {
        let mut r = Revlog::new(RevlogConfig::default());
        let mut prev = None;
        for i in 0..n {
            let content = format!("rev{}", i).into_bytes();
            let node = r
                .addrevision(content, RevIdx::new(i as i32), prev, None)
                .unwrap();
            prev = Some(r.rev(&node).unwrap());
        }
        r
    }

    #[test]
    fn ancestors_walks_linear_chain() {
        let r = linear_revlog(5);
        let anc = ancestors(&r, &[RevIdx::new(4)], RevIdx::zero(), true).unwrap();
        assert_eq!(anc.len(), 5);
        assert!(anc.contains(&RevIdx::new(0)));
    }

    #[test]
    fn heads_of_linear_chain_is_tip() {
        let r = linear_revlog(4);
        let h = heads(&r, &[]).unwrap();
        assert_eq!(h, vec![RevIdx::new(3)]);
    }

    #[test]
    fn descendant_on_linear_chain() {
        let r = linear_revlog(4);
        assert!(descendant(&r, RevIdx::new(1), RevIdx::new(3)).unwrap());
        assert!(!descendant(&r, RevIdx::new(3), RevIdx::new(1)).unwrap());
    }

    #[test]
    fn common_ancestors_heads_on_diverging_branches() {
        let mut r = Revlog::new(RevlogConfig::default());
        let n0 = r.addrevision(b"a".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = r.rev(&n0).unwrap();
        let n1 = r
            .addrevision(b"b".to_vec(), RevIdx::new(1), Some(r0), None)
            .unwrap();
        let r1 = r.rev(&n1).unwrap();
        let n2a = r
            .addrevision(b"c1".to_vec(), RevIdx::new(2), Some(r1), None)
            .unwrap();
        let n2b = r
            .addrevision(b"c2".to_vec(), RevIdx::new(2), Some(r1), None)
            .unwrap();
        let r2a = r.rev(&n2a).unwrap();
        let r2b = r.rev(&n2b).unwrap();

        let common = common_ancestors_heads(&r, r2a, r2b).unwrap();
        assert_eq!(common, vec![r1]);
    }

    #[test]
    fn introrev_finds_true_introducer() {
        let r = linear_revlog(6);
        // Pretend only rev 2 "introduces" the thing we're looking for.
        let found = introrev(&r, RevIdx::new(5), 100, |rev| Ok(rev == RevIdx::new(2))).unwrap();
        assert_eq!(found, Some(RevIdx::new(2)));
    }

    #[test]
    fn introrev_respects_step_budget() {
        let r = linear_revlog(6);
        let found = introrev(&r, RevIdx::new(5), 1, |_rev| Ok(false)).unwrap();
        assert_eq!(found, None);
    }
}
