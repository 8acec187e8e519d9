// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Phase computation and the `advanceboundary`/`retractboundary`
//! transitions (spec §4.7).

use std::collections::HashSet;

use revlog::ops::ancestors;
use revlog::revidx::RevIdx;
use revlog::store::Revlog;

use crate::errors::PhasesError;
use crate::phase::{Phase, PhaseRoots};

/// The effective phase of `rev`: the highest phase whose root set contains
/// an ancestor-or-self of `rev`, else public.
pub fn phase_of(
    changelog: &Revlog,
    roots: &PhaseRoots,
    rev: RevIdx,
) -> Result<Phase, PhasesError> {
    for &phase in Phase::Public.above() {
        let root_revs = root_revs(changelog, roots, phase)?;
        if root_revs.is_empty() {
            continue;
        }
        if !ancestors(changelog, &[rev], RevIdx::zero(), true)?
            .iter()
            .any(|a| root_revs.contains(&a.as_i32()))
        {
            continue;
        }
        return Ok(phase);
    }
    Ok(Phase::Public)
}

fn root_revs(
    changelog: &Revlog,
    roots: &PhaseRoots,
    phase: Phase,
) -> Result<HashSet<i32>, PhasesError> {
    let mut out = HashSet::new();
    for node in roots.roots(phase) {
        if let Ok(rev) = changelog.rev(node) {
            out.insert(rev.as_i32());
        }
    }
    Ok(out)
}

/// The minimal set of revisions within `members` whose descendant closure
/// is exactly `members`: those with no parent also in `members`.
fn minimal_roots(changelog: &Revlog, members: &HashSet<i32>) -> Result<Vec<RevIdx>, PhasesError> {
    let mut out = Vec::new();
    for &v in members {
        let rev = RevIdx::new(v);
        let (p1, p2) = changelog.parentrevs(rev)?;
        let has_parent_in_set =
            (!p1.is_null() && members.contains(&p1.as_i32()))
                || (!p2.is_null() && members.contains(&p2.as_i32()));
        if !has_parent_in_set {
            out.push(rev);
        }
    }
    Ok(out)
}

fn revs_at_exactly(
    changelog: &Revlog,
    roots: &PhaseRoots,
    phase: Phase,
) -> Result<HashSet<i32>, PhasesError> {
    let mut out = HashSet::new();
    for rev in 0..changelog.len() {
        let rev = RevIdx::from(rev);
        if phase_of(changelog, roots, rev)? == phase {
            out.insert(rev.as_i32());
        }
    }
    Ok(out)
}

fn closure_of(changelog: &Revlog, revs: &[RevIdx]) -> Result<HashSet<i32>, PhasesError> {
    Ok(ancestors(changelog, revs, RevIdx::zero(), true)?.into_iter().map(|r| r.as_i32()).collect())
}

/// Move `revs` (and their ancestors) to at most `target`: never raises a
/// phase, only lowers it (spec §4.7, §8 invariant 8).
pub fn advance_boundary(
    changelog: &Revlog,
    roots: &mut PhaseRoots,
    target: Phase,
    revs: &[RevIdx],
) -> Result<(), PhasesError> {
    let closure = closure_of(changelog, revs)?;
    for &phase in target.above() {
        let frontier = revs_at_exactly(changelog, roots, phase)?;
        let remaining: HashSet<i32> = frontier.difference(&closure).copied().collect();
        let new_roots = minimal_roots(changelog, &remaining)?;
        let nodes = new_roots
            .iter()
            .map(|&r| changelog.node(r))
            .collect::<Result<Vec<_>, _>>()?;
        *roots.roots_mut(phase) = nodes.into_iter().collect();
    }
    Ok(())
}

/// Move `revs` (and their ancestors) to at least `target`: never lowers a
/// phase, only raises it.
pub fn retract_boundary(
    changelog: &Revlog,
    roots: &mut PhaseRoots,
    target: Phase,
    revs: &[RevIdx],
) -> Result<(), PhasesError> {
    if target == Phase::Public {
        return Ok(());
    }
    let closure = closure_of(changelog, revs)?;

    // Anything already at `target` or above needs no change; anything
    // below target in the closure must be pulled up to at least target.
    let current_at_target = revs_at_exactly(changelog, roots, target)?;
    let already_covered: HashSet<i32> = root_revs(changelog, roots, target)?
        .union(&closure)
        .copied()
        .collect();
    let union: HashSet<i32> = current_at_target.union(&already_covered).copied().collect();
    let new_roots = minimal_roots(changelog, &union)?;
    let nodes =
        new_roots.iter().map(|&r| changelog.node(r)).collect::<Result<Vec<_>, _>>()?;
    *roots.roots_mut(target) = nodes.into_iter().collect();

    // Revisions in the closure that used to be classified at a phase
    // *above* target must not remain there; but retract never lowers, so
    // anything already above target keeps its higher phase untouched
    // (only draft promoted to secret if target == secret and it was
    // draft, which the step above already folded into target's roots —
    // for target == draft nothing above draft is touched).
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use revlog::config::RevlogConfig;

    fn linear(n: usize) -> (Revlog, Vec<revlog_types::Node>) {
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
    fn defaults_to_public() {
        let (r, nodes) = linear(3);
        let roots = PhaseRoots::new();
        assert_eq!(phase_of(&r, &roots, r.rev(&nodes[2]).unwrap()).unwrap(), Phase::Public);
    }

    #[test]
    fn retract_marks_revision_and_ancestors_draft() {
        let (r, nodes) = linear(4);
        let mut roots = PhaseRoots::new();
        let rev3 = r.rev(&nodes[3]).unwrap();
        retract_boundary(&r, &mut roots, Phase::Draft, &[rev3]).unwrap();

        for node in &nodes {
            let rev = r.rev(node).unwrap();
            assert_eq!(phase_of(&r, &roots, rev).unwrap(), Phase::Draft);
        }
    }

    #[test]
    fn advance_to_public_clears_draft_ancestors() {
        let (r, nodes) = linear(4);
        let mut roots = PhaseRoots::new();
        let rev3 = r.rev(&nodes[3]).unwrap();
        retract_boundary(&r, &mut roots, Phase::Draft, &[rev3]).unwrap();

        advance_boundary(&r, &mut roots, Phase::Public, &[rev3]).unwrap();
        for node in &nodes {
            let rev = r.rev(node).unwrap();
            assert_eq!(phase_of(&r, &roots, rev).unwrap(), Phase::Public);
        }
    }

    #[test]
    fn advance_only_affects_requested_ancestry() {
        // Two independent roots; advancing one branch to public must not
        // touch the other branch's draft phase.
        let mut r = Revlog::new(RevlogConfig::default());
        let n0 = r.addrevision(b"a".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = r.rev(&n0).unwrap();
        let n1 = r.addrevision(b"b".to_vec(), RevIdx::new(1), Some(r0), None).unwrap();
        let r1 = r.rev(&n1).unwrap();
        let n2 = r.addrevision(b"c".to_vec(), RevIdx::new(2), Some(r0), None).unwrap();
        let r2 = r.rev(&n2).unwrap();

        let mut roots = PhaseRoots::new();
        retract_boundary(&r, &mut roots, Phase::Draft, &[r1, r2]).unwrap();
        advance_boundary(&r, &mut roots, Phase::Public, &[r1]).unwrap();

        assert_eq!(phase_of(&r, &roots, r1).unwrap(), Phase::Public);
        assert_eq!(phase_of(&r, &roots, r2).unwrap(), Phase::Draft);
    }

    #[test]
    fn secret_outranks_draft() {
        let (r, nodes) = linear(3);
        let mut roots = PhaseRoots::new();
        let rev2 = r.rev(&nodes[2]).unwrap();
        retract_boundary(&r, &mut roots, Phase::Draft, &[rev2]).unwrap();
        retract_boundary(&r, &mut roots, Phase::Secret, &[rev2]).unwrap();
        assert_eq!(phase_of(&r, &roots, rev2).unwrap(), Phase::Secret);
    }
}
