// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! An in-memory [`Peer`] backed directly by a local changelog `Revlog`:
//! good enough to drive discovery and a changegroup round-trip in tests
//! without any real transport (spec §1 non-goals: "any actual network
//! peer implementation remains out of scope").
//!
//! This double only exercises the changelog section of the codec — it
//! packs and unpacks `getbundle`/`unbundle` payloads against an empty
//! manifest group and no file groups. Assembling the full
//! changelog -> manifest -> filelog changegroup needs the set of touched
//! paths per changeset, which is exchange-layer glue this crate does not
//! otherwise need (the same scoping `bundlerepo` states for its own
//! overlay in its crate doc comment).

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use changegroup::{packer, unpacker, CgVersion};
use revlog::config::RevlogConfig;
use revlog::ops;
use revlog::revidx::RevIdx;
use revlog::store::Revlog;
use revlog_types::Node;

use phases::{Phase, PhaseRoots};

use crate::contract::{BundleStream, Peer, UnbundleResult};
use crate::errors::PeerError;

/// A toy "remote": one changelog revlog, a phase-roots store (surfaced
/// through the `"phases"` `listkeys` namespace, matching how real
/// Mercurial exchanges phase boundaries without a dedicated RPC), and a
/// generic pushkey store for every other namespace (e.g. `"bookmarks"`).
pub struct InMemoryPeer {
    changelog: Revlog,
    phase_roots: PhaseRoots,
    pushkeys: BTreeMap<String, BTreeMap<String, String>>,
    logger: Option<slog::Logger>,
}

impl InMemoryPeer {
    pub fn new() -> Self {
        Self::with_logger(None)
    }

    pub fn with_logger(logger: Option<slog::Logger>) -> Self {
        InMemoryPeer {
            changelog: Revlog::new(RevlogConfig::default()),
            phase_roots: PhaseRoots::new(),
            pushkeys: BTreeMap::new(),
            logger,
        }
    }

    pub fn changelog(&self) -> &Revlog {
        &self.changelog
    }

    pub fn changelog_mut(&mut self) -> &mut Revlog {
        &mut self.changelog
    }

    pub fn phase_roots_mut(&mut self) -> &mut PhaseRoots {
        &mut self.phase_roots
    }

    fn node_heads(&self) -> Result<Vec<Node>, PeerError> {
        Ok(ops::heads(&self.changelog, &[])?
            .into_iter()
            .map(|r| self.changelog.node(r))
            .collect::<Result<_, _>>()?)
    }

    fn listkeys_phases(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for phase in [Phase::Draft, Phase::Secret] {
            let digit = match phase {
                Phase::Public => 0,
                Phase::Draft => 1,
                Phase::Secret => 2,
            };
            for node in self.phase_roots.roots(phase) {
                out.insert(node.to_hex(), digit.to_string());
            }
        }
        out
    }
}

impl Default for InMemoryPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer for InMemoryPeer {
    fn heads(&self) -> Result<Vec<Node>, PeerError> {
        self.node_heads()
    }

    fn known(&self, nodes: &[Node]) -> Result<Vec<bool>, PeerError> {
        Ok(nodes.iter().map(|n| self.changelog.rev(n).is_ok()).collect())
    }

    fn branchmap(&self) -> Result<BTreeMap<String, Vec<Node>>, PeerError> {
        let mut map = BTreeMap::new();
        map.insert("default".to_string(), self.node_heads()?);
        Ok(map)
    }

    fn lookup(&self, key: &str) -> Result<Node, PeerError> {
        if let Ok(node) = Node::from_str(key) {
            if self.changelog.rev(&node).is_ok() {
                return Ok(node);
            }
        }
        if let Ok(rev) = key.parse::<i32>() {
            if (rev as usize) < self.changelog.len() {
                return Ok(self.changelog.node(RevIdx::new(rev))?);
            }
        }
        Err(PeerError::UnknownKey(key.to_string()))
    }

    fn getbundle(&self, common: &[Node], heads: &[Node]) -> Result<BundleStream, PeerError> {
        let head_revs: Vec<RevIdx> = if heads.is_empty() {
            ops::heads(&self.changelog, &[])?
        } else {
            heads.iter().filter_map(|n| self.changelog.rev(n).ok()).collect()
        };
        let common_revs: Vec<RevIdx> =
            common.iter().filter_map(|n| self.changelog.rev(n).ok()).collect();

        let wanted: HashSet<i32> = ops::ancestors(&self.changelog, &head_revs, RevIdx::zero(), true)?
            .into_iter()
            .map(|r| r.as_i32())
            .collect();
        let excluded: HashSet<i32> =
            ops::ancestors(&self.changelog, &common_revs, RevIdx::zero(), true)?
                .into_iter()
                .map(|r| r.as_i32())
                .collect();
        let mut missing_revs: Vec<i32> = wanted.difference(&excluded).copied().collect();
        missing_revs.sort_unstable();

        if missing_revs.is_empty() {
            if let Some(logger) = &self.logger {
                slog::debug!(logger, "getbundle produced an empty changegroup");
            }
        }

        let nodes: Vec<Node> = missing_revs
            .iter()
            .map(|&r| self.changelog.node(RevIdx::new(r)))
            .collect::<Result<_, _>>()?;
        let manifest = Revlog::new(RevlogConfig::default());
        let bytes =
            packer::pack_changegroup(&self.changelog, &nodes, &manifest, &[], &[], CgVersion::V2)?;
        Ok(BundleStream { version: CgVersion::V2, bytes })
    }

    fn unbundle(
        &mut self,
        stream: BundleStream,
        expected_heads: &[Node],
    ) -> Result<UnbundleResult, PeerError> {
        if !expected_heads.is_empty() {
            let mut current = self.node_heads()?;
            current.sort();
            let mut expected = expected_heads.to_vec();
            expected.sort();
            if current != expected {
                return Err(PeerError::PushRaced);
            }
        }

        let mut cursor = std::io::Cursor::new(stream.bytes);
        let cg = unpacker::unpack(&mut cursor, stream.version)?;
        if cg.changelog.entries.is_empty() {
            if let Some(logger) = &self.logger {
                slog::debug!(logger, "received empty changegroup");
            }
            return Ok(UnbundleResult::Empty);
        }

        let mut known = unpacker::node_set(&self.changelog);
        let base = self.changelog.len();
        let next = Cell::new(0usize);
        let entries = unpacker::resolve_group(&cg.changelog, &mut known, |_link_node| {
            // A changelog revision's linkrev is always its own revision
            // number (spec §4.1), so the group's arrival order already
            // fixes each entry's target rev: `base + position-in-group`.
            let i = next.get();
            next.set(i + 1);
            Ok(RevIdx::from(base + i))
        })?;
        self.changelog.addgroup(entries)?;
        Ok(UnbundleResult::Applied { new_heads: self.node_heads()? })
    }

    fn pushkey(
        &mut self,
        namespace: &str,
        key: &str,
        old: &str,
        new: &str,
    ) -> Result<bool, PeerError> {
        let ns = self.pushkeys.entry(namespace.to_string()).or_default();
        let current = ns.get(key).cloned().unwrap_or_default();
        if current != old {
            return Ok(false);
        }
        if new.is_empty() {
            ns.remove(key);
        } else {
            ns.insert(key.to_string(), new.to_string());
        }
        Ok(true)
    }

    fn listkeys(&self, namespace: &str) -> Result<BTreeMap<String, String>, PeerError> {
        if namespace == "phases" {
            return Ok(self.listkeys_phases());
        }
        Ok(self.pushkeys.get(namespace).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(peer: &mut InMemoryPeer, content: &[u8], parent: Option<RevIdx>) -> Node {
        let link = RevIdx::from(peer.changelog.len());
        peer.changelog.addrevision(content.to_vec(), link, parent, None).unwrap()
    }

    #[test]
    fn known_reflects_local_membership() {
        let mut peer = InMemoryPeer::new();
        let n0 = commit(&mut peer, b"c0", None);
        let bogus = Node::new([0x42; 20]);
        assert_eq!(peer.known(&[n0, bogus]).unwrap(), vec![true, false]);
    }

    #[test]
    fn heads_of_empty_peer_is_empty() {
        let peer = InMemoryPeer::new();
        assert!(peer.heads().unwrap().is_empty());
    }

    #[test]
    fn getbundle_then_unbundle_round_trips_into_a_fresh_peer() {
        let mut source = InMemoryPeer::new();
        let n0 = commit(&mut source, b"c0", None);
        let r0 = source.changelog().rev(&n0).unwrap();
        let n1 = commit(&mut source, b"c1", Some(r0));
        let r1 = source.changelog().rev(&n1).unwrap();
        let _n2 = commit(&mut source, b"c2", Some(r1));

        let bundle = source.getbundle(&[], &source.heads().unwrap()).unwrap();

        let mut dest = InMemoryPeer::new();
        let result = dest.unbundle(bundle, &[]).unwrap();
        match result {
            UnbundleResult::Applied { new_heads } => assert_eq!(new_heads, source.heads().unwrap()),
            UnbundleResult::Empty => panic!("expected a non-empty changegroup"),
        }
        assert_eq!(dest.changelog().len(), 3);
    }

    #[test]
    fn unbundle_detects_a_push_race() {
        let mut source = InMemoryPeer::new();
        let _n0 = commit(&mut source, b"c0", None);
        let bundle = source.getbundle(&[], &source.heads().unwrap()).unwrap();

        let mut dest = InMemoryPeer::new();
        let stale_heads = vec![Node::new([0x99; 20])];
        let err = dest.unbundle(bundle, &stale_heads).unwrap_err();
        assert!(matches!(err, PeerError::PushRaced));
    }

    #[test]
    fn pushkey_is_compare_and_swap() {
        let mut peer = InMemoryPeer::new();
        assert!(peer.pushkey("bookmarks", "master", "", "abc123").unwrap());
        assert!(!peer.pushkey("bookmarks", "master", "wrong", "def456").unwrap());
        assert!(peer.pushkey("bookmarks", "master", "abc123", "def456").unwrap());
        assert_eq!(peer.listkeys("bookmarks").unwrap().get("master"), Some(&"def456".to_string()));
    }

    #[test]
    fn listkeys_phases_reports_draft_roots() {
        let mut peer = InMemoryPeer::new();
        let n0 = commit(&mut peer, b"c0", None);
        *peer.phase_roots_mut() = PhaseRoots::parse(&format!("1 {}\n", n0.to_hex())).unwrap();
        let keys = peer.listkeys("phases").unwrap();
        assert_eq!(keys.get(&n0.to_hex()), Some(&"1".to_string()));
    }

    #[test]
    fn empty_changegroup_is_reported_not_errored() {
        let source = InMemoryPeer::new();
        let bundle = source.getbundle(&[], &[]).unwrap();
        let mut dest = InMemoryPeer::new();
        assert_eq!(dest.unbundle(bundle, &[]).unwrap(), UnbundleResult::Empty);
    }
}
