// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The peer contract (spec §6 "Peer RPCs (contracts, not wire)"): the
//! small set of operations a remote repository exposes to the exchange
//! layer. No wire format is specified here — only the call shape a real
//! transport (HTTP/SSH, out of scope) would eventually carry.

use std::collections::BTreeMap;

use changegroup::CgVersion;
use revlog_types::Node;

use crate::errors::PeerError;

/// A changegroup byte stream tagged with the wire version it was packed
/// with (spec §6 `getbundle(...) -> stream`).
#[derive(Debug, Clone)]
pub struct BundleStream {
    pub version: CgVersion,
    pub bytes: Vec<u8>,
}

/// The outcome of applying an incoming changegroup (spec §6
/// `unbundle(stream, heads, url) -> result`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbundleResult {
    /// The changegroup was non-empty and applied; these are the peer's
    /// heads after ingest.
    Applied { new_heads: Vec<Node> },
    /// Spec §4.4 "Progress, fastpath, safety": an empty changegroup is
    /// permitted but logged, not an error.
    Empty,
}

/// The operations spec §6 lists as the contract a remote exposes. A real
/// transport would marshal each of these over HTTP or SSH; this crate
/// only specifies the shape, plus an in-memory double
/// ([`crate::InMemoryPeer`]) that implements it directly against a local
/// `Revlog` for testing discovery and changegroup exchange end to end.
pub trait Peer {
    /// The peer's current heads.
    fn heads(&self) -> Result<Vec<Node>, PeerError>;

    /// For each of `nodes`, whether the peer already has it.
    fn known(&self, nodes: &[Node]) -> Result<Vec<bool>, PeerError>;

    /// Named branch -> heads of that branch. This crate does not model
    /// named branches (out of scope per spec §1), so the in-memory double
    /// reports a single `"default"` branch covering every head.
    fn branchmap(&self) -> Result<BTreeMap<String, Vec<Node>>, PeerError>;

    /// Resolve a symbolic key (a full node hex, or a revision number) to a
    /// node.
    fn lookup(&self, key: &str) -> Result<Node, PeerError>;

    /// Build a changegroup covering everything reachable from `heads` but
    /// not from `common` (spec §4.4 packer, "Data flow (write)").
    fn getbundle(&self, common: &[Node], heads: &[Node]) -> Result<BundleStream, PeerError>;

    /// Apply an incoming changegroup. `expected_heads` is the caller's
    /// belief about the peer's heads at the time discovery ran; a
    /// mismatch against the peer's actual current heads is a
    /// [`PeerError::PushRaced`] (spec §7 `PushRaced`: "client MUST
    /// re-discover and retry").
    fn unbundle(
        &mut self,
        stream: BundleStream,
        expected_heads: &[Node],
    ) -> Result<UnbundleResult, PeerError>;

    /// Compare-and-swap a key in a namespace; `Ok(false)` means `old`
    /// didn't match the current value and nothing changed.
    fn pushkey(&mut self, namespace: &str, key: &str, old: &str, new: &str)
        -> Result<bool, PeerError>;

    /// Every key/value pair currently stored in `namespace`.
    fn listkeys(&self, namespace: &str) -> Result<BTreeMap<String, String>, PeerError>;
}
