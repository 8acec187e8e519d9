// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! The revlog store: index + data, delta-chain reconstruction, append and
//! bulk-ingest (spec §4.1).
//!
//! A `Revlog` is the concrete value backing `Changelog`/`Manifest`/`Filelog`.
//! It owns its index (one `Entry` per revision) and a logical, flat byte
//! store holding every revision's compressed chunk back to back; whether
//! that store is physically interleaved with the index (`inline`) or a
//! separate `.d` file only matters at `open`/`flush` time.

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use revlog_types::flags::{RevlogFeatures, RevlogVersion};
use revlog_types::{Delta, Node, RevisionFlags};

use crate::chunkio::{compress_chunk, decompress_chunk};
use crate::config::RevlogConfig;
use crate::errors::RevlogError;
use crate::flagprocessor::{apply_processors, default_processors, FlagProcessor};
use crate::index::{self, Entry, Header, ENTRY_SIZE};
use crate::revidx::RevIdx;

use std::collections::HashMap;

/// One entry of an incoming changegroup, already decoded off the wire
/// (spec §4.4), ready to be merged into a revlog. Kept free of any
/// changegroup-specific framing types so `revlog` never depends on
/// `changegroup` — the dependency runs the other way.
pub struct GroupEntry {
    pub node: Node,
    pub p1: Node,
    pub p2: Node,
    /// `Node::NULL` means the payload below is a literal full text rather
    /// than a delta.
    pub delta_base: Node,
    pub link: RevIdx,
    pub flags: RevisionFlags,
    pub delta: Delta,
}

pub struct Revlog {
    config: RevlogConfig,
    header: Header,
    entries: Vec<Entry>,
    data: Vec<u8>,
    node_index: HashMap<Node, RevIdx>,
    cache: RefCell<Option<(RevIdx, Vec<u8>)>>,
    processors: Vec<Box<dyn FlagProcessor>>,
    logger: Option<slog::Logger>,
}

impl Revlog {
    pub fn new(config: RevlogConfig) -> Self {
        let mut features = RevlogFeatures::empty();
        if config.general_delta {
            features |= RevlogFeatures::GENERAL_DELTA;
        }
        Revlog {
            config,
            header: Header { version: RevlogVersion::V1, features },
            entries: Vec::new(),
            data: Vec::new(),
            node_index: HashMap::new(),
            cache: RefCell::new(None),
            processors: default_processors(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: slog::Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, rev: RevIdx) -> Result<&Entry, RevlogError> {
        let idx = rev.as_usize().ok_or(RevlogError::UnknownRevision(rev))?;
        self.entries.get(idx).ok_or(RevlogError::UnknownRevision(rev))
    }

    pub fn node(&self, rev: RevIdx) -> Result<Node, RevlogError> {
        Ok(self.entry(rev)?.node)
    }

    pub fn rev(&self, node: &Node) -> Result<RevIdx, RevlogError> {
        if node.is_null() {
            return Ok(RevIdx::null());
        }
        self.node_index
            .get(node)
            .copied()
            .ok_or_else(|| RevlogError::UnknownNode(*node))
    }

    fn node_or_null(&self, rev: Option<RevIdx>) -> Result<Node, RevlogError> {
        match rev {
            None => Ok(Node::NULL),
            Some(r) if r.is_null() => Ok(Node::NULL),
            Some(r) => self.node(r),
        }
    }

    pub fn parentrevs(&self, rev: RevIdx) -> Result<(RevIdx, RevIdx), RevlogError> {
        let entry = self.entry(rev)?;
        Ok((entry.p1.unwrap_or_else(RevIdx::null), entry.p2.unwrap_or_else(RevIdx::null)))
    }

    pub fn parents(&self, node: &Node) -> Result<(Node, Node), RevlogError> {
        let rev = self.rev(node)?;
        let (p1, p2) = self.parentrevs(rev)?;
        Ok((self.node_or_null(Some(p1))?, self.node_or_null(Some(p2))?))
    }

    pub fn linkrev(&self, rev: RevIdx) -> Result<RevIdx, RevlogError> {
        Ok(self.entry(rev)?.link_rev)
    }

    pub fn flags(&self, rev: RevIdx) -> Result<RevisionFlags, RevlogError> {
        Ok(self.entry(rev)?.flags)
    }

    pub fn config(&self) -> &RevlogConfig {
        &self.config
    }

    /// The revision this one is stored as a delta against on disk, or
    /// `None` if it is a snapshot. Used by the changegroup packer to reuse
    /// an existing delta instead of recomputing one (spec §2.1 `_chunk`,
    /// the `bundlerepo` `revdiff` hot path this mirrors).
    pub fn delta_parent(&self, rev: RevIdx) -> Result<Option<RevIdx>, RevlogError> {
        let entry = self.entry(rev)?;
        Ok(entry.resolved_base(rev))
    }

    fn chunk_bytes(&self, rev: RevIdx) -> Result<Vec<u8>, RevlogError> {
        let entry = self.entry(rev)?;
        let start = entry.offset as usize;
        let end = start + entry.compressed_len as usize;
        if end > self.data.len() {
            return Err(RevlogError::TruncatedIndex { needed: end, available: self.data.len() });
        }
        decompress_chunk(&self.data[start..end])
    }

    fn chain_len_and_span(&self, base: RevIdx) -> Result<(usize, u64), RevlogError> {
        let mut len = 0usize;
        let mut span = 0u64;
        let mut cur = base;
        loop {
            let entry = self.entry(cur)?;
            span += entry.uncompressed_len.max(0) as u64;
            len += 1;
            if entry.is_snapshot(cur) {
                return Ok((len, span));
            }
            cur = entry
                .resolved_base(cur)
                .ok_or_else(|| RevlogError::Programming("non-snapshot entry missing base".into()))?;
        }
    }

    /// Reconstruct the raw (pre-flag-processing) bytes of `rev`, verifying
    /// the content hash against the stored node (spec §4.1 steps 1-4).
    pub fn revision_raw(&self, rev: RevIdx) -> Result<Vec<u8>, RevlogError> {
        if let Some((cached_rev, ref bytes)) = *self.cache.borrow() {
            if cached_rev == rev {
                return Ok(bytes.clone());
            }
        }

        let mut deltas = Vec::new();
        let mut cur = rev;
        let snapshot = loop {
            let entry = self.entry(cur)?;
            if entry.is_snapshot(cur) {
                break self.chunk_bytes(cur)?;
            }
            deltas.push(Delta::decode(&self.chunk_bytes(cur)?)?);
            cur = entry
                .resolved_base(cur)
                .ok_or_else(|| RevlogError::Programming("non-snapshot entry missing base".into()))?;
        };
        deltas.reverse();
        let text = Delta::apply_chain(snapshot, deltas.iter());

        let entry = self.entry(rev)?;
        let (p1, p2) = (self.node_or_null(entry.p1)?, self.node_or_null(entry.p2)?);
        let computed = Node::hash_revision(&p1, &p2, &text);
        if computed != entry.node {
            return Err(RevlogError::HashMismatch { rev, expected: entry.node, computed });
        }

        *self.cache.borrow_mut() = Some((rev, text.clone()));
        Ok(text)
    }

    /// The full revision contract (spec §4.1): `raw = true` returns the
    /// hash-verified stored bytes untouched; `raw = false` additionally
    /// runs flag processors (e.g. censor substitution).
    pub fn revision(&self, rev: RevIdx, raw: bool) -> Result<Vec<u8>, RevlogError> {
        let text = self.revision_raw(rev)?;
        if raw {
            return Ok(text);
        }
        let flags = self.flags(rev)?;
        apply_processors(&self.processors, flags, rev, text, false)
    }

    /// The delta that would turn `rev1`'s content into `rev2`'s, reusing
    /// the already-stored delta when `rev2` is already stored as a delta
    /// against exactly `rev1` (the `bundlerepo` hot path, spec §4.3).
    pub fn revdiff(&self, rev1: RevIdx, rev2: RevIdx) -> Result<Delta, RevlogError> {
        let entry2 = self.entry(rev2)?;
        if entry2.resolved_base(rev2) == Some(rev1) {
            return Delta::decode(&self.chunk_bytes(rev2)?);
        }
        let a = self.revision_raw(rev1)?;
        let b = self.revision_raw(rev2)?;
        Ok(revlog_types::diff(&a, &b))
    }

    fn choose_delta_base(&self, p1: Option<RevIdx>, p2: Option<RevIdx>) -> Option<RevIdx> {
        if self.entries.is_empty() {
            return None;
        }
        let prev = RevIdx::from(self.entries.len() - 1);
        let mut candidates = Vec::new();
        if self.header.is_general_delta() {
            if let Some(p) = p1 {
                if !p.is_null() {
                    candidates.push(p);
                }
            }
            if let Some(p) = p2 {
                if !p.is_null() && Some(p) != p1 {
                    candidates.push(p);
                }
            }
        }
        candidates.push(prev);

        for cand in candidates {
            if let Ok((len, span)) = self.chain_len_and_span(cand) {
                if len < self.config.max_chain_len && span < self.config.max_delta_chain_span {
                    return Some(cand);
                }
            }
        }
        None
    }

    fn append_entry(
        &mut self,
        node: Node,
        p1: Option<RevIdx>,
        p2: Option<RevIdx>,
        link: RevIdx,
        flags: RevisionFlags,
        base_rev: Option<RevIdx>,
        payload: &[u8],
        uncompressed_len: i32,
    ) -> RevIdx {
        let idx = RevIdx::from(self.entries.len());
        let compressed = compress_chunk(payload);
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(&compressed);

        let p1 = p1.filter(|r| !r.is_null());
        let p2 = p2.filter(|r| !r.is_null());

        self.entries.push(Entry {
            offset,
            flags,
            compressed_len: compressed.len() as i32,
            uncompressed_len,
            base_rev,
            link_rev: link,
            p1,
            p2,
            node,
        });
        self.node_index.insert(node, idx);
        idx
    }

    /// Append one new revision, choosing its delta base per policy and
    /// verifying idempotency: re-adding the same `(p1, p2, text)` is a
    /// no-op that returns the existing node (spec invariant 6).
    pub fn addrevision(
        &mut self,
        text: Vec<u8>,
        link: RevIdx,
        p1: Option<RevIdx>,
        p2: Option<RevIdx>,
    ) -> Result<Node, RevlogError> {
        let p1_node = self.node_or_null(p1)?;
        let p2_node = self.node_or_null(p2)?;
        let node = Node::hash_revision(&p1_node, &p2_node, &text);
        if self.node_index.contains_key(&node) {
            return Ok(node);
        }

        let chosen = self.choose_delta_base(p1, p2);
        let (base_rev, payload) = match chosen {
            Some(cand) => {
                let base_text = self.revision_raw(cand)?;
                let delta = revlog_types::diff(&base_text, &text);
                let mut buf = Vec::new();
                delta.encode(&mut buf);
                let too_big = (buf.len() as f64) > self.config.delta_size_fraction * (text.len().max(1) as f64);
                if too_big {
                    if let Some(logger) = &self.logger {
                        slog::debug!(logger, "delta exceeds size fraction, storing snapshot instead";
                            "candidate_base" => cand.as_i32());
                    }
                    (None, text.clone())
                } else {
                    (Some(cand), buf)
                }
            }
            None => (None, text.clone()),
        };

        self.append_entry(node, p1, p2, link, RevisionFlags::empty(), base_rev, &payload, text.len() as i32);
        Ok(node)
    }

    /// Bulk-ingest already-decoded changegroup entries (spec §4.4). Each
    /// entry's hash is independently verified against its claimed parents
    /// before it is trusted; a mismatch aborts the whole group (the caller
    /// is expected to be inside a transaction and roll back).
    ///
    /// Returns the nodes that were newly added; nodes already present are
    /// silently skipped (source repos commonly resend revisions that both
    /// sides already have).
    pub fn addgroup(&mut self, entries: Vec<GroupEntry>) -> Result<Vec<Node>, RevlogError> {
        let mut added = Vec::new();
        for ge in entries {
            if self.node_index.contains_key(&ge.node) {
                continue;
            }

            let p1rev = if ge.p1.is_null() { None } else { Some(self.rev(&ge.p1)?) };
            let p2rev = if ge.p2.is_null() { None } else { Some(self.rev(&ge.p2)?) };

            let (base_rev, text) = if ge.delta_base.is_null() {
                (None, ge.delta.apply(&[]))
            } else {
                let base_rev = self.rev(&ge.delta_base)?;
                let base_text = self.revision_raw(base_rev)?;
                (Some(base_rev), ge.delta.apply(&base_text))
            };

            let computed = Node::hash_revision(&ge.p1, &ge.p2, &text);
            if computed != ge.node {
                return Err(RevlogError::HashMismatch {
                    rev: RevIdx::from(self.entries.len()),
                    expected: ge.node,
                    computed,
                });
            }

            let payload = if base_rev.is_some() {
                let mut buf = Vec::new();
                ge.delta.encode(&mut buf);
                buf
            } else {
                text.clone()
            };

            self.append_entry(ge.node, p1rev, p2rev, ge.link, ge.flags, base_rev, &payload, text.len() as i32);
            added.push(ge.node);
        }
        Ok(added)
    }

    /// Write this revlog out as a separate index (`.i`) and data (`.d`)
    /// file pair. Inline layout (small logs sharing one file) is supported
    /// for reading (see `open`) but newly written revlogs always use the
    /// two-file layout, which keeps flush() a straightforward linear
    /// serialization.
    pub fn flush(&self, idx_path: &Path, data_path: &Path) -> Result<(), RevlogError> {
        let mut idx_buf = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for (i, entry) in self.entries.iter().enumerate() {
            let idx = RevIdx::from(i);
            let header = if i == 0 { Some(self.header) } else { None };
            entry.write(idx, header, &mut idx_buf);
        }
        // An empty revlog has no entry 0 to carry the header word; `open`
        // treats a too-short index file as an empty, default-featured log.

        let mut idx_file = fs::File::create(idx_path)?;
        idx_file.write_all(&idx_buf)?;
        let mut data_file = fs::File::create(data_path)?;
        data_file.write_all(&self.data)?;
        Ok(())
    }

    /// Open a revlog from its on-disk `.i`/`.d` pair. `data_path` is
    /// ignored when the index declares itself inline; the chunk bytes are
    /// sliced directly out of the index file's tail instead.
    pub fn open(config: RevlogConfig, idx_path: &Path, data_path: &Path) -> Result<Self, RevlogError> {
        let idx_bytes = fs::read(idx_path)?;
        if idx_bytes.len() < 8 {
            return Ok(Revlog::new(config));
        }
        let header = index::parse_header(&idx_bytes)?;

        let mut entries = Vec::new();
        let mut node_index = HashMap::new();
        let mut data = Vec::new();

        if header.is_inline() {
            let mut pos = 0usize;
            let mut i = 0usize;
            while pos < idx_bytes.len() {
                let mut entry = Entry::parse(&idx_bytes[pos..], i == 0)?;
                pos += ENTRY_SIZE;
                let chunk_start = pos;
                let chunk_end = chunk_start + entry.compressed_len as usize;
                if chunk_end > idx_bytes.len() {
                    return Err(RevlogError::TruncatedIndex { needed: chunk_end, available: idx_bytes.len() });
                }
                entry.offset = data.len() as u64;
                data.extend_from_slice(&idx_bytes[chunk_start..chunk_end]);
                pos = chunk_end;

                node_index.insert(entry.node, RevIdx::from(i));
                entries.push(entry);
                i += 1;
            }
        } else {
            let mut pos = 0usize;
            let mut i = 0usize;
            while pos + ENTRY_SIZE <= idx_bytes.len() {
                let entry = Entry::parse(&idx_bytes[pos..pos + ENTRY_SIZE], i == 0)?;
                node_index.insert(entry.node, RevIdx::from(i));
                entries.push(entry);
                pos += ENTRY_SIZE;
                i += 1;
            }
            if data_path.exists() {
                let mapped = unsafe { Mmap::map(&fs::File::open(data_path)?) }?;
                data = mapped.to_vec();
            }
        }

        Ok(Revlog {
            config,
            header,
            entries,
            data,
            node_index,
            cache: RefCell::new(None),
            processors: default_processors(),
            logger: None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn addrevision_roundtrips_single_revision() {
        let mut r = Revlog::new(RevlogConfig::default());
        let node = r.addrevision(b"hello\n".to_vec(), RevIdx::zero(), None, None).unwrap();
        let rev = r.rev(&node).unwrap();
        assert_eq!(r.revision(rev, true).unwrap(), b"hello\n");
    }

    #[test]
    fn addrevision_is_idempotent() {
        let mut r = Revlog::new(RevlogConfig::default());
        let a = r.addrevision(b"x".to_vec(), RevIdx::zero(), None, None).unwrap();
        let b = r.addrevision(b"x".to_vec(), RevIdx::zero(), None, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn delta_chain_reconstructs_correctly() {
        let mut r = Revlog::new(RevlogConfig::default());
        let n0 = r.addrevision(b"AAAA\nBBBB\n".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = r.rev(&n0).unwrap();
        let n1 = r
            .addrevision(b"AAAA\nCCCC\n".to_vec(), RevIdx::new(1), Some(r0), None)
            .unwrap();
        let r1 = r.rev(&n1).unwrap();
        assert_eq!(r.revision(r1, true).unwrap(), b"AAAA\nCCCC\n");
        assert_eq!(r.revision(r0, true).unwrap(), b"AAAA\nBBBB\n");
    }

    #[test]
    fn revdiff_reuses_stored_delta_for_adjacent_revisions() {
        let mut r = Revlog::new(RevlogConfig::default());
        let n0 = r.addrevision(b"one".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = r.rev(&n0).unwrap();
        let n1 = r.addrevision(b"onetwo".to_vec(), RevIdx::new(1), Some(r0), None).unwrap();
        let r1 = r.rev(&n1).unwrap();
        let delta = r.revdiff(r0, r1).unwrap();
        assert_eq!(delta.apply(b"one"), b"onetwo");
    }

    #[test]
    fn addgroup_verifies_hash_and_rejects_mismatch() {
        let mut r = Revlog::new(RevlogConfig::default());
        let bad_delta = Delta::new_fulltext(b"not the real content".to_vec());
        let claimed_node = Node::hash_revision(&Node::NULL, &Node::NULL, b"real content");
        let entries = vec![GroupEntry {
            node: claimed_node,
            p1: Node::NULL,
            p2: Node::NULL,
            delta_base: Node::NULL,
            link: RevIdx::zero(),
            flags: RevisionFlags::empty(),
            delta: bad_delta,
        }];
        let err = r.addgroup(entries).unwrap_err();
        assert!(matches!(err, RevlogError::HashMismatch { .. }));
    }

    #[test]
    fn addgroup_skips_already_known_nodes() {
        let mut r = Revlog::new(RevlogConfig::default());
        let node = r.addrevision(b"x".to_vec(), RevIdx::zero(), None, None).unwrap();
        let entries = vec![GroupEntry {
            node,
            p1: Node::NULL,
            p2: Node::NULL,
            delta_base: Node::NULL,
            link: RevIdx::zero(),
            flags: RevisionFlags::empty(),
            delta: Delta::new_fulltext(b"x".to_vec()),
        }];
        let added = r.addgroup(entries).unwrap();
        assert!(added.is_empty());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn flush_and_reopen_preserves_revisions() {
        let dir = tempdir().unwrap();
        let idx_path = dir.path().join("test.i");
        let data_path = dir.path().join("test.d");

        let mut r = Revlog::new(RevlogConfig::default());
        let n0 = r.addrevision(b"AAAA\n".to_vec(), RevIdx::zero(), None, None).unwrap();
        let r0 = r.rev(&n0).unwrap();
        let _n1 = r
            .addrevision(b"AAAA\nBBBB\n".to_vec(), RevIdx::new(1), Some(r0), None)
            .unwrap();
        r.flush(&idx_path, &data_path).unwrap();

        let reopened = Revlog::open(RevlogConfig::default(), &idx_path, &data_path).unwrap();
        assert_eq!(reopened.len(), 2);
        let rev0 = reopened.rev(&n0).unwrap();
        assert_eq!(reopened.revision(rev0, true).unwrap(), b"AAAA\n");
        let rev1 = reopened.rev(&_n1).unwrap();
        assert_eq!(reopened.revision(rev1, true).unwrap(), b"AAAA\nBBBB\n");
    }

    #[test]
    fn chain_bounded_by_max_chain_len_forces_snapshot() {
        let config = RevlogConfig { max_chain_len: 2, ..RevlogConfig::default() };
        let mut r = Revlog::new(config);
        let mut prev = None;
        let mut last_node = Node::NULL;
        for i in 0..5 {
            let content = format!("{}{}", "x".repeat(i + 1), "\n").into_bytes();
            last_node = r.addrevision(content, RevIdx::from(i), prev, None).unwrap();
            prev = Some(r.rev(&last_node).unwrap());
        }
        let tip = r.rev(&last_node).unwrap();
        // however the chain was built, reconstruction must still be correct
        assert_eq!(r.revision(tip, true).unwrap(), b"xxxxx\n");
    }
}
