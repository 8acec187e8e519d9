// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use revlog_types::{DeltaError, NodeError};
use thiserror::Error;

use crate::revidx::RevIdx;

/// Error taxonomy for the revlog storage engine (spec §7).
#[derive(Debug, Error)]
pub enum RevlogError {
    #[error("unknown revision: {0:?}")]
    UnknownRevision(RevIdx),
    #[error("unknown node: {0}")]
    UnknownNode(revlog_types::Node),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Delta(#[from] DeltaError),
    #[error("unknown index format version bits: {0}")]
    BadVersion(u16),
    #[error("index truncated: needed {needed} bytes, had {available}")]
    TruncatedIndex { needed: usize, available: usize },
    #[error("corrupt revlog: {0}")]
    Corrupt(String),
    #[error(
        "hash mismatch at revision {rev:?}: expected {expected}, computed {computed}"
    )]
    HashMismatch {
        rev: RevIdx,
        expected: revlog_types::Node,
        computed: revlog_types::Node,
    },
    #[error("revision {0:?} was censored")]
    Censored(RevIdx),
    #[error("delta chain too long at revision {rev:?}: {len} exceeds max {max}")]
    ChainTooLong { rev: RevIdx, len: usize, max: usize },
    #[error("{0}")]
    NotSupported(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("programming error: {0}")]
    Programming(String),
}
