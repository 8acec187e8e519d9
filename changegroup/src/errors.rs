// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

/// Error taxonomy for the changegroup wire codec (spec §7, scoped to the
/// parts of the taxonomy this crate can actually raise).
#[derive(Debug, Error)]
pub enum CgError {
    #[error("invalid chunk length {0}")]
    InvalidChunkLength(i32),
    #[error("stream ended unexpectedly (got {got} bytes, expected {expected})")]
    UnexpectedEof { got: usize, expected: usize },
    #[error("unknown changegroup version {0:?}")]
    UnknownVersion(String),
    #[error(
        "changegroup v1 entry claims parent {0} that is not yet known to the \
         target revlog or earlier in this stream"
    )]
    DanglingV1Parent(revlog_types::Node),
    #[error("file revlog group for {path:?} is missing a needed parent file node")]
    MissingParent { path: String },
    #[error("received dir revlog group is empty")]
    EmptyDirGroup,
    #[error(transparent)]
    Delta(#[from] revlog_types::DeltaError),
    #[error(transparent)]
    Node(#[from] revlog_types::NodeError),
    #[error(transparent)]
    Revlog(#[from] revlog::RevlogError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
