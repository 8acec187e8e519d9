// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

/// Error taxonomy for the bundle-repo overlay (spec §7), scoped to the
/// failure modes this crate can actually raise: everything else bubbles up
/// from `revlog`/`changegroup` unchanged.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("unrecognized bundle file header")]
    UnknownFormat,
    #[error("bzip2-compressed bundles are not supported")]
    UnsupportedCompression,
    #[error("bundle2 container has no parts")]
    EmptyBundle2,
    #[error("expected a changegroup part, found {0:?}")]
    UnexpectedPart(String),
    #[error("bundle entry references unknown node {0}")]
    UnknownNode(revlog_types::Node),
    #[error(transparent)]
    Changegroup(#[from] changegroup::CgError),
    #[error(transparent)]
    Delta(#[from] revlog_types::DeltaError),
    #[error(transparent)]
    Revlog(#[from] revlog::RevlogError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
