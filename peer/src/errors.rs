// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

/// Error taxonomy for the peer contract layer (spec §7), scoped to what
/// this crate can actually raise: an unresolvable key, a racing push, and
/// everything that bubbles up unchanged from the crates it composes.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("unknown key: {0:?}")]
    UnknownKey(String),
    /// Spec §7 `PushRaced`: the server's heads moved between discovery and
    /// `unbundle`, so the client's delta no longer applies cleanly and
    /// MUST re-discover and retry.
    #[error("push raced: remote heads changed since discovery")]
    PushRaced,
    #[error(transparent)]
    Revlog(#[from] revlog::RevlogError),
    #[error(transparent)]
    Changegroup(#[from] changegroup::CgError),
    #[error(transparent)]
    Phases(#[from] phases::PhasesError),
}
