// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhasesError {
    #[error("malformed phase roots entry: {0:?}")]
    MalformedRoots(String),
    #[error(transparent)]
    Revlog(#[from] revlog::RevlogError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
