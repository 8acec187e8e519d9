// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NodeError {
    #[error("node must be {} bytes, got {0}", crate::node::NODE_LEN)]
    BadLength(usize),
    #[error("hex node must be {} characters, got {0}", crate::node::NODE_LEN * 2)]
    BadHexLength(usize),
    #[error("invalid hex node: {0}")]
    BadHex(String),
    #[error("ambiguous node prefix: {0}")]
    AmbiguousPrefix(String),
    #[error("unknown node prefix: {0}")]
    UnknownPrefix(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DeltaError {
    #[error("invalid delta: {0}")]
    Invalid(String),
    #[error("delta fragment [{start}, {end}) out of order or overlapping previous fragment")]
    BadFragmentOrder { start: usize, end: usize },
}
