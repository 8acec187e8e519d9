// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Tunables for delta-chain policy (spec §4.1, §1 "Configuration").
//!
//! Plays the role the teacher project's `ui.config` layer plays for the
//! revlog's own knobs, scoped down since the general config-file parser is
//! out of scope for this crate.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevlogConfig {
    /// Maximum length of a delta chain before a snapshot is forced.
    pub max_chain_len: usize,
    /// Maximum total span (bytes of intermediate full texts) a delta chain
    /// may cover before a snapshot is forced.
    pub max_delta_chain_span: u64,
    /// A delta whose compressed size exceeds this fraction of the full
    /// text's size is stored as a snapshot instead (spec default: 1/4).
    pub delta_size_fraction: f64,
    /// Use general-delta (delta base may be any earlier revision, not just
    /// `prev`).
    pub general_delta: bool,
    /// Store revision data inline in the index file below this many
    /// revisions (small logs); larger logs get a separate data file.
    pub inline_data_limit: usize,
}

impl Default for RevlogConfig {
    fn default() -> Self {
        RevlogConfig {
            max_chain_len: 1000,
            max_delta_chain_span: 4 * 1024 * 1024 * 1024,
            delta_size_fraction: 0.25,
            general_delta: true,
            inline_data_limit: 1000,
        }
    }
}
