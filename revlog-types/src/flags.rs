// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Feature flags (index header) and per-revision flags (spec §6).

use bitflags::bitflags;

bitflags! {
    /// Feature flags packed into the low 16 bits of the first index entry's
    /// `offset_and_flags` field, alongside the format version.
    pub struct RevlogFeatures: u16 {
        const INLINE_DATA   = 0x0001;
        const GENERAL_DELTA = 0x0002;
    }
}

bitflags! {
    /// Per-revision flag bits that select flag processors (censor,
    /// largefiles indirection, ...) before/after hashing. Zero means
    /// "no processing, hash covers raw stored text".
    pub struct RevisionFlags: u16 {
        const CENSORED        = 0x0001;
        const ELLIPSIS        = 0x0002;
        const EXTSTORED       = 0x0004;
        const HAS_COPIES_INFO = 0x0008;
    }
}

impl Default for RevisionFlags {
    fn default() -> Self {
        RevisionFlags::empty()
    }
}

/// The revlog index format version, carried in the low bits of the first
/// entry alongside `RevlogFeatures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevlogVersion {
    V0,
    V1,
    V2,
}

impl RevlogVersion {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(RevlogVersion::V0),
            1 => Some(RevlogVersion::V1),
            2 => Some(RevlogVersion::V2),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            RevlogVersion::V0 => 0,
            RevlogVersion::V1 => 1,
            RevlogVersion::V2 => 2,
        }
    }
}
