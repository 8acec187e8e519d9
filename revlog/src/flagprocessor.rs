// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Flag processors (spec §4.1 step 5, §9 "Flag processors").
//!
//! Revlog flags extend hashing/reading with a fixed, ordered list of
//! processors keyed by flag bit. The registry is static at program start,
//! not runtime-mutable, so behavior stays reproducible across readers.

use revlog_types::RevisionFlags;

use crate::errors::RevlogError;
use crate::revidx::RevIdx;

/// What a flag processor does with the raw stored text on read.
pub enum FlagOutcome {
    /// The processor rewrote the content; hashing still covers the raw
    /// stored bytes, this is what callers see from `revision(raw=false)`.
    Transformed(Vec<u8>),
    /// The content was intentionally redacted. Whether this is an error or
    /// a substitution is a policy decision made by the caller.
    Censored,
}

pub trait FlagProcessor: Send + Sync {
    fn flag(&self) -> RevisionFlags;
    fn process(&self, rev: RevIdx, raw: &[u8]) -> Result<FlagOutcome, RevlogError>;
}

/// Content was intentionally redacted (e.g. a legal takedown); `revision()`
/// fails with `Censored` unless the caller opts into an empty-bytes
/// substitution.
pub struct CensorProcessor;

impl FlagProcessor for CensorProcessor {
    fn flag(&self) -> RevisionFlags {
        RevisionFlags::CENSORED
    }

    fn process(&self, _rev: RevIdx, _raw: &[u8]) -> Result<FlagOutcome, RevlogError> {
        Ok(FlagOutcome::Censored)
    }
}

/// The fixed, ordered registry of flag processors. Order matters: a
/// revision may carry multiple flag bits, and processors run in this
/// sequence.
pub fn default_processors() -> Vec<Box<dyn FlagProcessor>> {
    vec![Box::new(CensorProcessor)]
}

/// Run every registered processor whose flag bit is set on `flags`, in
/// registry order, threading the (possibly rewritten) bytes through.
pub fn apply_processors(
    processors: &[Box<dyn FlagProcessor>],
    flags: RevisionFlags,
    rev: RevIdx,
    raw: Vec<u8>,
    substitute_censored: bool,
) -> Result<Vec<u8>, RevlogError> {
    let mut data = raw;
    for proc in processors {
        if flags.contains(proc.flag()) {
            match proc.process(rev, &data)? {
                FlagOutcome::Transformed(bytes) => data = bytes,
                FlagOutcome::Censored => {
                    if substitute_censored {
                        return Ok(Vec::new());
                    }
                    return Err(RevlogError::Censored(rev));
                }
            }
        }
    }
    Ok(data)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn censored_flag_errors_by_default() {
        let processors = default_processors();
        let err = apply_processors(
            &processors,
            RevisionFlags::CENSORED,
            RevIdx::new(3),
            b"secret".to_vec(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, RevlogError::Censored(_)));
    }

    #[test]
    fn censored_flag_can_substitute_empty() {
        let processors = default_processors();
        let out = apply_processors(
            &processors,
            RevisionFlags::CENSORED,
            RevIdx::new(3),
            b"secret".to_vec(),
            true,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn no_flags_is_passthrough() {
        let processors = default_processors();
        let out = apply_processors(
            &processors,
            RevisionFlags::empty(),
            RevIdx::new(3),
            b"text".to_vec(),
            false,
        )
        .unwrap();
        assert_eq!(out, b"text");
    }
}
