// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Bundle file headers and the minimal bundle2 part container needed to
//! carry a `changegroup` part (spec §6 "Bundle file header").
//!
//! Full bundle2 supports many part types (bookmarks, pushkey, obsmarkers,
//! ...); this crate only needs enough of the container to read/write a
//! single `changegroup` part's header and locate its payload, since
//! everything else named in spec §1's scope (exchange, peer RPCs) is a
//! contract, not a wire format, here.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::chunk;
use crate::errors::CgError;
use crate::header::CgVersion;

pub const MAGIC_UNCOMPRESSED: &[u8; 6] = b"HG10UN";
pub const MAGIC_BZIP2: &[u8; 6] = b"HG10BZ";
pub const MAGIC_GZIP: &[u8; 6] = b"HG10GZ";
pub const MAGIC_BUNDLE2: &[u8; 4] = b"HG20";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// A bare cg1 stream, optionally compressed, with no bundle2
    /// container around it.
    Cg1Uncompressed,
    Cg1Bzip2,
    Cg1Gzip,
    /// A framed, multi-part bundle2 container.
    Bundle2,
}

/// Sniff the four-or-six-byte magic at the start of a bundle file.
pub fn sniff_format(bytes: &[u8]) -> Option<BundleFormat> {
    if bytes.len() >= 6 && &bytes[..6] == MAGIC_UNCOMPRESSED.as_ref() {
        return Some(BundleFormat::Cg1Uncompressed);
    }
    if bytes.len() >= 6 && &bytes[..6] == MAGIC_BZIP2.as_ref() {
        return Some(BundleFormat::Cg1Bzip2);
    }
    if bytes.len() >= 6 && &bytes[..6] == MAGIC_GZIP.as_ref() {
        return Some(BundleFormat::Cg1Gzip);
    }
    if bytes.len() >= 4 && &bytes[..4] == MAGIC_BUNDLE2.as_ref() {
        return Some(BundleFormat::Bundle2);
    }
    None
}

/// A single bundle2 part: a name, a parameter map, and a payload framed
/// the same way a changegroup group is (chunk-by-chunk, zero-length
/// terminated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub params: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl Part {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), CgError> {
        chunk::write_chunk(w, self.name.as_bytes())?;
        let mut param_buf = Vec::new();
        for (k, v) in &self.params {
            param_buf.extend_from_slice(k.as_bytes());
            param_buf.push(b'=');
            param_buf.extend_from_slice(v.as_bytes());
            param_buf.push(b'\n');
        }
        chunk::write_chunk(w, &param_buf)?;
        chunk::write_chunk(w, &self.payload)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Option<Self>, CgError> {
        let name = match chunk::read_chunk(r)? {
            None => return Ok(None),
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        let param_bytes = chunk::read_chunk(r)?.unwrap_or_default();
        let mut params = BTreeMap::new();
        for line in param_bytes.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            if let Some(eq) = line.iter().position(|&b| b == b'=') {
                let k = String::from_utf8_lossy(&line[..eq]).into_owned();
                let v = String::from_utf8_lossy(&line[eq + 1..]).into_owned();
                params.insert(k, v);
            }
        }
        let payload = chunk::read_chunk(r)?.unwrap_or_default();
        Ok(Some(Part { name, params, payload }))
    }
}

/// The version a `changegroup` part declares, falling back to v2 with a
/// logged warning when the parameter is absent or unparseable (spec §2.2
/// "mirrors `part_inner::get_cg_unpacker`'s fallback behavior").
pub fn changegroup_version(part: &Part, logger: Option<&slog::Logger>) -> CgVersion {
    match part.params.get("version") {
        Some(tag) => CgVersion::from_wire_tag(tag).unwrap_or_else(|_| {
            if let Some(logger) = logger {
                slog::warn!(logger, "unparseable changegroup version, defaulting to 02"; "version" => tag.clone());
            }
            CgVersion::V2
        }),
        None => {
            if let Some(logger) = logger {
                slog::warn!(logger, "changegroup part missing version parameter, defaulting to 02");
            }
            CgVersion::V2
        }
    }
}

pub fn changegroup_part(payload: Vec<u8>, version: CgVersion) -> Part {
    let mut params = BTreeMap::new();
    params.insert("version".to_string(), version.wire_tag().to_string());
    Part { name: "changegroup".to_string(), params, payload }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sniffs_every_known_magic() {
        assert_eq!(sniff_format(b"HG10UNrest"), Some(BundleFormat::Cg1Uncompressed));
        assert_eq!(sniff_format(b"HG10BZrest"), Some(BundleFormat::Cg1Bzip2));
        assert_eq!(sniff_format(b"HG10GZrest"), Some(BundleFormat::Cg1Gzip));
        assert_eq!(sniff_format(b"HG20....."), Some(BundleFormat::Bundle2));
        assert_eq!(sniff_format(b"nope"), None);
    }

    #[test]
    fn part_roundtrips() {
        let part = changegroup_part(b"payload bytes".to_vec(), CgVersion::V3);
        let mut buf = Vec::new();
        part.write(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Part::read(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, part);
        assert_eq!(changegroup_version(&decoded, None), CgVersion::V3);
    }

    #[test]
    fn missing_version_param_defaults_to_v2() {
        let part = Part { name: "changegroup".to_string(), params: BTreeMap::new(), payload: vec![] };
        assert_eq!(changegroup_version(&part, None), CgVersion::V2);
    }

    #[test]
    fn end_of_stream_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = Part::read(&mut cursor);
        assert!(err.is_err());
    }
}
