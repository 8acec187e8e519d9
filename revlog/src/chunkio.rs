// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Compression of on-disk revision chunks (spec §6: "compressed_size" vs
//! "uncompressed_size" in the index entry).
//!
//! Each stored chunk (a snapshot's full text, or an encoded `Delta`) is
//! prefixed with a one-byte tag so a reader never needs out-of-band
//! knowledge of whether it was worth compressing.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::errors::RevlogError;

const TAG_ZLIB: u8 = 0;
const TAG_RAW: u8 = 1;

/// Compress `raw`, falling back to an uncompressed passthrough (tagged
/// separately) when zlib doesn't win — mirrors the classic revlog
/// behavior of never storing a chunk bigger than its input.
pub fn compress_chunk(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).expect("zlib write to Vec cannot fail");
    let compressed = encoder.finish().expect("zlib finish to Vec cannot fail");

    if compressed.len() + 1 < raw.len() {
        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(TAG_ZLIB);
        out.extend_from_slice(&compressed);
        out
    } else {
        let mut out = Vec::with_capacity(raw.len() + 1);
        out.push(TAG_RAW);
        out.extend_from_slice(raw);
        out
    }
}

pub fn decompress_chunk(buf: &[u8]) -> Result<Vec<u8>, RevlogError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    match buf[0] {
        TAG_ZLIB => {
            let mut decoder = ZlibDecoder::new(&buf[1..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| RevlogError::Corrupt(format!("zlib chunk corrupt: {}", e)))?;
            Ok(out)
        }
        TAG_RAW => Ok(buf[1..].to_vec()),
        other => Err(RevlogError::Corrupt(format!("unknown chunk tag {}", other))),
    }
}
