// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Chunk framing (spec §6 "Changegroup chunk framing").
//!
//! A chunk is a signed 32-bit big-endian length, inclusive of the length
//! field itself, followed by `length - 4` bytes of payload. `length == 0`
//! ends a group; `0 < length < 5` is invalid and fatal.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::CgError;

pub fn read_exactly<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, CgError> {
    let mut buf = vec![0u8; n];
    let got = {
        let mut total = 0usize;
        loop {
            match r.read(&mut buf[total..]) {
                Ok(0) => break total,
                Ok(k) => {
                    total += k;
                    if total == n {
                        break total;
                    }
                }
                Err(e) => return Err(CgError::Io(e)),
            }
        }
    };
    if got < n {
        return Err(CgError::UnexpectedEof { got, expected: n });
    }
    Ok(buf)
}

/// Read one chunk. `Ok(None)` means the zero-length chunk that ends a
/// group was read.
pub fn read_chunk<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>, CgError> {
    let len = r.read_i32::<BigEndian>()?;
    if len == 0 {
        return Ok(None);
    }
    if len < 5 {
        return Err(CgError::InvalidChunkLength(len));
    }
    let payload_len = (len - 4) as usize;
    Ok(Some(read_exactly(r, payload_len)?))
}

pub fn write_chunk<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), CgError> {
    let len = (payload.len() + 4) as i32;
    w.write_i32::<BigEndian>(len)?;
    w.write_all(payload)?;
    Ok(())
}

pub fn write_group_end<W: Write>(w: &mut W) -> Result<(), CgError> {
    w.write_i32::<BigEndian>(0)?;
    Ok(())
}

/// Read every chunk in a group, stopping at (and consuming) the
/// terminating zero-length chunk.
pub fn read_group<R: Read>(r: &mut R) -> Result<Vec<Vec<u8>>, CgError> {
    let mut out = Vec::new();
    while let Some(chunk) = read_chunk(r)? {
        out.push(chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn group_roundtrips() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, b"hello").unwrap();
        write_chunk(&mut buf, b"world").unwrap();
        write_group_end(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let chunks = read_group(&mut cursor).unwrap();
        assert_eq!(chunks, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn zero_length_chunk_ends_group_immediately() {
        let mut buf = Vec::new();
        write_group_end(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(read_group(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn length_between_one_and_four_is_fatal() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 2]);
        let err = read_chunk(&mut cursor).unwrap_err();
        assert!(matches!(err, CgError::InvalidChunkLength(2)));
    }

    #[test]
    fn truncated_stream_is_fatal() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 10, b'h', b'i']);
        let err = read_chunk(&mut cursor).unwrap_err();
        assert!(matches!(err, CgError::UnexpectedEof { .. }));
    }
}
