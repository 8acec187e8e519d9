// Copyright (c) 2018-present, Facebook, Inc.
// All Rights Reserved.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2 or any later version.

//! Opening a bundle file and reading raw bytes out of it by offset.
//!
//! Uncompressed bundles are read by seeking the file directly. Compressed
//! ones (and the single-part bundle2 container, whose payload chunking
//! this crate does not bother tracking separately) are fully decompressed
//! into a temporary file once at open time, matching the life-cycle note in
//! spec §4.5: "a temporary decompressed copy is created when the bundle on
//! disk is compressed and seek/tell are required".

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use changegroup::bundle2::{self, BundleFormat, Part};
use changegroup::CgVersion;

use crate::errors::BundleError;

pub struct BundleSource {
    file: RefCell<File>,
    // Kept alive only to hold the temp file's path open for the crate's
    // lifetime; never read through directly.
    _tmp: Option<tempfile::NamedTempFile>,
}

impl BundleSource {
    /// Open `path`, sniff its format, and return a source positioned so
    /// that `payload_start` is where the changegroup stream begins, along
    /// with the version it declares (v1 for every bare `HG10*` container;
    /// read from the `changegroup` part's params for bundle2).
    pub fn open(path: &Path) -> Result<(Self, u64, CgVersion), BundleError> {
        Self::open_with_logger(path, None)
    }

    pub fn open_with_logger(
        path: &Path,
        logger: Option<&slog::Logger>,
    ) -> Result<(Self, u64, CgVersion), BundleError> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 6];
        let n = read_some(&mut file, &mut magic)?;
        let format = bundle2::sniff_format(&magic[..n]).ok_or(BundleError::UnknownFormat)?;

        match format {
            BundleFormat::Cg1Uncompressed => {
                Ok((BundleSource { file: RefCell::new(file), _tmp: None }, 6, CgVersion::V1))
            }
            BundleFormat::Cg1Gzip => {
                if let Some(logger) = logger {
                    slog::debug!(logger, "materializing gzip-compressed bundle to a temp file for seeking");
                }
                file.seek(SeekFrom::Start(6))?;
                let mut decoder = flate2::read::GzDecoder::new(file);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                Ok((materialize(&buf)?, 0, CgVersion::V1))
            }
            BundleFormat::Cg1Bzip2 => Err(BundleError::UnsupportedCompression),
            BundleFormat::Bundle2 => {
                if let Some(logger) = logger {
                    slog::debug!(logger, "materializing bundle2 changegroup part payload to a temp file for seeking");
                }
                file.seek(SeekFrom::Start(4))?;
                let part = Part::read(&mut file)?.ok_or(BundleError::EmptyBundle2)?;
                if part.name != "changegroup" {
                    return Err(BundleError::UnexpectedPart(part.name));
                }
                let version = bundle2::changegroup_version(&part, logger);
                Ok((materialize(&part.payload)?, 0, version))
            }
        }
    }

    pub fn read_at(&self, offset: u64, length: u64) -> Result<Vec<u8>, BundleError> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn read_some<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize, BundleError> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn materialize(bytes: &[u8]) -> Result<BundleSource, BundleError> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    let read_handle = tmp.reopen()?;
    Ok(BundleSource { file: RefCell::new(read_handle), _tmp: Some(tmp) })
}
