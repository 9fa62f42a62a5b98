//! Zlib stream helpers with explicit framing.
//!
//! Map block records embed two zlib streams back to back with no length
//! prefix; the only way to find the section following a stream is to know
//! how many input bytes the stream itself occupied. [`inflate_delimited`]
//! therefore drives the stateful decompressor directly instead of using a
//! reader adapter, and reports the consumed byte count alongside the
//! decompressed data.

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Write};
use thiserror::Error;

/// A zlib stream could not be fully inflated
#[derive(Error, Debug)]
pub enum ZlibError {
    /// The stream is not valid deflate data
    #[error("corrupt deflate stream: {0}")]
    Corrupt(#[from] flate2::DecompressError),
    /// The input ended before the stream did
    #[error("deflate stream ended prematurely")]
    Truncated,
}

const CHUNK: usize = 16 * 1024;

/// Inflate the zlib stream at the start of `input`.
///
/// Returns the decompressed bytes together with the number of input bytes
/// the stream occupied, leaving the caller positioned at whatever follows
/// the stream.
pub fn inflate_delimited(input: &[u8]) -> Result<(Vec<u8>, usize), ZlibError> {
    let mut inflater = Decompress::new(true);
    let mut output = Vec::with_capacity(CHUNK);
    loop {
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        if output.len() == output.capacity() {
            output.reserve(CHUNK);
        }
        let status = inflater.decompress_vec(
            &input[before_in as usize..],
            &mut output,
            FlushDecompress::None,
        )?;
        match status {
            Status::StreamEnd => return Ok((output, inflater.total_in() as usize)),
            Status::Ok | Status::BufError => {
                let stalled =
                    inflater.total_in() == before_in && inflater.total_out() == before_out;
                if stalled && output.len() < output.capacity() {
                    // nothing left to feed and room to write: the stream is cut short
                    return Err(ZlibError::Truncated);
                }
            }
        }
    }
}

/// Compress `data` into a single zlib stream
pub fn deflate(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
