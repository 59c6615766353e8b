//! Splitting a byte stream into length-prefixed records.
//!
//! Each record in the stream is preceded by a header of [`HeaderWidth`] bytes holding the
//! length of the payload as a little-endian two's complement integer:
//!
//! ```text
//! [ header_width bytes: length ][ length bytes: payload ] ...
//! ```
//!
//! The [`Framer`] reads the stream lazily. Nothing is read before the next record is requested,
//! which allows framing pipes and other unbounded streams.
//!
//! ```
//! use protoframe::frame::{Framer, HeaderWidth};
//!
//! let input: &[u8] = b"\x02\x00\x00\x00OK\x00\x00\x00\x00";
//! let records = Framer::new(input, HeaderWidth::default())
//!     .map(|r| r.map(|record| record.payload))
//!     .collect::<Result<Vec<_>, _>>()
//!     .unwrap();
//!
//! assert_eq!(records, vec![&b"OK"[..], &b""[..]]);
//! ```

use bytes::Bytes;
use snafu::{ensure, ResultExt, Snafu};
use std::convert::TryFrom;
use std::io::{self, Read};
use tracing::debug;

/// Widest header the framer can decode.
pub const MAX_HEADER_WIDTH: u8 = 8;

/// Header width used when none is configured.
pub const DEFAULT_HEADER_WIDTH: u8 = 4;

/// Initial capacity limit for record buffers.
///
/// The declared length is not trusted for allocation; larger bodies grow the buffer as the
/// bytes actually arrive.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Framing error.
///
/// All framing errors are fatal: once the stream is misaligned there is no way to find the
/// start of the next record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum FrameError
{
    /// The header width is outside of the supported range.
    #[snafu(display(
        "Invalid header width {}, expected 1 to {} bytes",
        width,
        MAX_HEADER_WIDTH
    ))]
    InvalidHeaderWidth
    {
        /// The rejected width.
        width: u8,
    },

    /// The stream ended in the middle of a record header.
    #[snafu(display(
        "Record {} at offset {}: stream ended after {} of {} header bytes",
        index,
        offset,
        actual,
        expected
    ))]
    TruncatedHeader
    {
        /// Sequence index the record would have had.
        index: u64,
        /// Stream offset of the header.
        offset: u64,
        /// Header width.
        expected: usize,
        /// Bytes available before the end of the stream.
        actual: usize,
    },

    /// The header decoded into a length that cannot be read.
    #[snafu(display("Record {} at offset {}: invalid length {}", index, offset, length))]
    InvalidLength
    {
        /// Sequence index the record would have had.
        index: u64,
        /// Stream offset of the header.
        offset: u64,
        /// The decoded length.
        length: i64,
    },

    /// The stream ended before the whole record body was read.
    #[snafu(display(
        "Record {} at offset {}: stream ended after {} of {} payload bytes",
        index,
        offset,
        actual,
        expected
    ))]
    TruncatedBody
    {
        /// Sequence index the record would have had.
        index: u64,
        /// Stream offset of the header.
        offset: u64,
        /// Length declared by the header.
        expected: usize,
        /// Bytes available before the end of the stream.
        actual: usize,
    },

    /// Reading the stream failed.
    #[snafu(display("Record {} at offset {}: read failed: {}", index, offset, source))]
    Io
    {
        /// Sequence index the record would have had.
        index: u64,
        /// Stream offset of the header.
        offset: u64,
        /// Source error.
        source: io::Error,
    },
}

/// Number of bytes in a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderWidth(u8);

impl HeaderWidth
{
    /// Creates a header width, rejecting zero and widths above [`MAX_HEADER_WIDTH`].
    pub fn new(width: u8) -> Result<Self, FrameError>
    {
        ensure!(
            width > 0 && width <= MAX_HEADER_WIDTH,
            InvalidHeaderWidth { width }
        );
        Ok(HeaderWidth(width))
    }

    /// Width in bytes.
    pub fn get(self) -> usize
    {
        usize::from(self.0)
    }

    /// Decodes a header into a signed length.
    ///
    /// The header is little-endian two's complement regardless of the host. `header` must be
    /// exactly `self.get()` bytes long; the framer and `encode` only pass full headers.
    pub(crate) fn decode(self, header: &[u8]) -> i64
    {
        debug_assert_eq!(header.len(), self.get());

        let mut buffer = [0u8; 8];
        buffer[..header.len()].copy_from_slice(header);

        // Sign extend from the top bit of the header.
        let shift = 64 - 8 * header.len() as u32;
        (i64::from_le_bytes(buffer) << shift) >> shift
    }

    /// Encodes a length into a header of this width.
    ///
    /// Returns `None` if the length does not fit in the header.
    pub fn encode(self, length: i64) -> Option<Vec<u8>>
    {
        let header = length.to_le_bytes()[..self.get()].to_vec();
        if self.decode(&header) == length {
            Some(header)
        } else {
            None
        }
    }
}

impl Default for HeaderWidth
{
    fn default() -> Self
    {
        HeaderWidth(DEFAULT_HEADER_WIDTH)
    }
}

/// A single framed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record
{
    /// One-based sequence index of the record in the stream.
    pub index: u64,

    /// Stream offset of the record header.
    pub offset: u64,

    /// Record payload without the header.
    pub payload: Bytes,
}

/// Lazy record reader over a byte stream.
///
/// The framer is an [`Iterator`] of `Result<Record, FrameError>`. The iteration ends on a clean
/// end of stream or after the first error.
pub struct Framer<R>
{
    reader: R,
    width: HeaderWidth,
    next_index: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> Framer<R>
{
    /// Creates a framer reading from `reader`.
    pub fn new(reader: R, width: HeaderWidth) -> Self
    {
        Framer {
            reader,
            width,
            next_index: 1,
            offset: 0,
            done: false,
        }
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at a clean end of stream. Once `None` or an error has been returned,
    /// the framer is finished and keeps returning `Ok(None)`.
    pub fn next_record(&mut self) -> Result<Option<Record>, FrameError>
    {
        if self.done {
            return Ok(None);
        }

        let result = self.read_record();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn read_record(&mut self) -> Result<Option<Record>, FrameError>
    {
        let index = self.next_index;
        let offset = self.offset;

        let mut header = [0u8; MAX_HEADER_WIDTH as usize];
        let header = &mut header[..self.width.get()];
        let read = read_full(&mut self.reader, header).context(Io { index, offset })?;
        if read == 0 {
            return Ok(None);
        }
        ensure!(
            read == header.len(),
            TruncatedHeader {
                index,
                offset,
                expected: header.len(),
                actual: read,
            }
        );

        let length = self.width.decode(header);
        let expected = usize::try_from(length).map_err(|_| FrameError::InvalidLength {
            index,
            offset,
            length,
        })?;

        let mut payload = Vec::with_capacity(expected.min(INITIAL_BODY_CAPACITY));
        let actual = (&mut self.reader)
            .take(expected as u64)
            .read_to_end(&mut payload)
            .context(Io { index, offset })?;
        ensure!(
            actual == expected,
            TruncatedBody {
                index,
                offset,
                expected,
                actual,
            }
        );

        self.next_index += 1;
        self.offset += (header.len() + expected) as u64;

        debug!(index, offset, length = expected, "Framed record");
        Ok(Some(Record {
            index,
            offset,
            payload: Bytes::from(payload),
        }))
    }
}

impl<R: Read> Iterator for Framer<R>
{
    type Item = Result<Record, FrameError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        self.next_record().transpose()
    }
}

impl<R: Read> std::iter::FusedIterator for Framer<R> {}

/// Reads until `buf` is full or the stream ends.
///
/// Returns the number of bytes read. Unlike `read_exact` a short count is not an error so the
/// caller can tell a clean end of stream from a truncated read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
