//! Decoding framed records and reporting the results.

use snafu::{ResultExt, Snafu};
use std::io::{self, Read, Write};
use tracing::{info, warn};

use crate::decoder::{DecodeOutput, Decoder, DecoderError};
use crate::frame::{FrameError, Framer, Record};

/// Fatal dispatch error.
///
/// Records that fail to decode are not errors; they are reported in the output and the run
/// continues.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DispatchError
{
    /// The input stream could not be framed.
    #[snafu(display("Framing failed: {}", source))]
    Frame
    {
        /// Source error.
        source: FrameError,
    },

    /// The decoder could not be run for a record.
    #[snafu(display("Record {}: {}", index, source))]
    Launch
    {
        /// Index of the record being decoded.
        index: u64,
        /// Source error.
        source: DecoderError,
    },

    /// Writing the report failed.
    #[snafu(display("Failed to write output: {}", source))]
    Output
    {
        /// Source error.
        source: io::Error,
    },
}

/// Result of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome
{
    /// The record decoded without diagnostics.
    Decoded,

    /// The decoder reported a problem with the record.
    Failed,
}

/// Totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary
{
    /// Records framed and dispatched.
    pub records: u64,

    /// Records that decoded cleanly.
    pub decoded: u64,

    /// Records with decode failures.
    pub failed: u64,
}

impl Summary
{
    fn add(&mut self, outcome: Outcome)
    {
        self.records += 1;
        match outcome {
            Outcome::Decoded => self.decoded += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// Sends framed records to a decoder and writes a numbered report.
///
/// Each record contributes one block to the output:
///
/// ```text
/// Record 1:
/// <decoded text>
/// Record 1 diagnostics:
/// <diagnostics>
/// ```
///
/// The diagnostics section is present only if the decoder reported any.
pub struct Dispatcher<D, W>
{
    decoder: D,
    out: W,
}

impl<D: Decoder, W: Write> Dispatcher<D, W>
{
    /// Creates a dispatcher writing the report to `out`.
    pub fn new(decoder: D, out: W) -> Self
    {
        Dispatcher { decoder, out }
    }

    /// Dispatches every record of the framer.
    ///
    /// Stops at the end of the stream or at the first fatal error. Blocks for records that
    /// were already dispatched remain in the output.
    pub fn run<R: Read>(&mut self, framer: Framer<R>) -> Result<Summary, DispatchError>
    {
        let mut summary = Summary::default();
        let result = self.run_records(framer, &mut summary);
        self.out.flush().context(Output {})?;
        result?;

        info!(
            records = summary.records,
            decoded = summary.decoded,
            failed = summary.failed,
            "Finished"
        );
        Ok(summary)
    }

    fn run_records<R: Read>(
        &mut self,
        mut framer: Framer<R>,
        summary: &mut Summary,
    ) -> Result<(), DispatchError>
    {
        while let Some(record) = framer.next_record().context(Frame {})? {
            let outcome = self.dispatch(&record)?;
            summary.add(outcome);
        }
        Ok(())
    }

    /// Decodes one record and writes its block.
    pub fn dispatch(&mut self, record: &Record) -> Result<Outcome, DispatchError>
    {
        let output = self
            .decoder
            .decode(&record.payload)
            .context(Launch {
                index: record.index,
            })?;

        // Each block is flushed before the next record is read so that live streams see it.
        self.report(record.index, &output).context(Output {})?;
        self.out.flush().context(Output {})?;

        if output.is_failure() {
            warn!(
                index = record.index,
                offset = record.offset,
                "Record failed to decode"
            );
            Ok(Outcome::Failed)
        } else {
            Ok(Outcome::Decoded)
        }
    }

    fn report(&mut self, index: u64, output: &DecodeOutput) -> io::Result<()>
    {
        writeln!(self.out, "Record {}:", index)?;
        write_section(&mut self.out, &output.text)?;
        if !output.diagnostics.is_empty() {
            writeln!(self.out, "Record {} diagnostics:", index)?;
            write_section(&mut self.out, &output.diagnostics)?;
        }
        Ok(())
    }

    /// Consumes the dispatcher, returning the decoder and the output sink.
    pub fn into_parts(self) -> (D, W)
    {
        (self.decoder, self.out)
    }
}

/// Writes a text section, terminating it with a newline if needed.
fn write_section<W: Write>(out: &mut W, text: &[u8]) -> io::Result<()>
{
    out.write_all(text)?;
    if !text.is_empty() && !text.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    Ok(())
}
