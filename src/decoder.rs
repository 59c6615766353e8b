//! Boundary to the schema-aware decoding collaborators.
//!
//! A [`Decoder`] turns the raw bytes of a single record into text. Two implementations are
//! provided: [`ProtocDecoder`](crate::protoc::ProtocDecoder), which runs `protoc --decode` for
//! every record, and [`SchemaDecoder`](crate::schema::SchemaDecoder), which parses the schema
//! once and decodes in process.

use bytes::Bytes;
use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Collaborator error.
///
/// These errors mean the collaborator could not be used at all. A record that the collaborator
/// could not decode is reported through [`DecodeOutput::diagnostics`] instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DecoderError
{
    /// The collaborator failed its pre-flight check.
    #[snafu(display("Decoder '{}' is not available: {}", program.display(), source))]
    Unavailable
    {
        /// Collaborator executable.
        program: PathBuf,
        /// Source error.
        source: io::Error,
    },

    /// The collaborator ran its pre-flight check but reported a failure.
    #[snafu(display("Decoder '{}' is not usable: {}", program.display(), message))]
    Unusable
    {
        /// Collaborator executable.
        program: PathBuf,
        /// Output of the failed check.
        message: String,
    },

    /// The collaborator process could not be started or talked to.
    #[snafu(display("Failed to run decoder '{}': {}", program.display(), source))]
    Launch
    {
        /// Collaborator executable.
        program: PathBuf,
        /// Source error.
        source: io::Error,
    },

    /// A schema file could not be read.
    #[snafu(display("Failed to read schema file '{}': {}", path.display(), source))]
    SchemaRead
    {
        /// Schema file path.
        path: PathBuf,
        /// Source error.
        source: io::Error,
    },

    /// A schema file was not found in any of the import paths.
    #[snafu(display("Schema file '{}' not found in the import paths", path.display()))]
    SchemaNotFound
    {
        /// Schema file path as configured.
        path: PathBuf,
    },

    /// The schema files could not be parsed.
    #[snafu(display("Failed to parse schema: {}", source))]
    SchemaParse
    {
        /// Source error.
        source: protofish::context::ParseError,
    },

    /// The message type is not defined by the schema.
    #[snafu(display("Message type '{}' is not defined in the schema", name))]
    UnknownMessageType
    {
        /// Message type name.
        name: String,
    },
}

/// Result of decoding one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutput
{
    /// Rendered text.
    pub text: Bytes,

    /// Diagnostics reported while decoding. Empty when there were none.
    pub diagnostics: Bytes,

    /// False if the collaborator reported that decoding failed.
    pub success: bool,
}

impl DecodeOutput
{
    /// Output of a clean decode.
    pub fn decoded(text: impl Into<Bytes>) -> Self
    {
        DecodeOutput {
            text: text.into(),
            diagnostics: Bytes::new(),
            success: true,
        }
    }

    /// Output of a failed decode.
    pub fn failed(diagnostics: impl Into<Bytes>) -> Self
    {
        DecodeOutput {
            text: Bytes::new(),
            diagnostics: diagnostics.into(),
            success: false,
        }
    }

    /// True if the record counts as a per-record failure.
    ///
    /// Diagnostics fail the record even when some text was rendered.
    pub fn is_failure(&self) -> bool
    {
        !self.success || !self.diagnostics.is_empty()
    }
}

/// Schema-aware record decoder.
pub trait Decoder
{
    /// Decodes a single record payload.
    ///
    /// An `Err` is fatal for the whole run. Records that merely fail to decode return `Ok` with
    /// diagnostics.
    fn decode(&mut self, payload: &[u8]) -> Result<DecodeOutput, DecoderError>;
}

impl<D: Decoder + ?Sized> Decoder for Box<D>
{
    fn decode(&mut self, payload: &[u8]) -> Result<DecodeOutput, DecoderError>
    {
        (**self).decode(payload)
    }
}
