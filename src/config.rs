//! Run configuration.

use snafu::{ensure, ResultExt, Snafu};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::frame::{FrameError, HeaderWidth};

/// Configuration error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ConfigError
{
    /// The header width is not supported.
    #[snafu(display("{}", source))]
    HeaderWidthInvalid
    {
        /// Source error.
        source: FrameError,
    },

    /// No message type was given.
    #[snafu(display("A message type name is required"))]
    MissingMessageType,

    /// No schema files were given.
    #[snafu(display("At least one schema file is required"))]
    NoSchemaFiles,

    /// The input file could not be opened.
    #[snafu(display("Failed to open input '{}': {}", path.display(), source))]
    InputOpen
    {
        /// Input file path.
        path: PathBuf,
        /// Source error.
        source: io::Error,
    },
}

/// Immutable settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config
{
    /// Width of the record length headers.
    pub header_width: HeaderWidth,

    /// Fully qualified name of the message type of every record.
    pub message_type: String,

    /// Import search paths, in lookup order.
    pub import_paths: Vec<PathBuf>,

    /// Schema files defining the message type.
    pub proto_files: Vec<PathBuf>,
}

impl Config
{
    /// Creates a validated configuration.
    pub fn new(
        header_width: HeaderWidth,
        message_type: String,
        import_paths: Vec<PathBuf>,
        proto_files: Vec<PathBuf>,
    ) -> Result<Self, ConfigError>
    {
        let config = Config {
            header_width,
            message_type,
            import_paths,
            proto_files,
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration from a raw header width.
    pub fn with_width(
        header_width: u8,
        message_type: String,
        import_paths: Vec<PathBuf>,
        proto_files: Vec<PathBuf>,
    ) -> Result<Self, ConfigError>
    {
        let header_width = HeaderWidth::new(header_width).context(HeaderWidthInvalid {})?;
        Config::new(header_width, message_type, import_paths, proto_files)
    }

    /// Checks the invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        ensure!(!self.message_type.trim().is_empty(), MissingMessageType {});
        ensure!(!self.proto_files.is_empty(), NoSchemaFiles {});
        Ok(())
    }
}

/// Opens the record stream.
///
/// Standard input is used when `path` is `None` or `-`.
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>, ConfigError>
{
    match path {
        Some(path) if path.as_os_str() != "-" => {
            info!(path = %path.display(), "Reading input file");
            let file = File::open(path).context(InputOpen { path })?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdin())),
    }
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn valid()
    {
        let config = Config::with_width(
            2,
            "Message".to_string(),
            vec![],
            vec![PathBuf::from("a.proto")],
        )
        .unwrap();
        assert_eq!(config.header_width.get(), 2);
    }

    #[test]
    fn invalid_width()
    {
        let result = Config::with_width(
            0,
            "Message".to_string(),
            vec![],
            vec![PathBuf::from("a.proto")],
        );
        assert!(matches!(result, Err(ConfigError::HeaderWidthInvalid { .. })));
    }

    #[test]
    fn missing_message_type()
    {
        let result = Config::new(
            HeaderWidth::default(),
            "  ".to_string(),
            vec![],
            vec![PathBuf::from("a.proto")],
        );
        assert!(matches!(result, Err(ConfigError::MissingMessageType)));
    }

    #[test]
    fn missing_schema_files()
    {
        let result = Config::new(HeaderWidth::default(), "Message".to_string(), vec![], vec![]);
        assert!(matches!(result, Err(ConfigError::NoSchemaFiles)));
    }

    #[test]
    fn missing_input_names_the_path()
    {
        let path = Path::new("/nonexistent/protoframe-test/records.bin");
        match open_input(Some(path)) {
            Err(e @ ConfigError::InputOpen { .. }) => {
                assert!(e.to_string().contains("/nonexistent/protoframe-test/records.bin"))
            }
            Err(other) => panic!("Unexpected error: {:?}", other),
            Ok(_) => panic!("Opened a missing file"),
        }
    }
}
