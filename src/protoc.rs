//! `protoc --decode` collaborator.

use bytes::Bytes;
use snafu::{ensure, ResultExt};
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::thread;
use tracing::{debug, info};

use crate::config::Config;
use crate::decoder::*;

/// Executable used when no other is configured.
pub const DEFAULT_PROTOC: &str = "protoc";

/// Decoder that runs a fresh `protoc --decode` process for every record.
///
/// Each record is isolated in its own process: a record that crashes or confuses `protoc`
/// cannot affect the records after it.
#[derive(Debug, Clone)]
pub struct ProtocDecoder
{
    program: PathBuf,
    message_type: String,
    import_paths: Vec<PathBuf>,
    proto_files: Vec<PathBuf>,
}

impl ProtocDecoder
{
    /// Creates a decoder running `program` with the schema settings from `config`.
    pub fn new(program: impl Into<PathBuf>, config: &Config) -> Self
    {
        ProtocDecoder {
            program: program.into(),
            message_type: config.message_type.clone(),
            import_paths: config.import_paths.clone(),
            proto_files: config.proto_files.clone(),
        }
    }

    /// Checks that the executable can be run.
    ///
    /// Runs `<program> --version` and returns the reported version.
    pub fn check_available(&self) -> Result<String, DecoderError>
    {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .context(Unavailable {
                program: &self.program,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        ensure!(
            output.status.success(),
            Unusable {
                program: &self.program,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
        );

        info!(program = %self.program.display(), version = %stdout, "Using protoc");
        Ok(stdout)
    }

    /// Arguments passed to the executable for each record.
    pub fn arguments(&self) -> Vec<OsString>
    {
        let mut args = vec![OsString::from(format!("--decode={}", self.message_type))];
        for path in &self.import_paths {
            let mut arg = OsString::from("--proto_path=");
            arg.push(path);
            args.push(arg);
        }
        args.extend(self.proto_files.iter().map(|f| f.as_os_str().to_owned()));
        args
    }
}

impl Decoder for ProtocDecoder
{
    fn decode(&mut self, payload: &[u8]) -> Result<DecodeOutput, DecoderError>
    {
        let mut child = Command::new(&self.program)
            .args(self.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(Launch {
                program: &self.program,
            })?;

        // The payload is written from its own thread while stdout and stderr are drained, so
        // a collaborator that answers before reading all of its input cannot stall on a full
        // pipe.
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || write_payload(stdin, payload));
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "payload writer panicked",
                ))
            });
            (written, output)
        });

        let output = output.context(Launch {
            program: &self.program,
        })?;
        written.context(Launch {
            program: &self.program,
        })?;

        let mut diagnostics = output.stderr;
        if !output.status.success() && diagnostics.is_empty() {
            diagnostics = format!("protoc exited with {}", output.status).into_bytes();
        }

        Ok(DecodeOutput {
            text: Bytes::from(output.stdout),
            diagnostics: Bytes::from(diagnostics),
            success: output.status.success(),
        })
    }
}

/// Writes the payload and closes stdin.
///
/// protoc may exit before consuming the whole payload, for example when the message type is
/// unknown. The resulting broken pipe is not a launch failure; the reason ends up on stderr.
fn write_payload(stdin: Option<ChildStdin>, payload: &[u8]) -> io::Result<()>
{
    let mut stdin = match stdin {
        Some(stdin) => stdin,
        None => return Ok(()),
    };
    match stdin.write_all(payload) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!("protoc closed stdin early");
            Ok(())
        }
        result => result,
    }
}

#[cfg(test)]
mod test
{
    use super::*;
    use crate::frame::HeaderWidth;

    fn config() -> Config
    {
        Config::new(
            HeaderWidth::default(),
            "pkg.Message".to_string(),
            vec![PathBuf::from("protos"), PathBuf::from("vendor")],
            vec![PathBuf::from("protos/message.proto")],
        )
        .unwrap()
    }

    #[test]
    fn arguments()
    {
        let decoder = ProtocDecoder::new(DEFAULT_PROTOC, &config());
        assert_eq!(
            decoder.arguments(),
            vec![
                OsString::from("--decode=pkg.Message"),
                OsString::from("--proto_path=protos"),
                OsString::from("--proto_path=vendor"),
                OsString::from("protos/message.proto"),
            ]
        );
    }

    #[test]
    fn missing_executable_is_unavailable()
    {
        let decoder = ProtocDecoder::new("/nonexistent/protoframe-test/protoc", &config());
        match decoder.check_available() {
            Err(DecoderError::Unavailable { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    const FAKE_PROTOC: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/fake-protoc");

    #[cfg(unix)]
    fn fake(message_type: &str) -> ProtocDecoder
    {
        let config = Config::new(
            HeaderWidth::default(),
            message_type.to_string(),
            vec![],
            vec![PathBuf::from("test.proto")],
        )
        .unwrap();
        ProtocDecoder::new(FAKE_PROTOC, &config)
    }

    #[cfg(unix)]
    #[test]
    fn version_check()
    {
        assert_eq!(fake("Test.Warn").check_available().unwrap(), "libprotoc 3.21.12");
    }

    #[cfg(unix)]
    #[test]
    fn failing_version_check_is_unusable()
    {
        let broken = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/broken-protoc");
        let decoder = ProtocDecoder::new(broken, &config());
        match decoder.check_available() {
            Err(DecoderError::Unusable { message, .. }) => {
                assert_eq!(message, "protoc: shared library missing")
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn text_and_warnings()
    {
        let output = fake("Test.Warn").decode(b"\x08\x01").unwrap();
        assert_eq!(output.text, &b"a: 1\n"[..]);
        assert_eq!(output.diagnostics, &b"warn: odd\n"[..]);
        assert!(output.success);
        assert!(output.is_failure());
    }

    #[cfg(unix)]
    #[test]
    fn silent_exit_failure_gets_a_diagnostic()
    {
        let output = fake("Test.Silent").decode(b"\x08\x01").unwrap();
        assert!(!output.success);
        assert!(output.text.is_empty());
        let diagnostics = String::from_utf8(output.diagnostics.to_vec()).unwrap();
        assert!(diagnostics.starts_with("protoc exited with"), "{}", diagnostics);
    }

    #[cfg(unix)]
    #[test]
    fn early_exit_is_a_record_failure()
    {
        let payload = vec![0u8; 4 * 1024 * 1024];
        let output = fake("Test.Early").decode(&payload).unwrap();
        assert!(!output.success);
        assert_eq!(output.diagnostics, &b"Failed to parse input.\n"[..]);
    }

    #[cfg(unix)]
    #[test]
    fn large_output_while_reading_input()
    {
        let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let output = fake("Test.Echo").decode(&payload).unwrap();
        assert!(output.success);
        assert_eq!(output.text, &payload[..]);
    }

    #[test]
    fn missing_executable_fails_launch()
    {
        let mut decoder = ProtocDecoder::new("/nonexistent/protoframe-test/protoc", &config());
        match decoder.decode(b"\x08\x01") {
            Err(DecoderError::Launch { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
