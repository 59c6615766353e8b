use clap::Parser;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use protoframe::config::{open_input, Config};
use protoframe::decoder::Decoder;
use protoframe::dispatch::Dispatcher;
use protoframe::frame::{Framer, DEFAULT_HEADER_WIDTH};
use protoframe::protoc::{ProtocDecoder, DEFAULT_PROTOC};
use protoframe::schema::SchemaDecoder;

/// Decode a stream of length-prefixed protocol buffer records.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args
{
    /// Fully qualified message type of the records.
    #[arg(short = 't', long = "type")]
    message_type: String,

    /// Width of the little-endian record length header in bytes.
    #[arg(short = 'w', long, default_value_t = DEFAULT_HEADER_WIDTH)]
    header_width: u8,

    /// Directory to search for schema files and their imports. May be repeated.
    #[arg(short = 'I', long = "proto-path")]
    import_paths: Vec<PathBuf>,

    /// Input file. Reads standard input if missing or `-`.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// The protoc executable.
    #[arg(long, env = "PROTOC", default_value = DEFAULT_PROTOC)]
    protoc: PathBuf,

    /// Parse the schema once and decode in process instead of running protoc per record.
    #[arg(long)]
    in_process: bool,

    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Schema files defining the message type.
    #[arg(required = true)]
    proto_files: Vec<PathBuf>,
}

fn main() -> ExitCode
{
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>>
{
    let config = Config::with_width(
        args.header_width,
        args.message_type,
        args.import_paths,
        args.proto_files,
    )?;

    let decoder: Box<dyn Decoder> = if args.in_process {
        Box::new(SchemaDecoder::load(&config)?)
    } else {
        let decoder = ProtocDecoder::new(args.protoc, &config);
        decoder.check_available()?;
        Box::new(decoder)
    };

    let input = open_input(args.input.as_deref())?;

    let framer = Framer::new(BufReader::new(input), config.header_width);
    let stdout = io::stdout();
    let mut dispatcher = Dispatcher::new(decoder, BufWriter::new(stdout.lock()));
    dispatcher.run(framer)?;

    Ok(())
}

fn init_logging(verbose: u8)
{
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("PROTOFRAME_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
