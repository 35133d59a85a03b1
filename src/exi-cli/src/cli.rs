//! `decode`/`encode` subcommands (§6 "CLI surface"), following
//! `pmikstacki-bsharp/src/cli/mod.rs`'s `clap` derive shape: a top-level
//! `Cli` with a `Commands` enum, each variant flattening a shared options
//! struct.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use exi::ExiOptions;

use crate::options_args::OptionsArgs;
use crate::xml_serializer::XmlSerializer;
use crate::xml_source::XmlSource;

#[derive(Parser)]
#[command(name = "exi-cli")]
#[command(about = "Encode/decode Efficient XML Interchange (EXI) documents", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an EXI document to XML
    Decode {
        /// The input .exi file
        #[arg(required = true)]
        input: PathBuf,

        /// The output XML file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: OptionsArgs,
    },

    /// Encode an XML document to EXI
    Encode {
        /// The input XML file
        #[arg(required = true)]
        input: PathBuf,

        /// The output .exi file
        #[arg(required = true)]
        output: PathBuf,

        #[command(flatten)]
        options: OptionsArgs,

        /// Prefix the stream with the `$EXI` cookie
        #[arg(long, default_value_t = false)]
        cookie: bool,

        /// Encode the options block in-band rather than relying on the
        /// decoder to supply the same flags out-of-band
        #[arg(long, default_value_t = false)]
        options_in_band: bool,
    },
}

/// Exit codes matching BSD `sysexits.h`, as specified in §6.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Ok = 0,
    Usage = 2,
    IoError = 74,
    DataError = 65,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Decode { input, output, options } => run_decode(input, output.as_deref(), options),
        Commands::Encode { input, output, options, cookie, options_in_band } => {
            run_encode(input, output, options, *cookie, *options_in_band)
        }
    }
}

fn run_decode(input: &std::path::Path, output: Option<&std::path::Path>, options: &OptionsArgs) -> ExitCode {
    let bytes = match fs::read(input) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!(target: "exi_cli", "failed to read {}: {e}", input.display());
            return ExitCode::IoError;
        }
    };

    let out_of_band = Some(options.to_options());
    let mut buffer: Vec<u8> = Vec::new();
    let mut serializer = XmlSerializer::new(&mut buffer);

    let decode_result = exi::decode(&bytes, out_of_band, &mut serializer);
    let write_err = serializer.take_error();
    drop(serializer);

    if let Some(write_err) = write_err {
        log::error!(target: "exi_cli", "xml serialization failed: {write_err}");
        return ExitCode::DataError;
    }
    if let Err(e) = decode_result {
        log::error!(target: "exi_cli", "decode failed: {e}");
        return ExitCode::DataError;
    }

    let result = match output {
        Some(path) => fs::write(path, &buffer),
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&buffer)
        }
    };
    if let Err(e) = result {
        log::error!(target: "exi_cli", "failed to write output: {e}");
        return ExitCode::IoError;
    }

    ExitCode::Ok
}

fn run_encode(
    input: &std::path::Path,
    output: &std::path::Path,
    options: &OptionsArgs,
    cookie: bool,
    options_in_band: bool,
) -> ExitCode {
    let content = match fs::read_to_string(input) {
        Ok(content) => content,
        Err(e) => {
            log::error!(target: "exi_cli", "failed to read {}: {e}", input.display());
            return ExitCode::IoError;
        }
    };

    let mut opts: ExiOptions = options.to_options();
    if let Err(e) = opts.fixup_and_validate() {
        log::error!(target: "exi_cli", "invalid options: {e}");
        return ExitCode::Usage;
    }

    let mut source = XmlSource::new(&content);
    let bytes = match exi::encode(&mut source, &opts, cookie, options_in_band) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!(target: "exi_cli", "encode failed: {e}");
            return ExitCode::DataError;
        }
    };

    if let Err(e) = fs::write(output, &bytes) {
        log::error!(target: "exi_cli", "failed to write {}: {e}", output.display());
        return ExitCode::IoError;
    }

    ExitCode::Ok
}
