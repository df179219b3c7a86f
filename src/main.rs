//! Command-line interface for proton
//!
//! # Usage Examples
//!
//! ## Convert
//! ```bash
//! # Newline-delimited JSON records to binary, base64-encoded
//! proton convert -f api.proto -m shop.Order \
//!   --input-encoding json --output-encoding binary \
//!   --delimiter '\n' --filter base64 < orders.jsonl
//!
//! # A single binary message to text
//! proton convert -f api.proto -I ./protos -m Order -i binary -o text --input order.bin
//! ```
//!
//! ## Messages
//! ```bash
//! proton messages -f api.proto
//! ```
//!
//! ## Delimiters
//! - Empty (default): the whole input is one message
//! - One byte: `,` or `|`
//! - Escapes: `\n`, `\r`, `\t`, `\0`, `\\`, `\xHH`

use anyhow::Context;
use clap::{Parser, Subcommand};
use proton::{parse_delimiter, parse_encoding, parse_filter, Converter, ConverterConfig, SchemaOpts};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proton")]
#[command(about = "Convert streams of protobuf messages between binary, JSON and text encodings")]
#[command(long_about = None)]
struct Cli {
    /// Log debug output to stderr when RUST_LOG is not set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a stream of messages from one encoding to another
    Convert {
        #[command(flatten)]
        schema: SchemaOpts,

        /// Message type name, fully qualified or unique in the schema
        #[arg(short, long)]
        message: String,

        /// Input messages encoding [binary, json, text]
        #[arg(short = 'i', long)]
        input_encoding: String,

        /// Output messages encoding [binary, json, text] ("proto" is an alias of binary)
        #[arg(short = 'o', long)]
        output_encoding: String,

        /// Input messages delimiter (0 or 1 characters; if unset, the input is treated as a single message)
        #[arg(short, long, default_value = "")]
        delimiter: String,

        /// Output message filter [base64]
        #[arg(long, default_value = "")]
        filter: String,

        /// Read messages from a file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Write converted messages to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the message types defined by a schema
    Messages {
        #[command(flatten)]
        schema: SchemaOpts,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with converted output on stdout
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            schema,
            message,
            input_encoding,
            output_encoding,
            delimiter,
            filter,
            input,
            output,
        } => {
            let config = ConverterConfig::new(
                message,
                parse_encoding(&input_encoding).context("convert")?,
                parse_encoding(&output_encoding).context("convert")?,
            )
            .with_delimiter(parse_delimiter(&delimiter).context("convert")?)
            .with_filter(parse_filter(&filter).context("convert")?);

            let schema = schema.load()?;
            let converter = Converter::new(Arc::new(schema), config)?;
            run_convert(&converter, input, output)
        }
        Commands::Messages { schema } => {
            let schema = schema.load()?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for name in schema.list_messages() {
                writeln!(out, "{name}")?;
            }
            Ok(())
        }
    }
}

fn run_convert(
    converter: &Converter,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let stats = match (input, output) {
        (Some(input), output) => {
            let file = File::open(&input)
                .with_context(|| format!("Failed to open input file {input:?}"))?;
            write_to(converter, BufReader::new(file), output)?
        }
        (None, output) => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                anyhow::bail!("convert: no input");
            }
            write_to(converter, stdin.lock(), output)?
        }
    };

    tracing::debug!("Done: {:?}", stats);
    Ok(())
}

fn write_to<R: io::BufRead>(
    converter: &Converter,
    input: R,
    output: Option<PathBuf>,
) -> anyhow::Result<proton::ConvertStats> {
    let stats = match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create output file {path:?}"))?;
            converter.convert(input, &mut BufWriter::new(file))?
        }
        None => {
            let stdout = io::stdout();
            converter.convert(input, &mut BufWriter::new(stdout.lock()))?
        }
    };
    Ok(stats)
}
