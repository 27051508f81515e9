//! xmltab: Convert concatenated XML documents into relational tables
//!
//! Usage:
//!   # Convert a bulk archive to CSV files in ./out
//!   xmltab -i ipg240102.xml -c config.yaml -d dtds -o out
//!
//!   # Convert a directory tree into SQLite, skipping broken documents
//!   xmltab -i data/ -r -c config.yaml -o out --output-type sqlite --continue-on-error

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;
use xmltab::config::{OutputKind, TabulateConfig};
use xmltab::logging::init_logging;
use xmltab::segment::{SegmenterConfig, DEFAULT_WRAPPER_DOCTYPE};

#[derive(Parser, Debug)]
#[command(name = "xmltab")]
#[command(about = "Convert concatenated XML documents into relational tables", long_about = None)]
struct Args {
    /// Print debug output
    #[arg(short, long)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    /// XML files, directories or glob patterns to convert
    #[arg(short = 'i', long = "input", value_name = "PATH", num_args = 1.., required = true)]
    inputs: Vec<String>,

    /// Search input directories recursively
    #[arg(short, long)]
    recurse: bool,

    /// YAML schema describing the tables to extract
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Directory holding the DTDs referenced by the documents
    #[arg(short, long, value_name = "DIR")]
    dtd_path: Option<PathBuf>,

    /// Check documents against their DTD before extracting
    #[arg(long)]
    validate: bool,

    /// Directory for the output files
    #[arg(short, long, value_name = "DIR")]
    output_path: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputKind::Csv)]
    output_type: OutputKind,

    /// Log documents that fail to convert and keep going
    #[arg(long)]
    continue_on_error: bool,

    /// DOCTYPE names of wrapper documents to skip
    #[arg(long, value_name = "NAME", default_values_t = [DEFAULT_WRAPPER_DOCTYPE.to_string()])]
    wrapper_doctype: Vec<String>,
}

impl Args {
    fn into_config(self) -> TabulateConfig {
        TabulateConfig {
            inputs: self.inputs,
            recurse: self.recurse,
            schema_path: self.config,
            dtd_dir: self.dtd_path,
            output_dir: self.output_path,
            output_kind: self.output_type,
            validate: self.validate,
            continue_on_error: self.continue_on_error,
            segmenter: SegmenterConfig {
                wrapper_doctypes: self.wrapper_doctype,
            },
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match xmltab::run(&args.into_config()) {
        Ok(summary) if summary.is_failure() => {
            error!("No documents were converted");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
