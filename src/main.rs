use clap::Parser;
use flatgff::convert::{flat_to_gff3, gff3_to_flat, ConversionReport};
use flatgff::validate::ValidationEngine;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Common options shared between both directions
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Path to the input file
    #[clap(short = 'i', long, value_parser)]
    input: PathBuf,

    /// Path to the output file (stdout if omitted)
    #[clap(short = 'o', long, value_parser)]
    output: Option<PathBuf>,

    /// Override a rule severity, as rule=off|warn|error (repeatable)
    #[clap(long = "severity", value_parser)]
    severity: Vec<String>,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Command-line tool for converting between flat-file and GFF3 annotation.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Convert flat-file records to GFF3
    ToGff3 {
        #[clap(flatten)]
        common: CommonOpts,
    },
    /// Convert GFF3 (optionally BGZF-compressed) to flat-file records
    FromGff3 {
        #[clap(flatten)]
        common: CommonOpts,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::ToGff3 { common } => {
            let mut engine = initialize(&common)?;
            let report = run(&common, |out| flat_to_gff3(&common.input, out, &mut engine))?;
            summarize(&report);
        }
        Args::FromGff3 { common } => {
            let mut engine = initialize(&common)?;
            let report = run(&common, |out| gff3_to_flat(&common.input, out, &mut engine))?;
            summarize(&report);
        }
    }

    Ok(())
}

/// Initialize the logger and the validation engine from common options
fn initialize(common: &CommonOpts) -> io::Result<ValidationEngine> {
    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let mut engine = ValidationEngine::with_defaults();
    for spec in &common.severity {
        engine
            .set_severity_spec(spec)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }
    Ok(engine)
}

fn run<F>(common: &CommonOpts, convert: F) -> io::Result<ConversionReport>
where
    F: FnOnce(&mut dyn Write) -> flatgff::error::Result<ConversionReport>,
{
    let report = match &common.output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            let report = convert(&mut out)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            out.flush()?;
            report
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let report = convert(&mut out)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            out.flush()?;
            report
        }
    };
    Ok(report)
}

/// Findings are logged as they are recorded; this closes with the totals.
fn summarize(report: &ConversionReport) {
    info!(
        "{} record(s) converted, {} warning(s)",
        report.records,
        report.warnings.len()
    );
}
