use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;

use clap::Parser;
use log::error;
use rayon::ThreadPoolBuilder;

use burnish::dataset::load_dataset;
use burnish::error::{Error, Result};
use burnish::polisher::{polish, PolisherConfig};
use burnish::window::PoaConfig;

/// Stand-alone read and assembly polishing tool. Corrects draft target
/// sequences with raw reads and precomputed read-to-target overlaps,
/// writing the polished sequences as FASTA to standard output.
#[derive(Parser, Debug)]
#[command(name = "burnish", author, version, about)]
struct Args {
    /// Query sequences in FASTA/FASTQ format (optionally gzipped)
    sequences: String,

    /// Overlaps between queries and targets in MHAP/PAF/SAM format
    /// (optionally gzipped)
    overlaps: String,

    /// Target sequences in FASTA/FASTQ format (optionally gzipped)
    targets: String,

    /// Number of threads
    #[arg(short = 't', long, default_value_t = NonZeroUsize::new(1).unwrap())]
    threads: NonZeroUsize,

    /// Maximum allowed error rate used for filtering overlaps
    #[arg(short = 'e', long, default_value_t = 0.3)]
    error_threshold: f64,

    /// Fragment correction: keep all overlaps per query instead of the
    /// longest one
    #[arg(short = 'f', long)]
    fragment: bool,

    /// Disable consensus trimming at window ends
    #[arg(long)]
    no_trimming: bool,

    /// Size of the window on which POA is performed
    #[arg(short = 'w', long, default_value_t = 200)]
    window_length: u32,

    /// Threshold for average base quality of windows used in POA
    #[arg(short = 'q', long, default_value_t = 10.0)]
    quality_threshold: f64,

    /// Score for matching bases
    #[arg(short = 'm', long = "match", default_value_t = 3)]
    match_score: i8,

    /// Score for mismatching bases
    #[arg(short = 'x', long, default_value_t = -5, allow_hyphen_values = true)]
    mismatch: i8,

    /// Gap penalty (must be negative)
    #[arg(short = 'g', long, default_value_t = -4, allow_hyphen_values = true)]
    gap: i8,

    /// Output targets whose windows were never polished as well
    #[arg(long)]
    include_unpolished: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    ThreadPoolBuilder::new()
        .num_threads(args.threads.into())
        .build_global()
        .map_err(|e| Error::Config(format!("failed to build thread pool: {e}")))?;

    let config = PolisherConfig {
        window_length: args.window_length,
        quality_threshold: args.quality_threshold,
        trim: !args.no_trimming,
        include_unpolished: args.include_unpolished,
        poa: PoaConfig {
            match_score: args.match_score,
            mismatch: args.mismatch,
            gap: args.gap,
        },
    };
    config.validate()?;

    let dataset = load_dataset(
        &args.sequences,
        &args.overlaps,
        &args.targets,
        args.error_threshold,
        args.fragment,
    )?;

    let polished = polish(&config, dataset)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for sequence in &polished {
        writeln!(out, ">{}", sequence.name())?;
        out.write_all(sequence.data())?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
