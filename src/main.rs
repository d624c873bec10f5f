use anyhow::Context;
use clap::Parser;
use gtframe::{GtfFrame, ReaderOptions, SyntheticFeature};
use peak_alloc::PeakAlloc;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[global_allocator]
static PEAK_ALLOC: PeakAlloc = PeakAlloc;

#[derive(Parser)]
#[command(
    name = "gtframe",
    version,
    about = "Parse GTF annotation files into Polars data frames"
)]
struct Cli {
    /// Input GTF file (may be gzip-compressed, detected by .gz/.gzip suffix)
    input: PathBuf,

    /// Write the parsed table back out as GTF instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep only rows with these feature types (comma-separated)
    #[arg(long, value_delimiter = ',')]
    features: Option<Vec<String>>,

    /// Restrict the output to these columns, in this order (comma-separated)
    #[arg(long, value_delimiter = ',')]
    usecols: Option<Vec<String>>,

    /// Keep the raw attribute column instead of expanding it
    #[arg(long)]
    no_expand: bool,

    /// Infer gene_biotype/transcript_biotype from the source column
    #[arg(long)]
    infer_biotype: bool,

    /// Reconstruct gene and transcript rows from gene_id/transcript_id groups
    #[arg(long)]
    create_missing: bool,

    /// Rows of raw attribute text buffered per expansion chunk
    #[arg(long, default_value_t = 65_536)]
    chunksize: usize,

    /// Number of rows to print when no output file is given
    #[arg(long, default_value_t = 10)]
    head: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let mut opts = ReaderOptions::default()
        .with_expand_attribute_column(!cli.no_expand)
        .with_infer_biotype_column(cli.infer_biotype)
        .with_chunksize(cli.chunksize);
    if let Some(features) = &cli.features {
        opts = opts.with_features(features);
    }
    if let Some(usecols) = &cli.usecols {
        opts = opts.with_usecols(usecols);
    }

    let start = Instant::now();
    let mut gr = GtfFrame::from_gtf_with(&cli.input, &opts)
        .with_context(|| format!("failed reading {}", cli.input.display()))?;
    info!(
        "parsed {} records with {} columns in {:?}",
        gr.height(),
        gr.df().width(),
        start.elapsed()
    );

    if cli.create_missing {
        gr = gr.create_missing_features(&[
            SyntheticFeature::new("gene", "gene_id"),
            SyntheticFeature::new("transcript", "transcript_id"),
        ])?;
    }

    match &cli.output {
        Some(output) => {
            gr.write_gtf_with_headers(output, &gr.comments)?;
            info!("wrote {} records to {}", gr.height(), output.display());
        }
        None => {
            println!("{:?}", gr.df().head(Some(cli.head)));
        }
    }

    info!("peak memory usage: {:.2} MB", PEAK_ALLOC.peak_usage_as_mb());
    Ok(())
}
