use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use rusty_sort::error::SortError;
use rusty_sort::pipeline::{SortConfig, SpikeSorter};
use rusty_sort::signal::Signal;

#[derive(Parser, Debug)]
struct Args {
    /// The delimited text file holding the recording
    #[arg(short, long)]
    input: PathBuf,
    /// The sampling rate of the recording, in Hz
    #[arg(short = 'r', long, default_value = "10000.0")]
    sample_rate: f64,
    /// The column holding the samples
    #[arg(long, default_value = "0")]
    column: usize,
    /// The column delimiter
    #[arg(long, default_value = "\t")]
    delimiter: char,
    /// A JSON configuration file (defaults are used otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where to write the JSON result
    #[arg(short, long, default_value = "sort_result.json")]
    output: PathBuf,
    /// Overrides the number of clusters of the configuration
    #[arg(short = 'k', long)]
    num_clusters: Option<usize>,
    /// Overrides the clustering seed of the configuration
    #[arg(long)]
    seed: Option<u64>,
    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) -> Result<(), SortError> {
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let pattern = "{d(%H:%M:%S)} {l} - {m}{n}";

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();
    let mut builder =
        Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = Root::builder().appender("stdout");

    if let Some(path) = &args.log_file {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(pattern)))
            .build(path)
            .map_err(|e| SortError::IOError(e.to_string()))?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let config = builder
        .build(root.build(level))
        .map_err(|e| SortError::IOError(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| SortError::IOError(e.to_string()))?;
    Ok(())
}

fn main() -> Result<(), SortError> {
    let args = Args::parse();
    init_logging(&args)?;
    log::info!("{:?}", args);

    let mut config = match &args.config {
        Some(path) => SortConfig::load_from(path)?,
        None => SortConfig::default(),
    };
    if let Some(num_clusters) = args.num_clusters {
        config.num_clusters = num_clusters;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let raw = Signal::load_delimited(&args.input, args.delimiter, args.column, args.sample_rate)?;
    log::info!(
        "Recording loaded: {} samples ({:.2} s at {} Hz)",
        raw.len(),
        raw.duration(),
        raw.sample_rate()
    );

    let sorter = SpikeSorter::build(config)?;
    let result = sorter.run(&raw)?;

    for cluster_id in 0..result.clustering.num_clusters() {
        let spikes = result.cluster_spikes(cluster_id);
        let mean_amplitude = if spikes.is_empty() {
            0.0
        } else {
            spikes.iter().map(|spike| spike.peak_amplitude).sum::<f64>() / spikes.len() as f64
        };
        log::info!(
            "Cluster {}: {} spikes, mean peak amplitude {:.3}",
            cluster_id,
            spikes.len(),
            mean_amplitude
        );
    }

    result.save_to(&args.output)?;
    log::info!("Result saved to {}", args.output.display());
    Ok(())
}
