use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

use clonetrace::{io, InferenceConfig, InferenceRun};

#[derive(Debug, Parser)]
#[clap(name = "clonetrace")]
#[clap(about = "Clonal phylogeny inference from bulk tumour read counts.", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Cluster variants, sample clone trees and report the best tree
    #[clap(arg_required_else_help = true)]
    Infer {
        /// CSV with columns variant_id,alt,total
        #[clap(short, long, value_parser, required = true)]
        input: PathBuf,

        /// prefix for the output tables, e.g. results/sample1
        #[clap(short, long, value_parser, required = true)]
        output_prefix: PathBuf,

        /// JSON run configuration; missing keys take default values
        #[clap(short, long, value_parser)]
        config: Option<PathBuf>,

        /// random seed
        #[clap(short, long, value_parser)]
        seed: Option<u64>,

        /// independent MCMC chains per clone count
        #[clap(long, value_parser)]
        chains_per_k: Option<usize>,

        /// minimum MCMC steps per chain
        #[clap(long, value_parser)]
        min_steps: Option<usize>,

        /// maximum MCMC steps per chain
        #[clap(long, value_parser)]
        max_steps: Option<usize>,

        /// minimum posterior probability for a configuration to be reported
        #[clap(long, value_parser)]
        config_cutoff: Option<f64>,

        /// worker threads, defaults to all cores
        #[clap(short, long, value_parser)]
        threads: Option<usize>,

        /// hide the progress bar
        #[clap(long, value_parser, default_value_t = false)]
        no_progress: bool,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let args = Cli::parse();
    init_logger(args.verbose);

    let outcome = match args.command {
        Commands::Infer {
            input,
            output_prefix,
            config,
            seed,
            chains_per_k,
            min_steps,
            max_steps,
            config_cutoff,
            threads,
            no_progress,
        } => {
            if let Some(n) = threads {
                if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
                    warn!("could not size the thread pool: {}", e);
                }
            }
            infer(
                &input,
                &output_prefix,
                config.as_deref(),
                |c: &mut InferenceConfig| {
                    if let Some(v) = seed {
                        c.seed = v;
                    }
                    if let Some(v) = chains_per_k {
                        c.chains_per_k = v;
                    }
                    if let Some(v) = min_steps {
                        c.min_steps = v;
                    }
                    if let Some(v) = max_steps {
                        c.max_steps = v;
                    }
                    if let Some(v) = config_cutoff {
                        c.config_cutoff = v;
                    }
                    if no_progress {
                        c.progress = false;
                    }
                },
            )
        }

        Commands::DefaultConfig => serde_json::to_string_pretty(&InferenceConfig::default())
            .map(|json| println!("{}", json))
            .map_err(Into::into),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn infer(
    input: &std::path::Path,
    output_prefix: &std::path::Path,
    config_path: Option<&std::path::Path>,
    overrides: impl FnOnce(&mut InferenceConfig),
) -> clonetrace::Result<()> {
    let mut config = match config_path {
        Some(path) => io::load_config(path)?,
        None => InferenceConfig::default(),
    };
    overrides(&mut config);

    let counts = io::read_counts(input)?;
    info!("loaded {} variants from {:?}", counts.len(), input);

    let result = InferenceRun::new(config)?.run(&counts)?;
    for path in io::write_outputs(output_prefix, &result)? {
        info!("wrote {:?}", path);
    }
    println!(
        "K={} with {} configurations; best tree in configuration {} (logLik {:.3})",
        result.clone_count,
        result.posterior.configurations.len(),
        result.posterior.best,
        result.best.tree.log_likelihood
    );
    Ok(())
}
