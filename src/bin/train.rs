//! gridtok-train: learn a 2-D merge-rule vocabulary over a grid corpus.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use gridtok::cli;
use gridtok::driver;
use gridtok::TrainConfig;

#[derive(Parser)]
#[command(
    name = "gridtok-train",
    about = "Learn merge rules over a corpus of .dat grid images"
)]
struct Args {
    /// JSON configuration file; individual flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Corpus directory of <id>.dat / <name>_<id>.dat grids
    #[arg(short = 'i', long)]
    input_dir: Option<PathBuf>,

    /// Output directory for rules.dat, tokens/ and transcribed_data/
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Largest class id appearing in the input cells
    #[arg(long)]
    base_class_max: Option<u32>,

    /// Number of merge rules to learn
    #[arg(short = 'n', long)]
    rules_to_learn: Option<u32>,

    /// Expected grid width
    #[arg(long)]
    image_width: Option<u32>,

    /// Expected grid height
    #[arg(long)]
    image_height: Option<u32>,

    /// Fan-out of the sharded output directory
    #[arg(long)]
    bucket_modulus: Option<u32>,

    /// Output format for the run summary: text or json
    #[arg(long, default_value = "text", value_parser = validate_summary_format)]
    summary_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_summary_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown summary format '{}'. Options: text, json", s)),
    }
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    let summary = driver::train(&config)?;

    match args.summary_format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => {
            println!("Images processed: {}", summary.images);
            println!(
                "Rules learned: {} ({} requested)",
                summary.rules_learned, config.rules_to_learn
            );
            println!("Vocabulary size: {}", summary.vocab_size);
            if summary.exhausted {
                println!("Corpus exhausted before the requested rule count.");
            }
        }
    }

    Ok(())
}

fn resolve_config(args: &Args) -> Result<TrainConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => TrainConfig {
            base_class_max: 255,
            rules_to_learn: 32,
            image_width: 12,
            image_height: 12,
            bucket_modulus: 128,
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
        },
    };

    if let Some(dir) = &args.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(v) = args.base_class_max {
        config.base_class_max = v;
    }
    if let Some(v) = args.rules_to_learn {
        config.rules_to_learn = v;
    }
    if let Some(v) = args.image_width {
        config.image_width = v;
    }
    if let Some(v) = args.image_height {
        config.image_height = v;
    }
    if let Some(v) = args.bucket_modulus {
        config.bucket_modulus = v;
    }

    if config.input_dir.as_os_str().is_empty() {
        return Err("No input directory. Use --input-dir or --config".into());
    }
    if config.output_dir.as_os_str().is_empty() {
        return Err("No output directory. Use --output-dir or --config".into());
    }

    Ok(config)
}
