//! gridtok-apply: re-tokenise a corpus with an existing rule set.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use gridtok::cli;
use gridtok::driver;
use gridtok::ApplyConfig;

#[derive(Parser)]
#[command(
    name = "gridtok-apply",
    about = "Apply learned merge rules to a corpus of .dat grid images"
)]
struct Args {
    /// rules.dat produced by gridtok-train
    #[arg(short = 'r', long)]
    rules: PathBuf,

    /// tokens/ directory of the same training run
    #[arg(short = 't', long)]
    tokens: PathBuf,

    /// Corpus directory of <id>.dat / <name>_<id>.dat grids
    #[arg(short = 'i', long)]
    input_dir: PathBuf,

    /// Output directory for transcribed_data/
    #[arg(short = 'o', long)]
    output_dir: PathBuf,

    /// Expected grid width
    #[arg(long, default_value_t = 12)]
    image_width: u32,

    /// Expected grid height
    #[arg(long, default_value_t = 12)]
    image_height: u32,

    /// Fan-out of the sharded output directory
    #[arg(long, default_value_t = 128)]
    bucket_modulus: u32,

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
    let config = ApplyConfig {
        rule_file: args.rules.clone(),
        token_dir: args.tokens.clone(),
        image_width: args.image_width,
        image_height: args.image_height,
        bucket_modulus: args.bucket_modulus,
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
    };

    let summary = driver::apply_rules_to_folder(&config)?;

    match args.summary_format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => {
            println!("Images processed: {}", summary.images);
            println!("Rules applied: {}", summary.rules_applied);
        }
    }

    Ok(())
}
