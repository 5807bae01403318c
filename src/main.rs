use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use aiasim::aia::Aia;
use aiasim::config::AiaConfig;
use aiasim::script;

#[derive(Parser)]
#[command(
    name = "aiasim",
    version,
    about = "RISC-V AIA interrupt controller model: replay APLIC/IMSIC event scripts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an event script and print every read result
    Run {
        /// Path to the event script
        #[arg(short, long)]
        script: PathBuf,

        /// Interrupt source slots, including reserved source 0
        #[arg(long, default_value = "32")]
        sources: u32,

        /// Number of harts
        #[arg(long, default_value = "2")]
        harts: u32,

        /// Numerically largest priority accepted in direct mode
        #[arg(long, default_value = "6")]
        min_prio: u32,

        /// Interrupt identities per IMSIC file
        #[arg(long, default_value = "64")]
        ids: u32,

        /// Guest interrupt files per hart
        #[arg(long, default_value = "1")]
        vs_files: u32,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script: path,
            sources,
            harts,
            min_prio,
            ids,
            vs_files,
        } => {
            let config = AiaConfig {
                nr_sources: sources,
                nr_harts: harts,
                min_prio,
                imsic_nr_ids: ids,
                nr_vs_files: vs_files,
                ..AiaConfig::default()
            };

            let mut aia = Aia::new(config).unwrap_or_else(|e| {
                eprintln!("aiasim: {}", e);
                process::exit(2);
            });
            let text = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("aiasim: {}: {}", path.display(), e);
                process::exit(2);
            });
            let steps = script::parse(&text).unwrap_or_else(|e| {
                eprintln!("aiasim: {}: {}", path.display(), e);
                process::exit(2);
            });

            let stdout = std::io::stdout();
            if let Err(e) = script::run(&mut aia, &steps, &mut stdout.lock()) {
                eprintln!("aiasim: {}: {}", path.display(), e);
                process::exit(1);
            }
        }
    }
}
